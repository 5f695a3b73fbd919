//! Built-in cartridges for running the console without a script runtime:
//! a test card standing in for `init.nib` and a small pause menu.

use tracing::debug;

use crate::command::{CommandWriter, Ink};
use crate::error::RuntimeError;
use crate::input::Button;
use crate::layout::{
    COMMAND_ADDR, CONTROLLER_ADDR, CONTROLLER_BUTTONS, KEYBOARD_ADDR, KEYBOARD_SIZE, MOUSE_ADDR,
    SCREEN_HEIGHT, SCREEN_WIDTH,
};
use crate::process::{NativeLoader, Pid, Runtime};
use crate::syscall::Syscalls;

const RESET_MESSAGE: &[u8] = b"reset";

pub fn loader() -> NativeLoader {
    let mut loader = NativeLoader::new();
    loader
        .register("init.nib", |_| Ok(Box::new(TestCard::default())))
        .register("menu.nib", |_| Ok(Box::new(Menu::default())));
    loader
}

fn buttons(sys: &mut dyn Syscalls) -> Vec<u8> {
    sys.read(CONTROLLER_ADDR, CONTROLLER_BUTTONS as u64)
}

fn held(buttons: &[u8], button: Button) -> bool {
    buttons.get(button as usize).map_or(false, |b| *b != 0)
}

fn submit(sys: &mut dyn Syscalls, commands: &mut CommandWriter) {
    sys.write(COMMAND_ADDR, &commands.finish());
}

/// Colour bars, a ball steered with the d-pad and a frame counter.
#[derive(Default)]
pub struct TestCard {
    x: i16,
    y: i16,
    frames: u32,
    typed: String,
}

impl Runtime for TestCard {
    fn init(&mut self, sys: &mut dyn Syscalls) -> Result<(), RuntimeError> {
        self.x = SCREEN_WIDTH as i16 / 2;
        self.y = SCREEN_HEIGHT as i16 / 2;
        debug!(pid = sys.pid(), "test card up");
        Ok(())
    }

    fn update(&mut self, sys: &mut dyn Syscalls, _dt: f32) -> Result<(), RuntimeError> {
        while let Some(message) = sys.receive() {
            if message == RESET_MESSAGE {
                self.frames = 0;
            }
        }

        let pad = buttons(sys);
        if held(&pad, Button::Up) {
            self.y -= 2;
        }
        if held(&pad, Button::Down) {
            self.y += 2;
        }
        if held(&pad, Button::Left) {
            self.x -= 2;
        }
        if held(&pad, Button::Right) {
            self.x += 2;
        }
        self.x = self.x.clamp(0, SCREEN_WIDTH as i16 - 1);
        self.y = self.y.clamp(0, SCREEN_HEIGHT as i16 - 1);

        let keys = sys.read(KEYBOARD_ADDR, KEYBOARD_SIZE);
        if let Some((&count, queued)) = keys.split_first() {
            let count = (count as usize).min(queued.len());
            if count > 0 {
                self.typed.extend(queued[..count].iter().map(|&b| b as char));
                sys.write(KEYBOARD_ADDR, &[count as u8]);
                let excess = self.typed.len().saturating_sub(32);
                self.typed.replace_range(..excess, "");
            }
        }

        self.frames = self.frames.wrapping_add(1);
        Ok(())
    }

    fn draw(&mut self, sys: &mut dyn Syscalls) -> Result<(), RuntimeError> {
        let mut commands = CommandWriter::new();
        commands.clear(0);
        let bar = SCREEN_WIDTH as i16 / 16;
        for c in 0..16u8 {
            commands.rect(Ink::palette(c), c as i16 * bar, 180, bar, 60, true);
        }
        commands
            .rect(Ink::indexed(7), 4, 4, SCREEN_WIDTH as i16 - 8, SCREEN_HEIGHT as i16 - 8, false)
            .line(Ink::time(0), 4, 4, SCREEN_WIDTH as i16 - 5, SCREEN_HEIGHT as i16 - 5)
            .circle(Ink::time(8), self.x, self.y, 12, true)
            .circle(Ink::indexed(7), self.x, self.y, 14, false)
            .text(Ink::indexed(10), 10, 10, &format!("{:08X}", self.frames))
            .text(Ink::indexed(12), 10, 20, &self.typed);

        let pointer = sys.read(MOUSE_ADDR, 4);
        if let [x0, x1, y0, y1] = pointer[..] {
            let x = i16::from_le_bytes([x0, x1]);
            let y = i16::from_le_bytes([y0, y1]);
            commands
                .line(Ink::indexed(8), x - 3, y, x + 3, y)
                .line(Ink::indexed(8), x, y - 3, x, y + 3);
        }
        submit(sys, &mut commands);
        Ok(())
    }
}

/// Opened on top of a running cartridge. Start closes it, Select also tells
/// the cartridge to reset its counter.
#[derive(Default)]
pub struct Menu {
    app: Option<Pid>,
}

impl Runtime for Menu {
    fn init(&mut self, sys: &mut dyn Syscalls) -> Result<(), RuntimeError> {
        self.app = sys.getenv("app.pid").and_then(|pid| pid.parse().ok());
        debug!(app = ?self.app, "menu opened");
        Ok(())
    }

    fn update(&mut self, sys: &mut dyn Syscalls, _dt: f32) -> Result<(), RuntimeError> {
        let pad = buttons(sys);
        if held(&pad, Button::Select) {
            if let Some(app) = self.app {
                sys.send(app, RESET_MESSAGE.to_vec());
            }
            sys.kill(0);
        } else if held(&pad, Button::Start) {
            sys.kill(0);
        }
        Ok(())
    }

    fn draw(&mut self, sys: &mut dyn Syscalls) -> Result<(), RuntimeError> {
        let app = self.app.map(|pid| format!("{pid:X}")).unwrap_or_default();
        let mut commands = CommandWriter::new();
        commands
            .rect(Ink::palette(1), 100, 80, 120, 80, true)
            .rect(Ink::indexed(7), 100, 80, 120, 80, false)
            .text(Ink::indexed(7), 110, 90, &app);
        submit(sys, &mut commands);
        Ok(())
    }
}
