use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::rc::Rc;
use std::time::Duration;

use crossterm::event::{
    poll, read, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyModifiers,
    MouseButton, MouseEvent, MouseEventKind,
};
use crossterm::{execute, terminal};
use tracing::{debug, trace};

use crate::layout::{CONTROLLER_BUTTONS, CONTROLLER_PLAYERS, CONTROLLER_SIZE, KEYBOARD_QUEUE, KEYBOARD_SIZE, MOUSE_SIZE};
use crate::memory::{local_range, MemoryDevice};

/// gamepad buttons, in register order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Up,
    Down,
    Left,
    Right,
    A,
    B,
    Start,
    Select,
}

/// pointer buttons; left is register 0, anything else is register 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pointer {
    Primary,
    Secondary,
}

/// Everything the host can tell the kernel between two ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Pressed { player: u8, button: Button },
    Released { player: u8, button: Button },
    Text(char),
    /// window coordinates; the kernel maps them through the viewport
    PointerMoved { x: u16, y: u16 },
    PointerPressed(Pointer),
    PointerReleased(Pointer),
    PointerLeft,
    Resized { width: u16, height: u16 },
    FocusLost,
    Reset,
    Menu,
    ToggleCapture,
    Quit,
}

/// reads host events
pub trait Input {
    /// drain everything that happened since the last call
    fn poll_events(&mut self) -> Result<Vec<InputEvent>, io::Error>;
}

/// gamepad registers: one byte per button, `CONTROLLER_BUTTONS` per player
#[derive(Clone, Default)]
pub struct Controller {
    buttons: Rc<RefCell<[u8; CONTROLLER_SIZE as usize]>>,
}

impl Controller {
    pub fn new() -> Self {
        Controller::default()
    }

    fn slot(player: u8, button: Button) -> Option<usize> {
        let player = player as usize;
        (player < CONTROLLER_PLAYERS).then(|| player * CONTROLLER_BUTTONS + button as usize)
    }

    pub fn pressed(&self, player: u8, button: Button) {
        if let Some(i) = Controller::slot(player, button) {
            self.buttons.borrow_mut()[i] = 1;
        }
    }

    pub fn released(&self, player: u8, button: Button) {
        if let Some(i) = Controller::slot(player, button) {
            self.buttons.borrow_mut()[i] = 0;
        }
    }

    pub fn all_released(&self) {
        *self.buttons.borrow_mut() = [0; CONTROLLER_SIZE as usize];
    }

    pub fn is_pressed(&self, player: u8, button: Button) -> bool {
        Controller::slot(player, button).map_or(false, |i| self.buttons.borrow()[i] != 0)
    }
}

impl MemoryDevice for Controller {
    fn name(&self) -> &str {
        "CONTROLLER"
    }

    fn size(&self) -> u64 {
        CONTROLLER_SIZE
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> u64 {
        let r = local_range(offset, buf.len(), self.size());
        let n = r.len();
        buf[..n].copy_from_slice(&self.buttons.borrow()[r]);
        n as u64
    }

    /// read-only for guests
    fn write(&mut self, _offset: u64, _data: &[u8]) -> u64 {
        0
    }
}

/// Typed characters. Byte 0 holds how many are queued, the queue follows.
/// Writing `n` to byte 0 acknowledges (drops) the first `n` characters.
#[derive(Clone, Default)]
pub struct Keyboard {
    queue: Rc<RefCell<VecDeque<u8>>>,
}

impl Keyboard {
    pub fn new() -> Self {
        Keyboard::default()
    }

    /// queue a typed character; non-ASCII and overflow are dropped
    pub fn input(&self, ch: char) {
        let mut queue = self.queue.borrow_mut();
        if ch.is_ascii() && queue.len() < KEYBOARD_QUEUE {
            queue.push_back(ch as u8);
        } else {
            trace!(?ch, "keyboard input dropped");
        }
    }

    fn registers(&self) -> [u8; KEYBOARD_SIZE as usize] {
        let queue = self.queue.borrow();
        let mut regs = [0u8; KEYBOARD_SIZE as usize];
        regs[0] = queue.len() as u8;
        for (dst, ch) in regs[1..].iter_mut().zip(queue.iter()) {
            *dst = *ch;
        }
        regs
    }
}

impl MemoryDevice for Keyboard {
    fn name(&self) -> &str {
        "KEYBOARD"
    }

    fn size(&self) -> u64 {
        KEYBOARD_SIZE
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> u64 {
        let r = local_range(offset, buf.len(), self.size());
        let n = r.len();
        buf[..n].copy_from_slice(&self.registers()[r]);
        n as u64
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> u64 {
        if offset != 0 || data.is_empty() {
            return 0;
        }
        let mut queue = self.queue.borrow_mut();
        let ack = (data[0] as usize).min(queue.len());
        queue.drain(..ack);
        1
    }
}

/// Pointer registers: x and y as little-endian u16 in logical pixels, then
/// one byte per pointer button.
#[derive(Clone, Default)]
pub struct Mouse {
    registers: Rc<RefCell<[u8; MOUSE_SIZE as usize]>>,
}

impl Mouse {
    pub fn new() -> Self {
        Mouse::default()
    }

    pub fn moved(&self, x: u16, y: u16) {
        let mut regs = self.registers.borrow_mut();
        regs[0..2].copy_from_slice(&x.to_le_bytes());
        regs[2..4].copy_from_slice(&y.to_le_bytes());
    }

    pub fn pressed(&self, button: Pointer) {
        self.registers.borrow_mut()[4 + button as usize] = 1;
    }

    pub fn released(&self, button: Pointer) {
        self.registers.borrow_mut()[4 + button as usize] = 0;
    }

    pub fn position(&self) -> (u16, u16) {
        let regs = self.registers.borrow();
        (
            u16::from_le_bytes([regs[0], regs[1]]),
            u16::from_le_bytes([regs[2], regs[3]]),
        )
    }
}

impl MemoryDevice for Mouse {
    fn name(&self) -> &str {
        "MOUSE"
    }

    fn size(&self) -> u64 {
        MOUSE_SIZE
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> u64 {
        let r = local_range(offset, buf.len(), self.size());
        let n = r.len();
        buf[..n].copy_from_slice(&self.registers.borrow()[r]);
        n as u64
    }

    /// read-only for guests
    fn write(&mut self, _offset: u64, _data: &[u8]) -> u64 {
        0
    }
}

/// gamepad mapping using the arrow keys and the bottom row of a qwerty keyboard
const CONVENTIONAL_KEYMAP: [(KeyCode, Button); 8] = [
    (KeyCode::Up, Button::Up),
    (KeyCode::Down, Button::Down),
    (KeyCode::Left, Button::Left),
    (KeyCode::Right, Button::Right),
    (KeyCode::Char('z'), Button::A),
    (KeyCode::Char('x'), Button::B),
    (KeyCode::Enter, Button::Start),
    (KeyCode::Tab, Button::Select),
];

/// Terminal input via crossterm. Terminals only report key presses, so a
/// mapped button is held for one poll and released on the next.
pub struct TerminalInput {
    keymap: HashMap<KeyCode, Button>,
    held: Vec<Button>,
}

impl TerminalInput {
    pub fn new() -> Result<Self, io::Error> {
        terminal::enable_raw_mode()?;
        execute!(io::stdout(), EnableMouseCapture)?;
        Ok(TerminalInput {
            keymap: HashMap::from(CONVENTIONAL_KEYMAP),
            held: Vec::new(),
        })
    }

    fn translate_key(&mut self, evt: KeyEvent, events: &mut Vec<InputEvent>) {
        let ctrl = evt.modifiers.contains(KeyModifiers::CONTROL);
        match evt.code {
            KeyCode::Char('r') if ctrl => events.push(InputEvent::Reset),
            KeyCode::Char('m') if ctrl => events.push(InputEvent::Menu),
            KeyCode::Char('c') if ctrl => events.push(InputEvent::Quit),
            KeyCode::Esc => events.push(InputEvent::Quit),
            KeyCode::F(12) => events.push(InputEvent::ToggleCapture),
            code => {
                if let KeyCode::Char(ch) = code {
                    events.push(InputEvent::Text(ch));
                }
                match self.keymap.get(&code) {
                    Some(button) => {
                        events.push(InputEvent::Pressed {
                            player: 0,
                            button: *button,
                        });
                        self.held.push(*button);
                    }
                    None => debug!(?code, "key not mapped to a button"),
                }
            }
        }
    }

    fn translate_mouse(evt: MouseEvent, events: &mut Vec<InputEvent>) {
        let pointer = |b: MouseButton| match b {
            MouseButton::Left => Pointer::Primary,
            _ => Pointer::Secondary,
        };
        match evt.kind {
            MouseEventKind::Down(b) => events.push(InputEvent::PointerPressed(pointer(b))),
            MouseEventKind::Up(b) => events.push(InputEvent::PointerReleased(pointer(b))),
            MouseEventKind::Moved | MouseEventKind::Drag(_) => {
                events.push(InputEvent::PointerMoved {
                    x: evt.column,
                    y: evt.row,
                })
            }
            _ => {}
        }
    }
}

impl Input for TerminalInput {
    fn poll_events(&mut self) -> Result<Vec<InputEvent>, io::Error> {
        let mut events: Vec<InputEvent> = self
            .held
            .drain(..)
            .map(|button| InputEvent::Released { player: 0, button })
            .collect();
        while poll(Duration::from_millis(0))? {
            match read()? {
                Event::Key(evt) => self.translate_key(evt, &mut events),
                Event::Mouse(evt) => TerminalInput::translate_mouse(evt, &mut events),
                Event::Resize(width, height) => events.push(InputEvent::Resized { width, height }),
            }
        }
        Ok(events)
    }
}

impl Drop for TerminalInput {
    fn drop(&mut self) {
        // nothing sensible to do if the terminal is already gone
        let _ = execute!(io::stdout(), DisableMouseCapture);
        let _ = terminal::disable_raw_mode();
    }
}

/// replays a fixed list of event batches, one per poll; useful for testing
pub struct ScriptedInput {
    batches: VecDeque<Vec<InputEvent>>,
}

impl ScriptedInput {
    pub fn new(batches: Vec<Vec<InputEvent>>) -> Self {
        ScriptedInput {
            batches: batches.into(),
        }
    }
}

impl Input for ScriptedInput {
    fn poll_events(&mut self) -> Result<Vec<InputEvent>, io::Error> {
        Ok(self.batches.pop_front().unwrap_or_default())
    }
}
