//! # kernel
//!
//! The scheduler. It owns the bus and every permanent device on it, the live
//! processes and the wait-list, and drives the frame loop.
//!
//! Each tick every running process gets one turn, in pid order, over a
//! snapshot of the process table taken at the start of the tick. For the
//! length of its turn the process's private memory is mapped at the tail of
//! the bus; its first turn runs `init`, later ones `update` then `draw`.
//! After every turn the GPU drains whatever the process left in the command
//! buffer. Once all turns are done the frame is composed and presented.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, error, info, trace, warn};

use crate::config::KernelConfig;
use crate::display::{Display, Frame};
use crate::error::{KernelError, RuntimeError};
use crate::gpu::Gpu;
use crate::input::{Controller, Input, InputEvent, Keyboard, Mouse, Pointer};
use crate::layout::{SCREEN_HEIGHT, SCREEN_WIDTH, SPRITE_SHEET_SIZE};
use crate::memory::{MemoryBus, Ram};
use crate::process::{Cartridge, CartridgeLoader, Message, Pid, Process, Runtime, INIT_PID};
use crate::random::RandomMemory;
use crate::sound::{Audio, Heartbeat, Sound};
use crate::syscall::{ExecStatus, Syscalls, Turn};

pub struct Kernel {
    config: KernelConfig,
    loader: Box<dyn CartridgeLoader>,
    bus: MemoryBus,
    gpu: Gpu,
    controller: Controller,
    keyboard: Keyboard,
    mouse: Mouse,
    audio: Audio,
    processes: BTreeMap<Pid, Process>,
    /// (waiter, target)
    waitlist: Vec<(Pid, Pid)>,
    next_pid: Pid,
    /// the process that most recently held the turn
    active: Option<Pid>,
    window: (u16, u16),
    exiting: bool,
}

impl Kernel {
    /// A kernel with no devices and no processes; call [`Kernel::startup`]
    /// to bring it up.
    pub fn new(config: KernelConfig, loader: Box<dyn CartridgeLoader>) -> Self {
        let gpu = Gpu::new(&config);
        Kernel {
            config,
            loader,
            bus: MemoryBus::new(),
            gpu,
            controller: Controller::new(),
            keyboard: Keyboard::new(),
            mouse: Mouse::new(),
            audio: Audio::new(),
            processes: BTreeMap::new(),
            waitlist: Vec::new(),
            next_pid: INIT_PID,
            active: None,
            window: (SCREEN_WIDTH as u16, SCREEN_HEIGHT as u16),
            exiting: false,
        }
    }

    pub fn gpu(&self) -> &Gpu {
        &self.gpu
    }

    /// the most recently composed frame
    pub fn frame(&self) -> &Frame {
        self.gpu.frame()
    }

    pub fn bus(&self) -> &MemoryBus {
        &self.bus
    }

    pub fn process(&self, pid: Pid) -> Option<&Process> {
        self.processes.get(&pid)
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.processes.keys().copied().collect()
    }

    pub fn waitlist(&self) -> &[(Pid, Pid)] {
        &self.waitlist
    }

    pub fn active(&self) -> Option<Pid> {
        self.active
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting
    }

    /// first address of the private region of whichever process holds the turn
    pub fn cartridge_addr(&self) -> u64 {
        self.bus.high_water_mark()
    }

    fn create_memory_map(&mut self) {
        self.gpu = Gpu::new(&self.config);
        self.gpu.resize(self.window.0, self.window.1);
        self.controller = Controller::new();
        self.keyboard = Keyboard::new();
        self.mouse = Mouse::new();
        self.audio = Audio::new();

        self.bus.register(Box::new(self.gpu.command_memory()));
        self.bus.register(Box::new(self.gpu.palette_memory()));
        self.bus.register(Box::new(self.gpu.video_memory()));
        self.bus.register(Box::new(RandomMemory::new()));
        self.bus.register(Box::new(self.controller.clone()));
        self.bus.register(Box::new(self.keyboard.clone()));
        self.bus.register(Box::new(self.mouse.clone()));
        self.bus.register(Box::new(self.audio.clone()));
        self.bus.register(Box::new(Ram::new(self.config.ram_size)));
        info!(high_water_mark = self.bus.high_water_mark(), "memory map created");
    }

    fn destroy_memory_map(&mut self) {
        self.gpu.close();
        self.bus.clear();
    }

    /// Bring up the device map and launch the init cartridge.
    pub fn startup(&mut self) -> ExecStatus {
        self.next_pid = INIT_PID;
        self.exiting = false;
        self.create_memory_map();

        let init = self.config.init_cartridge.clone();
        let status = self.exec(&init, BTreeMap::new());
        match status {
            ExecStatus::Started(pid) => info!(pid, "init started"),
            _ => error!(path = %init.display(), ?status, "could not start init"),
        }
        status
    }

    /// Tear everything down: wait-list, inboxes, processes, then devices.
    pub fn shutdown(&mut self) {
        self.waitlist.clear();
        // inboxes go before any process does
        for process in self.processes.values_mut() {
            process.clear_messages();
        }
        let count = self.processes.len();
        self.processes.clear();
        self.active = None;
        self.destroy_memory_map();
        info!(processes = count, "kernel shut down");
    }

    pub fn reset(&mut self) -> ExecStatus {
        info!("reset");
        self.shutdown();
        self.startup()
    }

    /// Start the cartridge at `path`. Nothing changes unless it starts.
    pub fn exec(&mut self, path: &Path, mut env: BTreeMap<String, String>) -> ExecStatus {
        info!(path = %path.display(), "exec");
        let cartridge = match Cartridge::open(path) {
            Some(cartridge) => cartridge,
            None => {
                debug!(path = %path.display(), "not a cartridge");
                return ExecStatus::NotFound;
            }
        };
        let loaded = cartridge
            .load_memory(self.config.cartridge_size)
            .and_then(|memory| Ok((memory, self.loader.load(&cartridge)?)));
        let (memory, runtime) = match loaded {
            Ok(parts) => parts,
            Err(err) => {
                warn!(cartridge = %cartridge.name(), %err, "could not load cartridge");
                return ExecStatus::Failed;
            }
        };

        let pid = self.next_pid;
        self.next_pid += 1;
        env.insert("pid".to_string(), pid.to_string());
        self.processes
            .insert(pid, Process::new(pid, cartridge, env, memory, runtime));
        info!(pid, "process started");
        ExecStatus::Started(pid)
    }

    /// suspend `waiter` until `target` is gone
    pub fn wait(&mut self, waiter: Pid, target: Pid) {
        if let Some(process) = self.processes.get_mut(&waiter) {
            debug!(waiter, target, "wait");
            self.waitlist.push((waiter, target));
            process.set_running(false);
        }
    }

    /// `pid == 0` kills `caller`. Init can not be killed either way.
    pub fn kill(&mut self, caller: Pid, pid: Pid) {
        let target = match pid {
            0 => caller,
            _ => pid,
        };
        if target == INIT_PID {
            debug!(caller, "refusing to kill init");
        } else if self.processes.remove(&target).is_some() {
            info!(pid = target, caller, "process killed");
        }
        self.check_waitlist();
    }

    /// Drop every entry whose target no longer exists, then resume the
    /// waiters left with no entries at all.
    pub fn check_waitlist(&mut self) {
        let processes = &self.processes;
        let mut resolved = Vec::new();
        self.waitlist.retain(|&(waiter, target)| {
            let alive = processes.contains_key(&target);
            if !alive {
                resolved.push(waiter);
            }
            alive
        });
        resolved.dedup();
        for waiter in resolved {
            if self.waitlist.iter().any(|&(w, _)| w == waiter) {
                continue;
            }
            if let Some(process) = self.processes.get_mut(&waiter) {
                debug!(waiter, "waiter resumed");
                process.set_running(true);
            }
        }
    }

    pub fn getenv(&self, pid: Pid, key: &str) -> Option<String> {
        self.processes
            .get(&pid)
            .and_then(|p| p.getenv(key))
            .map(str::to_string)
    }

    pub fn setenv(&mut self, pid: Pid, key: &str, value: &str) {
        if let Some(process) = self.processes.get_mut(&pid) {
            process.setenv(key, value);
        }
    }

    pub fn send(&mut self, pid: Pid, message: Message) -> bool {
        match self.processes.get_mut(&pid) {
            Some(process) => {
                process.write_message(message);
                true
            }
            None => false,
        }
    }

    pub fn receive(&mut self, pid: Pid) -> Option<Message> {
        self.processes.get_mut(&pid)?.read_message()
    }

    pub fn write(&mut self, addr: u64, data: &[u8]) -> u64 {
        self.bus.write(addr, data)
    }

    pub fn read(&mut self, addr: u64, len: u64) -> Vec<u8> {
        self.bus.read(addr, len)
    }

    /// One frame: a turn for every running process, then compose.
    pub fn tick(&mut self, dt: f32) -> &Frame {
        self.check_waitlist();
        for pid in self.pids() {
            self.run_turn(pid, dt);
        }
        self.gpu.draw()
    }

    fn run_turn(&mut self, pid: Pid, dt: f32) {
        let process = match self.processes.get_mut(&pid) {
            Some(process) if process.is_running() => process,
            _ => return,
        };
        let initialized = process.is_initialized();
        let (memory, mut runtime) = match process.begin_turn() {
            Some(parts) => parts,
            None => return,
        };

        self.bus.map(memory);
        self.active = Some(pid);
        trace!(pid, initialized, "turn");
        let result = play(runtime.as_mut(), &mut Turn::new(self, pid), initialized, dt);
        let mut sprites = vec![0u8; SPRITE_SHEET_SIZE];
        let n = self.bus.read_mapped(0, &mut sprites) as usize;
        sprites.truncate(n);
        self.gpu.render(&sprites);
        let memory = self.bus.unmap();

        match result {
            // a process killed during its own turn is simply not put back
            Ok(()) => {
                if let Some(process) = self.processes.get_mut(&pid) {
                    process.end_turn(memory, runtime);
                }
            }
            Err(err) => {
                warn!(pid, %err, "guest fault, killing process");
                self.processes.remove(&pid);
                self.check_waitlist();
            }
        }
    }

    /// Open the menu cartridge on top of the active process, passing its
    /// environment along with `app.pid`.
    pub fn menu(&mut self) -> Option<ExecStatus> {
        let pid = self.active?;
        let process = self.processes.get(&pid)?;
        if process.cartridge().root() == self.config.menu_cartridge {
            debug!("menu is already open");
            return None;
        }
        let mut env = process.env().clone();
        env.insert("app.pid".to_string(), pid.to_string());
        let menu: PathBuf = self.config.menu_cartridge.clone();
        Some(self.exec(&menu, env))
    }

    pub fn handle_event(&mut self, event: InputEvent) {
        match event {
            InputEvent::Pressed { player, button } => self.controller.pressed(player, button),
            InputEvent::Released { player, button } => self.controller.released(player, button),
            InputEvent::Text(ch) => self.keyboard.input(ch),
            InputEvent::PointerMoved { x, y } => {
                let (x, y) = self.gpu.transform_pointer(x, y);
                self.mouse.moved(x, y);
            }
            InputEvent::PointerPressed(button) => self.mouse.pressed(button),
            InputEvent::PointerReleased(button) => self.mouse.released(button),
            InputEvent::PointerLeft => self.release_pointer(),
            InputEvent::Resized { width, height } => {
                self.window = (width, height);
                self.gpu.resize(width, height);
            }
            InputEvent::FocusLost => {
                self.controller.all_released();
                self.release_pointer();
            }
            InputEvent::Reset => {
                self.reset();
            }
            InputEvent::Menu => {
                self.menu();
            }
            InputEvent::ToggleCapture => self.gpu.toggle_capture(),
            InputEvent::Quit => self.exiting = true,
        }
    }

    fn release_pointer(&mut self) {
        self.mouse.released(Pointer::Primary);
        self.mouse.released(Pointer::Secondary);
    }

    /// Run until a quit request: poll input, tick, present, feed the beeper,
    /// then wait for the next heartbeat.
    pub fn run(
        &mut self,
        display: &mut dyn Display,
        input: &mut dyn Input,
        sound: &mut dyn Sound,
        heartbeat: &Heartbeat,
    ) -> Result<(), KernelError> {
        let (width, height) = display.window_size()?;
        self.handle_event(InputEvent::Resized { width, height });
        let mut last = Instant::now();

        while !self.exiting {
            for event in input.poll_events()? {
                self.handle_event(event);
            }
            if self.exiting {
                break;
            }
            let now = Instant::now();
            let dt = now.duration_since(last).as_secs_f32();
            last = now;

            let frame = self.tick(dt);
            display.draw(frame)?;
            if let Err(err) = self.audio.play(sound) {
                warn!(%err, "audio backend failed");
            }
            heartbeat.wait();
        }

        if let Err(err) = sound.stop() {
            warn!(%err, "could not silence audio");
        }
        info!("kernel loop finished");
        Ok(())
    }
}

/// one turn of guest code
fn play(
    runtime: &mut dyn Runtime,
    sys: &mut dyn Syscalls,
    initialized: bool,
    dt: f32,
) -> Result<(), RuntimeError> {
    if initialized {
        runtime.update(sys, dt)?;
        runtime.draw(sys)
    } else {
        runtime.init(sys)
    }
}
