//! Guest processes and the cartridges they are started from.
//!
//! A cartridge is a directory holding an entry point (`main.lua`) and,
//! optionally, an `assets.bin` image copied into the start of the process's
//! private memory. How the entry point is turned into something runnable is
//! up to a [`CartridgeLoader`]; the kernel only ever sees the resulting
//! [`Runtime`].

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::RuntimeError;
use crate::memory::{MemoryDevice, Ram};
use crate::syscall::Syscalls;

pub type Pid = u64;

/// opaque payload passed between processes
pub type Message = Vec<u8>;

/// the privileged first process; nothing can kill it
pub const INIT_PID: Pid = 1;

pub const ENTRY_POINT: &str = "main.lua";
pub const ASSETS: &str = "assets.bin";

/// A cartridge directory that passed the structure check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cartridge {
    root: PathBuf,
}

impl Cartridge {
    /// `None` unless `root` is a directory containing the entry point
    pub fn open(root: &Path) -> Option<Cartridge> {
        debug!(path = %root.display(), "checking cartridge");
        if check_cart_structure(root) {
            Some(Cartridge {
                root: root.to_path_buf(),
            })
        } else {
            None
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// directory name, e.g. `init.nib`
    pub fn name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Private memory for a new process: `size` zeroed bytes with the
    /// cartridge's assets, if any, copied to the start.
    pub fn load_memory(&self, size: usize) -> Result<Box<dyn MemoryDevice>, RuntimeError> {
        let mut memory = Ram::named("CARTRIDGE", size);
        let assets = self.root.join(ASSETS);
        if assets.is_file() {
            let n = memory.write_any(&mut File::open(&assets)?, 0)?;
            debug!(cartridge = %self.name(), bytes = n, "assets loaded");
        }
        Ok(Box::new(memory))
    }
}

pub fn check_cart_structure(root: &Path) -> bool {
    root.is_dir() && root.join(ENTRY_POINT).is_file()
}

/// The guest side of a process. Each call is one turn; errors are guest
/// faults and end the process.
pub trait Runtime {
    /// first turn of the process
    fn init(&mut self, sys: &mut dyn Syscalls) -> Result<(), RuntimeError>;

    /// every later turn, before [`Runtime::draw`]; `dt` is seconds since the
    /// previous tick
    fn update(&mut self, sys: &mut dyn Syscalls, dt: f32) -> Result<(), RuntimeError>;

    fn draw(&mut self, sys: &mut dyn Syscalls) -> Result<(), RuntimeError>;
}

/// Turns a cartridge into a runnable [`Runtime`]. An error here is reported
/// by `exec` as a failed start.
pub trait CartridgeLoader {
    fn load(&mut self, cartridge: &Cartridge) -> Result<Box<dyn Runtime>, RuntimeError>;
}

type Factory = Box<dyn Fn(&Cartridge) -> Result<Box<dyn Runtime>, RuntimeError>>;

/// Runtimes written in Rust, looked up by cartridge directory name.
#[derive(Default)]
pub struct NativeLoader {
    factories: HashMap<String, Factory>,
}

impl NativeLoader {
    pub fn new() -> Self {
        NativeLoader::default()
    }

    pub fn register<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn(&Cartridge) -> Result<Box<dyn Runtime>, RuntimeError> + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
        self
    }
}

impl CartridgeLoader for NativeLoader {
    fn load(&mut self, cartridge: &Cartridge) -> Result<Box<dyn Runtime>, RuntimeError> {
        let name = cartridge.name();
        match self.factories.get(&name) {
            Some(factory) => factory(cartridge),
            None => Err(RuntimeError::NoRuntime(name)),
        }
    }
}

pub struct Process {
    pid: Pid,
    cartridge: Cartridge,
    env: BTreeMap<String, String>,
    // both are lent out while the process holds the turn
    memory: Option<Box<dyn MemoryDevice>>,
    runtime: Option<Box<dyn Runtime>>,
    running: bool,
    initialized: bool,
    inbox: VecDeque<Message>,
}

impl Process {
    pub fn new(
        pid: Pid,
        cartridge: Cartridge,
        env: BTreeMap<String, String>,
        memory: Box<dyn MemoryDevice>,
        runtime: Box<dyn Runtime>,
    ) -> Self {
        Process {
            pid,
            cartridge,
            env,
            memory: Some(memory),
            runtime: Some(runtime),
            running: true,
            initialized: false,
            inbox: VecDeque::new(),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn cartridge(&self) -> &Cartridge {
        &self.cartridge
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// whether its memory is currently on the bus
    pub fn is_mapped(&self) -> bool {
        self.memory.is_none()
    }

    /// hand out memory and runtime for a turn
    pub fn begin_turn(&mut self) -> Option<(Box<dyn MemoryDevice>, Box<dyn Runtime>)> {
        match (self.memory.take(), self.runtime.take()) {
            (Some(memory), Some(runtime)) => Some((memory, runtime)),
            (memory, runtime) => {
                self.memory = memory;
                self.runtime = runtime;
                None
            }
        }
    }

    pub fn end_turn(&mut self, memory: Option<Box<dyn MemoryDevice>>, runtime: Box<dyn Runtime>) {
        self.memory = memory;
        self.runtime = Some(runtime);
        self.initialized = true;
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn getenv(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    pub fn setenv(&mut self, key: &str, value: &str) {
        self.env.insert(key.to_string(), value.to_string());
    }

    pub fn write_message(&mut self, message: Message) {
        self.inbox.push_back(message);
    }

    pub fn read_message(&mut self) -> Option<Message> {
        self.inbox.pop_front()
    }

    pub fn pending_messages(&self) -> usize {
        self.inbox.len()
    }

    pub fn clear_messages(&mut self) {
        self.inbox.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct Idle;

    impl Runtime for Idle {
        fn init(&mut self, _: &mut dyn Syscalls) -> Result<(), RuntimeError> {
            Ok(())
        }
        fn update(&mut self, _: &mut dyn Syscalls, _: f32) -> Result<(), RuntimeError> {
            Ok(())
        }
        fn draw(&mut self, _: &mut dyn Syscalls) -> Result<(), RuntimeError> {
            Ok(())
        }
    }

    fn cart(root: &Path, name: &str) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(ENTRY_POINT), "-- entry").unwrap();
        dir
    }

    #[test]
    fn test_cart_structure() {
        let tmp = tempfile::tempdir().unwrap();
        let good = cart(tmp.path(), "good.nib");
        assert!(check_cart_structure(&good));

        let empty = tmp.path().join("empty.nib");
        fs::create_dir(&empty).unwrap();
        assert!(!check_cart_structure(&empty));

        // entry point must be a file
        let odd = tmp.path().join("odd.nib");
        fs::create_dir_all(odd.join(ENTRY_POINT)).unwrap();
        assert!(!check_cart_structure(&odd));

        assert!(!check_cart_structure(&good.join(ENTRY_POINT)));
        assert!(Cartridge::open(&tmp.path().join("missing.nib")).is_none());
        assert_eq!(Cartridge::open(&good).unwrap().name(), "good.nib");
    }

    #[test]
    fn test_assets_loaded_into_memory() -> Result<(), RuntimeError> {
        let tmp = tempfile::tempdir()?;
        let dir = cart(tmp.path(), "art.nib");
        fs::write(dir.join(ASSETS), [0xab, 0xcd, 0xef])?;
        let cartridge = Cartridge::open(&dir).unwrap();

        let mut memory = cartridge.load_memory(2)?;
        assert_eq!(memory.name(), "CARTRIDGE");
        let mut buf = [0u8; 2];
        assert_eq!(memory.read(0, &mut buf), 2);
        assert_eq!(buf, [0xab, 0xcd]);
        Ok(())
    }

    #[test]
    fn test_native_loader_lookup() {
        let tmp = tempfile::tempdir().unwrap();
        let known = Cartridge::open(&cart(tmp.path(), "known.nib")).unwrap();
        let unknown = Cartridge::open(&cart(tmp.path(), "other.nib")).unwrap();
        let mut loader = NativeLoader::new();
        loader.register("known.nib", |_| Ok(Box::new(Idle)));
        assert!(loader.load(&known).is_ok());
        assert!(matches!(
            loader.load(&unknown),
            Err(RuntimeError::NoRuntime(name)) if name == "other.nib"
        ));
    }

    #[test]
    fn test_turn_lends_memory_and_runtime() {
        let tmp = tempfile::tempdir().unwrap();
        let cartridge = Cartridge::open(&cart(tmp.path(), "p.nib")).unwrap();
        let memory = cartridge.load_memory(16).unwrap();
        let mut p = Process::new(7, cartridge, BTreeMap::new(), memory, Box::new(Idle));
        assert!(p.is_running() && !p.is_initialized() && !p.is_mapped());

        let (memory, runtime) = p.begin_turn().unwrap();
        assert!(p.is_mapped());
        assert!(p.begin_turn().is_none());
        p.end_turn(Some(memory), runtime);
        assert!(!p.is_mapped());
        assert!(p.is_initialized());
    }

    #[test]
    fn test_inbox_fifo() {
        let tmp = tempfile::tempdir().unwrap();
        let cartridge = Cartridge::open(&cart(tmp.path(), "p.nib")).unwrap();
        let memory = cartridge.load_memory(16).unwrap();
        let mut p = Process::new(2, cartridge, BTreeMap::new(), memory, Box::new(Idle));
        p.write_message(b"one".to_vec());
        p.write_message(b"two".to_vec());
        assert_eq!(p.pending_messages(), 2);
        assert_eq!(p.read_message().as_deref(), Some(&b"one"[..]));
        p.clear_messages();
        assert_eq!(p.read_message(), None);
    }
}
