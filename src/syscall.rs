//! The guest ABI. Runtimes never see the kernel directly: each turn they are
//! handed a [`Turn`], a kernel handle bound to the process holding the turn,
//! and every call acts on behalf of that process. Effects are applied
//! immediately; a process started with `exec` gets its first turn on the
//! next tick.

use std::collections::BTreeMap;
use std::path::Path;

use crate::kernel::Kernel;
use crate::process::{Message, Pid};

/// Result of `exec`, as a guest sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    Started(Pid),
    /// not a cartridge; nothing changed
    NotFound,
    /// a cartridge, but its runtime could not be loaded
    Failed,
}

impl ExecStatus {
    /// pid, 0 or -1
    pub fn as_syscall_value(self) -> i64 {
        match self {
            ExecStatus::Started(pid) => pid as i64,
            ExecStatus::NotFound => 0,
            ExecStatus::Failed => -1,
        }
    }

    pub fn pid(self) -> Option<Pid> {
        match self {
            ExecStatus::Started(pid) => Some(pid),
            _ => None,
        }
    }
}

pub trait Syscalls {
    /// the calling process
    fn pid(&self) -> Pid;

    /// bus write, clamped to the address space; returns bytes written
    fn write(&mut self, addr: u64, data: &[u8]) -> u64;

    /// bus read, clamped to the address space
    fn read(&mut self, addr: u64, len: u64) -> Vec<u8>;

    fn exec(&mut self, path: &Path, env: BTreeMap<String, String>) -> ExecStatus;

    /// suspend the caller until `pid` no longer exists
    fn wait(&mut self, pid: Pid);

    /// 0 kills the caller
    fn kill(&mut self, pid: Pid);

    fn getenv(&self, key: &str) -> Option<String>;

    fn setenv(&mut self, key: &str, value: &str);

    fn send(&mut self, pid: Pid, message: Message) -> bool;

    fn receive(&mut self) -> Option<Message>;
}

pub struct Turn<'k> {
    kernel: &'k mut Kernel,
    pid: Pid,
}

impl<'k> Turn<'k> {
    pub fn new(kernel: &'k mut Kernel, pid: Pid) -> Self {
        Turn { kernel, pid }
    }
}

impl<'k> Syscalls for Turn<'k> {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn write(&mut self, addr: u64, data: &[u8]) -> u64 {
        self.kernel.write(addr, data)
    }

    fn read(&mut self, addr: u64, len: u64) -> Vec<u8> {
        self.kernel.read(addr, len)
    }

    fn exec(&mut self, path: &Path, env: BTreeMap<String, String>) -> ExecStatus {
        self.kernel.exec(path, env)
    }

    fn wait(&mut self, pid: Pid) {
        self.kernel.wait(self.pid, pid)
    }

    fn kill(&mut self, pid: Pid) {
        self.kernel.kill(self.pid, pid)
    }

    fn getenv(&self, key: &str) -> Option<String> {
        self.kernel.getenv(self.pid, key)
    }

    fn setenv(&mut self, key: &str, value: &str) {
        self.kernel.setenv(self.pid, key, value)
    }

    fn send(&mut self, pid: Pid, message: Message) -> bool {
        self.kernel.send(pid, message)
    }

    fn receive(&mut self) -> Option<Message> {
        self.kernel.receive(self.pid)
    }
}
