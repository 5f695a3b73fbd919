//! # nibble
//!
//! Kernel of a fantasy console: a flat memory bus of mapped devices, a
//! cooperative scheduler multiplexing cartridges onto it, and a GPU that
//! interprets a command buffer into drawing primitives.
//!
//! ## Design
//!
//! * everything a guest can touch is a [`memory::MemoryDevice`] on one bus;
//!   addresses are handed out in registration order
//! * a process's private memory is only on the bus during its own turn
//! * guests reach the kernel through [`syscall::Syscalls`], never directly
//! * display, input and sound are traits so the terminal front end can be
//!   swapped for dummies in tests
//!
//! Model
//!
//! ```text
//! Kernel
//!  |-- bus: command, palette, video, random, controller, keyboard, mouse,
//!  |        audio, RAM, [private memory of the process holding the turn]
//!  |-- gpu(command, palette, video)
//!  |-- processes(pid -> cartridge memory, runtime, env, inbox)
//!  |-- wait-list
//!  `-- main loop
//!       |-- input events -> registers / viewport / reset / menu
//!       |-- for each running process: map, init or update+draw, render, unmap
//!       |-- gpu draw: batches -> GPU layer, compose with CPU surface
//!       |-- present, feed the beeper
//!       `-- wait for the heartbeat
//! ```
pub mod capture;
pub mod command;
pub mod config;
pub mod demo;
pub mod display;
pub mod error;
pub mod gpu;
pub mod input;
pub mod kernel;
pub mod layout;
pub mod memory;
pub mod process;
pub mod random;
pub mod raster;
pub mod sound;
pub mod syscall;
pub mod viewport;
