use std::io;

use thiserror::Error;

/// Host-side failures: terminal, files, recordings. Nothing a guest does can
/// produce one of these.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("capture failed: {0}")]
    Capture(#[from] image::ImageError),
}

/// A fault raised by a cartridge runtime during one of its turns, or while
/// loading its entry point.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("cartridge {0} has no runtime")]
    NoRuntime(String),

    #[error("guest fault: {0}")]
    Fault(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}
