use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, RgbaImage};
use tracing::{info, warn};

use crate::display::Frame;
use crate::error::KernelError;

/// An open GIF recording. Frames are appended as they are composited; the
/// file is finalised when the recorder is finished or dropped.
pub struct Recorder {
    path: PathBuf,
    encoder: GifEncoder<BufWriter<File>>,
    delay: Delay,
    frames: usize,
}

impl Recorder {
    pub fn start(path: &Path, frame_rate: u32) -> Result<Recorder, KernelError> {
        let file = File::create(path)?;
        let mut encoder = GifEncoder::new(BufWriter::new(file));
        encoder.set_repeat(Repeat::Infinite)?;
        info!(path = %path.display(), "capture started");
        Ok(Recorder {
            path: path.to_path_buf(),
            encoder,
            delay: Delay::from_numer_denom_ms(1000, frame_rate.max(1)),
            frames: 0,
        })
    }

    pub fn capture(&mut self, frame: &Frame) -> Result<(), KernelError> {
        let image = RgbaImage::from_raw(frame.width as u32, frame.height as u32, frame.pixels.clone())
            .ok_or_else(|| {
                KernelError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "frame buffer does not match its dimensions",
                ))
            })?;
        self.encoder
            .encode_frame(image::Frame::from_parts(image, 0, 0, self.delay))?;
        self.frames += 1;
        Ok(())
    }

    /// Close the recording, returning how many frames it holds. A recording
    /// with no frames is not a GIF, so its file is removed.
    pub fn finish(self) -> usize {
        let Recorder {
            path,
            encoder,
            frames,
            ..
        } = self;
        // the encoder writes the GIF trailer when dropped
        drop(encoder);
        if frames == 0 {
            if let Err(err) = fs::remove_file(&path) {
                warn!(path = %path.display(), %err, "could not remove empty capture");
            }
        }
        info!(path = %path.display(), frames, "capture stopped");
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_capture_writes_gif() -> Result<(), KernelError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.gif");
        let mut r = Recorder::start(&path, 60)?;
        let mut frame = Frame::new(4, 4);
        r.capture(&frame)?;
        frame.set_pixel(1, 1, [255, 0, 0, 255]);
        r.capture(&frame)?;
        assert_eq!(r.finish(), 2);

        let bytes = fs::read(&path)?;
        assert_eq!(&bytes[..6], b"GIF89a");
        assert_eq!(bytes.last(), Some(&0x3b));
        Ok(())
    }

    #[test]
    fn test_empty_capture_leaves_no_file() -> Result<(), KernelError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("empty.gif");
        let r = Recorder::start(&path, 60)?;
        assert_eq!(r.finish(), 0);
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn test_start_in_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("out.gif");
        assert!(Recorder::start(&path, 60).is_err());
    }
}
