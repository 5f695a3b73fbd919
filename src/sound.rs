use std::cell::RefCell;
use std::error::Error;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use beep::beep;
use tracing::debug;

use crate::layout::{AUDIO_BYTES_PER_CHANNEL, AUDIO_SIZE};
use crate::memory::{local_range, MemoryDevice};

pub trait Sound {
    fn beep(&mut self, pitch: u16) -> Result<(), Box<dyn Error>>;
    fn stop(&mut self) -> Result<(), Box<dyn Error>>;
}

/// PC speaker style output. Only channel 0 of the audio registers is heard.
pub struct SimpleBeep {
    pitch: Option<u16>,
}

impl SimpleBeep {
    pub fn new() -> Self {
        SimpleBeep { pitch: None }
    }
}

impl Sound for SimpleBeep {
    fn beep(&mut self, pitch: u16) -> Result<(), Box<dyn Error>> {
        if self.pitch != Some(pitch) {
            beep(pitch)?;
            self.pitch = Some(pitch);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Box<dyn Error>> {
        if self.pitch.is_some() {
            beep(0)?;
            self.pitch = None;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct Mute {
    pub last_pitch: Option<u16>,
}

impl Mute {
    pub fn new() -> Self {
        Mute::default()
    }
}

impl Sound for Mute {
    fn beep(&mut self, pitch: u16) -> Result<(), Box<dyn Error>> {
        self.last_pitch = Some(pitch);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Box<dyn Error>> {
        self.last_pitch = None;
        Ok(())
    }
}

/// Audio channel registers. Each channel is `AUDIO_BYTES_PER_CHANNEL` bytes:
/// frequency (u16 LE), volume (u8), the rest is left to the synthesiser.
#[derive(Clone)]
pub struct Audio {
    registers: Rc<RefCell<Box<[u8]>>>,
}

impl Audio {
    pub fn new() -> Self {
        Audio {
            registers: Rc::new(RefCell::new(vec![0u8; AUDIO_SIZE as usize].into_boxed_slice())),
        }
    }

    /// (frequency, volume) of a channel
    pub fn channel(&self, channel: usize) -> (u16, u8) {
        let regs = self.registers.borrow();
        let base = channel * AUDIO_BYTES_PER_CHANNEL;
        (u16::from_le_bytes([regs[base], regs[base + 1]]), regs[base + 2])
    }

    /// push the state of channel 0 out to a beeper
    pub fn play(&self, sound: &mut dyn Sound) -> Result<(), Box<dyn Error>> {
        match self.channel(0) {
            (freq, volume) if freq > 0 && volume > 0 => sound.beep(freq),
            _ => sound.stop(),
        }
    }
}

impl Default for Audio {
    fn default() -> Self {
        Audio::new()
    }
}

impl MemoryDevice for Audio {
    fn name(&self) -> &str {
        "AUDIO"
    }

    fn size(&self) -> u64 {
        AUDIO_SIZE
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> u64 {
        let r = local_range(offset, buf.len(), self.size());
        let n = r.len();
        buf[..n].copy_from_slice(&self.registers.borrow()[r]);
        n as u64
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> u64 {
        let r = local_range(offset, data.len(), self.size());
        let n = r.len();
        self.registers.borrow_mut()[r].copy_from_slice(&data[..n]);
        n as u64
    }
}

/// Frame pacing signal. A clock thread bumps the counter at the target rate
/// (the role an audio callback plays on a real console); the main loop spins
/// until it sees a pending beat and consumes it.
pub struct Heartbeat {
    counter: Arc<AtomicI64>,
    stop: Arc<AtomicBool>,
    clock: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// a heartbeat nobody drives; beats only arrive through [`Heartbeat::pulse`]
    pub fn manual() -> Self {
        Heartbeat {
            counter: Arc::new(AtomicI64::new(0)),
            stop: Arc::new(AtomicBool::new(false)),
            clock: None,
        }
    }

    /// start a clock thread beating `rate` times a second; `rate` must be
    /// positive
    pub fn spawn(rate: f64) -> Self {
        let mut heartbeat = Heartbeat::manual();
        let counter = heartbeat.counter.clone();
        let stop = heartbeat.stop.clone();
        let period = Duration::from_secs_f64(1.0 / rate);
        heartbeat.clock = Some(thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                spin_sleep::sleep(period);
                counter.fetch_add(1, Ordering::Release);
            }
        }));
        debug!(rate, "heartbeat started");
        heartbeat
    }

    /// add a beat; safe from any thread holding a clone of the counter
    pub fn pulse(&self) {
        self.counter.fetch_add(1, Ordering::Release);
    }

    pub fn pending(&self) -> i64 {
        self.counter.load(Ordering::Acquire)
    }

    /// busy-wait for a beat, then consume it
    pub fn wait(&self) {
        while self.counter.load(Ordering::Acquire) <= 0 {
            std::hint::spin_loop();
        }
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(clock) = self.clock.take() {
            let _ = clock.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_zero_drives_beeper() -> Result<(), Box<dyn Error>> {
        let audio = Audio::new();
        let mut device = audio.clone();
        let mut mute = Mute::new();

        device.write(0, &[0x2d, 0x08, 0xff]);
        audio.play(&mut mute)?;
        assert_eq!(mute.last_pitch, Some(2093));

        device.write(2, &[0]);
        audio.play(&mut mute)?;
        assert_eq!(mute.last_pitch, None);
        Ok(())
    }

    #[test]
    fn test_audio_registers_clamped() {
        let mut audio = Audio::new();
        assert_eq!(audio.write(AUDIO_SIZE - 1, &[1, 2, 3]), 1);
        let mut buf = [0u8; 4];
        assert_eq!(audio.read(AUDIO_SIZE, &mut buf), 0);
    }

    #[test]
    fn test_manual_heartbeat_consumes_one_beat() {
        let hb = Heartbeat::manual();
        hb.pulse();
        hb.pulse();
        hb.wait();
        assert_eq!(hb.pending(), 1);
    }

    #[test]
    fn test_spawned_heartbeat_beats() {
        let hb = Heartbeat::spawn(1000.0);
        hb.wait();
        hb.wait();
    }
}
