use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::layout::RANDOM_SIZE;
use crate::memory::{local_range, MemoryDevice};

/// Every read returns fresh random bytes. Writing to the register stores a
/// seed and restarts the generator from it, so guests can get repeatable
/// sequences.
pub struct RandomMemory {
    rng: StdRng,
    seed: [u8; RANDOM_SIZE as usize],
}

impl RandomMemory {
    pub fn new() -> Self {
        RandomMemory {
            rng: StdRng::from_entropy(),
            seed: [0; RANDOM_SIZE as usize],
        }
    }
}

impl Default for RandomMemory {
    fn default() -> Self {
        RandomMemory::new()
    }
}

impl MemoryDevice for RandomMemory {
    fn name(&self) -> &str {
        "RANDOM"
    }

    fn size(&self) -> u64 {
        RANDOM_SIZE
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> u64 {
        let n = local_range(offset, buf.len(), self.size()).len();
        self.rng.fill_bytes(&mut buf[..n]);
        n as u64
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> u64 {
        let r = local_range(offset, data.len(), self.size());
        let n = r.len();
        if n > 0 {
            self.seed[r].copy_from_slice(&data[..n]);
            self.rng = StdRng::seed_from_u64(u32::from_le_bytes(self.seed) as u64);
        }
        n as u64
    }
}
