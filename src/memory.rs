use std::io;
use std::ops::Range;

use tracing::{debug, warn};

// NB. addresses are u64 across the whole bus; device-local slices are usize to
//     stop endless casting

/// A memory-mapped device. Offsets are local to the device; the bus does the
/// translation from global addresses.
///
/// Implementations must treat zero-length and out-of-range requests as no-ops
/// and return how many bytes were actually transferred.
pub trait MemoryDevice {
    fn name(&self) -> &str;

    /// how many bytes of address space the device occupies
    fn size(&self) -> u64;

    /// fill `buf` from `offset`; reads may have side effects (RNG, queues)
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> u64;

    /// store `data` at `offset`
    fn write(&mut self, offset: u64, data: &[u8]) -> u64;

    /// write unknown len of data into the device at a particular offset
    fn write_any(&mut self, reader: &mut impl io::Read, offset: u64) -> Result<u64, io::Error>
    where
        Self: Sized,
    {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(self.write(offset, &buf))
    }
}

/// The part of `[offset, offset + len)` that lies inside a device of `size`
/// bytes, as slice indices.
pub fn local_range(offset: u64, len: usize, size: u64) -> Range<usize> {
    let start = offset.min(size);
    let end = offset.saturating_add(len as u64).min(size);
    start as usize..end as usize
}

/// Plain byte-addressable storage. Used for general purpose RAM and as the
/// backing store of the simpler register devices.
pub struct Ram {
    name: &'static str,
    bytes: Box<[u8]>,
}

impl Ram {
    pub fn new(size: usize) -> Self {
        Ram::named("RAM", size)
    }

    pub fn named(name: &'static str, size: usize) -> Self {
        Ram {
            name,
            bytes: vec![0u8; size].into_boxed_slice(),
        }
    }

    /// get a r/o slice of the underlying memory
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl MemoryDevice for Ram {
    fn name(&self) -> &str {
        self.name
    }

    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> u64 {
        let r = local_range(offset, buf.len(), self.size());
        let n = r.len();
        buf[..n].copy_from_slice(&self.bytes[r]);
        n as u64
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> u64 {
        let r = local_range(offset, data.len(), self.size());
        let n = r.len();
        self.bytes[r].copy_from_slice(&data[..n]);
        n as u64
    }
}

struct Region {
    addr: u64,
    device: Box<dyn MemoryDevice>,
}

impl Region {
    fn end(&self) -> u64 {
        self.addr + self.device.size()
    }
}

/// Description of one registered region, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionInfo {
    pub addr: u64,
    pub size: u64,
    pub name: String,
}

/// The flat address space. Devices are laid out back to back in registration
/// order starting at 0; the high water mark is the first unassigned address.
///
/// On top of the permanent devices there is at most one mapped region (the
/// private memory of the process holding the turn), placed at the high water
/// mark for as long as it stays mapped.
#[derive(Default)]
pub struct MemoryBus {
    regions: Vec<Region>,
    high_water_mark: u64,
    mapped: Option<Region>,
}

impl MemoryBus {
    pub fn new() -> Self {
        MemoryBus::default()
    }

    /// place `device` at the high water mark and return its base address
    pub fn register(&mut self, device: Box<dyn MemoryDevice>) -> u64 {
        let addr = self.high_water_mark;
        let end = addr + device.size();
        debug!(start = addr, end, name = device.name(), "mapped device");
        self.high_water_mark = end;
        self.regions.push(Region { addr, device });
        addr
    }

    /// first address past the permanent devices
    pub fn high_water_mark(&self) -> u64 {
        self.high_water_mark
    }

    /// size of the currently addressable space, including any mapped region
    pub fn len(&self) -> u64 {
        match &self.mapped {
            Some(region) => region.end(),
            None => self.high_water_mark,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// push a region onto the tail of the bus; returns its base address
    pub fn map(&mut self, device: Box<dyn MemoryDevice>) -> u64 {
        let addr = self.high_water_mark;
        if let Some(previous) = self.mapped.take() {
            warn!(name = previous.device.name(), "mapping over a region that was never unmapped");
        }
        self.mapped = Some(Region { addr, device });
        addr
    }

    /// pop the mapped region, handing it back to its owner
    pub fn unmap(&mut self) -> Option<Box<dyn MemoryDevice>> {
        self.mapped.take().map(|region| region.device)
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// read straight from the mapped region using its local offsets
    pub fn read_mapped(&mut self, offset: u64, buf: &mut [u8]) -> u64 {
        match &mut self.mapped {
            Some(region) => region.device.read(offset, buf),
            None => 0,
        }
    }

    /// drop every permanent device and reset the allocator
    pub fn clear(&mut self) {
        self.regions.clear();
        self.mapped = None;
        self.high_water_mark = 0;
    }

    pub fn regions(&self) -> Vec<RegionInfo> {
        self.regions
            .iter()
            .chain(self.mapped.iter())
            .map(|r| RegionInfo {
                addr: r.addr,
                size: r.device.size(),
                name: r.device.name().to_string(),
            })
            .collect()
    }

    /// Normalise `[start, start + len)` into the addressable space. A range
    /// that wraps past the top of u64 is treated as reversed.
    fn clamp(&self, start: u64, len: u64) -> Range<u64> {
        let (mut start, mut end) = (start, start.wrapping_add(len));
        if start > end {
            std::mem::swap(&mut start, &mut end);
        }
        let limit = self.len();
        start.min(limit)..end.min(limit)
    }

    /// Write `data` at `start`, splitting it across every region it touches.
    /// Bytes past the end of the address space are dropped; returns how many
    /// bytes the devices accepted.
    pub fn write(&mut self, start: u64, data: &[u8]) -> u64 {
        let range = self.clamp(start, data.len() as u64);
        let end = range.end.min(range.start + data.len() as u64);
        let start = range.start;
        let mut written = 0;

        for region in self.regions.iter_mut().chain(self.mapped.iter_mut()) {
            let (blk_start, blk_end) = (region.addr, region.end());
            if blk_end > start && blk_start < end {
                let write_start = blk_start.max(start);
                let write_end = blk_end.min(end);
                let chunk = &data[(write_start - start) as usize..(write_end - start) as usize];
                written += region.device.write(write_start - blk_start, chunk);
            }
        }

        written
    }

    /// Read `len` bytes from `start`, mirroring [`MemoryBus::write`]. The
    /// result only holds the bytes the devices actually produced.
    pub fn read(&mut self, start: u64, len: u64) -> Vec<u8> {
        let range = self.clamp(start, len);
        let (start, end) = (range.start, range.end);
        let mut buffer = vec![0u8; (end - start) as usize];
        let mut num_read = 0;

        for region in self.regions.iter_mut().chain(self.mapped.iter_mut()) {
            let (blk_start, blk_end) = (region.addr, region.end());
            if blk_end > start && blk_start < end {
                let read_start = blk_start.max(start);
                let read_end = blk_end.min(end);
                let chunk = &mut buffer[(read_start - start) as usize..(read_end - start) as usize];
                num_read += region.device.read(read_start - blk_start, chunk);
            }
        }

        buffer.truncate(num_read as usize);
        buffer
    }
}
