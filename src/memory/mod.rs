//! Guest physical memory
//!
//! A single flat RAM array starting at physical address 0. There are no
//! device windows: the only I/O surface is the host bridge opcodes, so every
//! physical address below `size()` is plain RAM and everything above it is a
//! bad physical address.

use serde::{Deserialize, Serialize};

/// Page size used by the walker, the soft TLB and the block operations
pub const PAGE_SIZE: u32 = 4096;
pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_MASK: u32 = PAGE_SIZE - 1;

/// Bus interface for physical memory access
///
/// Callers are expected to have range-checked the address (the walker and
/// the soft TLB never hand out a frame outside memory). Out-of-range reads
/// return zero and out-of-range writes are dropped so that a logic error can
/// never turn into host memory corruption.
pub trait Bus {
    fn size(&self) -> u32;
    fn read8(&self, addr: u32) -> u8;
    fn write8(&mut self, addr: u32, value: u8);
    fn read16(&self, addr: u32) -> u16;
    fn write16(&mut self, addr: u32, value: u16);
    fn read32(&self, addr: u32) -> u32;
    fn write32(&mut self, addr: u32, value: u32);
    fn read64(&self, addr: u32) -> u64;
    fn write64(&mut self, addr: u32, value: u64);

    #[inline(always)]
    fn contains(&self, addr: u32) -> bool {
        addr < self.size()
    }
}

/// Flat guest RAM
#[derive(Clone, Serialize, Deserialize)]
pub struct PhysicalMemory {
    ram: Vec<u8>,
}

impl PhysicalMemory {
    /// Allocate `size` bytes of zeroed RAM. The size is rounded down to a
    /// whole number of pages.
    pub fn new(size: u32) -> Self {
        let size = size & !PAGE_MASK;
        PhysicalMemory {
            ram: vec![0u8; size as usize],
        }
    }

    /// Allocate `mb` MiB of RAM
    pub fn with_megabytes(mb: u32) -> Self {
        Self::new(mb.saturating_mul(1024 * 1024))
    }

    #[inline(always)]
    fn range(&self, addr: u32, len: usize) -> Option<std::ops::Range<usize>> {
        let start = addr as usize;
        let end = start.checked_add(len)?;
        if end <= self.ram.len() {
            Some(start..end)
        } else {
            None
        }
    }

    /// Borrow `len` bytes starting at `addr`
    pub fn slice(&self, addr: u32, len: usize) -> Option<&[u8]> {
        self.range(addr, len).map(|r| &self.ram[r])
    }

    /// Mutably borrow `len` bytes starting at `addr`
    pub fn slice_mut(&mut self, addr: u32, len: usize) -> Option<&mut [u8]> {
        match self.range(addr, len) {
            Some(r) => Some(&mut self.ram[r]),
            None => None,
        }
    }

    /// Copy `len` bytes between two physical ranges (ranges may overlap)
    pub fn copy_within(&mut self, src: u32, dst: u32, len: usize) -> bool {
        match (self.range(src, len), self.range(dst, len)) {
            (Some(s), Some(d)) => {
                self.ram.copy_within(s, d.start);
                true
            }
            _ => false,
        }
    }

    /// Load a binary at the given physical address
    pub fn load_binary(&mut self, data: &[u8], addr: u32) -> Result<(), String> {
        match self.slice_mut(addr, data.len()) {
            Some(dst) => {
                dst.copy_from_slice(data);
                Ok(())
            }
            None => Err(format!(
                "binary of {} bytes at {:#010x} exceeds RAM of {} bytes",
                data.len(),
                addr,
                self.ram.len()
            )),
        }
    }

    #[inline(always)]
    fn read_array<const N: usize>(&self, addr: u32) -> [u8; N] {
        let mut out = [0u8; N];
        if let Some(r) = self.range(addr, N) {
            out.copy_from_slice(&self.ram[r]);
        }
        out
    }

    #[inline(always)]
    fn write_array<const N: usize>(&mut self, addr: u32, bytes: [u8; N]) {
        if let Some(r) = self.range(addr, N) {
            self.ram[r].copy_from_slice(&bytes);
        }
    }
}

impl Bus for PhysicalMemory {
    #[inline(always)]
    fn size(&self) -> u32 {
        self.ram.len() as u32
    }

    #[inline(always)]
    fn read8(&self, addr: u32) -> u8 {
        self.ram.get(addr as usize).copied().unwrap_or(0)
    }

    #[inline(always)]
    fn write8(&mut self, addr: u32, value: u8) {
        if let Some(b) = self.ram.get_mut(addr as usize) {
            *b = value;
        }
    }

    #[inline(always)]
    fn read16(&self, addr: u32) -> u16 {
        u16::from_le_bytes(self.read_array(addr))
    }

    #[inline(always)]
    fn write16(&mut self, addr: u32, value: u16) {
        self.write_array(addr, value.to_le_bytes());
    }

    #[inline(always)]
    fn read32(&self, addr: u32) -> u32 {
        u32::from_le_bytes(self.read_array(addr))
    }

    #[inline(always)]
    fn write32(&mut self, addr: u32, value: u32) {
        self.write_array(addr, value.to_le_bytes());
    }

    #[inline(always)]
    fn read64(&self, addr: u32) -> u64 {
        u64::from_le_bytes(self.read_array(addr))
    }

    #[inline(always)]
    fn write64(&mut self, addr: u32, value: u64) {
        self.write_array(addr, value.to_le_bytes());
    }
}
