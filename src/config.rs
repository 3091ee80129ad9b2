//! Emulator configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::cpu::tlb::DEFAULT_CAPACITY;
use crate::devices::DEFAULT_ESCAPE;
use crate::error::LoadError;
use crate::image::FS_SIZE;

pub const DEFAULT_MEMORY_MB: u32 = 128;
pub const MAX_MEMORY_MB: u32 = 2048;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulatorConfig {
    /// Guest physical memory in MiB
    pub memory_mb: u32,
    /// Cache the current code and stack page translations
    pub fast_path: bool,
    /// Flat ram-filesystem image loaded at the top of memory
    pub filesystem: Option<PathBuf>,
    /// Console byte that aborts emulation (None = no escape)
    pub escape: Option<u8>,
    /// Live soft TLB pages before a full flush
    pub tlb_capacity: usize,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        EmulatorConfig {
            memory_mb: DEFAULT_MEMORY_MB,
            fast_path: true,
            filesystem: None,
            escape: Some(DEFAULT_ESCAPE),
            tlb_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl EmulatorConfig {
    pub fn with_memory_mb(mut self, mb: u32) -> Self {
        self.memory_mb = mb;
        self
    }

    pub fn memory_bytes(&self) -> u32 {
        self.memory_mb.saturating_mul(1024 * 1024)
    }

    pub fn validate(&self) -> Result<(), LoadError> {
        if self.memory_mb == 0 || self.memory_mb > MAX_MEMORY_MB {
            return Err(LoadError::InvalidMemorySize(self.memory_mb));
        }
        if self.filesystem.is_some() && self.memory_bytes() <= FS_SIZE {
            return Err(LoadError::NoRoomForFilesystem(self.memory_mb));
        }
        Ok(())
    }
}
