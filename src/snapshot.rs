//! Machine snapshots
//!
//! Registers, timer, the latched console byte and the whole of physical
//! memory, bincode encoded and zstd compressed. Translation caches are not
//! saved; they are rebuilt after restore.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cpu::CpuState;
use crate::devices::IntervalTimer;
use crate::error::LoadError;
use crate::memory::PhysicalMemory;

#[derive(Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Version for compatibility checking
    pub version: u32,
    pub cpu: CpuState,
    pub timer: IntervalTimer,
    pub kbchar: Option<u8>,
    pub memory: PhysicalMemory,
}

impl Snapshot {
    pub const VERSION: u32 = 1;

    pub fn new(cpu: CpuState, timer: IntervalTimer, kbchar: Option<u8>, memory: PhysicalMemory) -> Self {
        Snapshot {
            version: Self::VERSION,
            cpu,
            timer,
            kbchar,
            memory,
        }
    }

    /// Serialize to bytes (compressed with zstd)
    pub fn to_bytes(&self) -> Result<Vec<u8>, LoadError> {
        let serialized = bincode::serialize(self)
            .map_err(|e| LoadError::Snapshot(format!("serialization error: {}", e)))?;

        zstd::stream::encode_all(&serialized[..], 3)
            .map_err(|e| LoadError::Snapshot(format!("compression error: {}", e)))
    }

    /// Deserialize from bytes (compressed with zstd)
    pub fn from_bytes(data: &[u8]) -> Result<Self, LoadError> {
        let decompressed = zstd::stream::decode_all(data).map_err(LoadError::Decompress)?;

        bincode::deserialize(&decompressed)
            .map_err(|e| LoadError::Snapshot(format!("deserialization error: {}", e)))
    }

    pub fn save(&self, path: &Path) -> Result<(), LoadError> {
        fs::write(path, self.to_bytes()?).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let data = fs::read(path).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_bytes(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Bus;

    #[test]
    fn test_save_and_load_file() {
        let mut memory = PhysicalMemory::with_megabytes(1);
        memory.write32(0x100, 0xdead_beef);
        let cpu = CpuState {
            a: 42,
            f: 1.5,
            cycle: 1 << 40,
            ..CpuState::default()
        };
        let snap = Snapshot::new(cpu.clone(), IntervalTimer::new(), Some(b'x'), memory);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machine.snap");
        snap.save(&path).unwrap();

        let back = Snapshot::load(&path).unwrap();
        assert_eq!(back.version, Snapshot::VERSION);
        assert_eq!(back.cpu, cpu);
        assert_eq!(back.kbchar, Some(b'x'));
        assert_eq!(back.memory.read32(0x100), 0xdead_beef);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(Snapshot::from_bytes(b"not a snapshot").is_err());
    }
}
