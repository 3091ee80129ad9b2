//! Executable and filesystem image loading
//!
//! An executable is a 16 byte header followed by code and initialized data,
//! loaded at physical address 0. Either image may be gzip or zstd
//! compressed.

use std::fs;
use std::io::Read;
use std::path::Path;

use tracing::info;

use crate::error::LoadError;
use crate::memory::{Bus, PhysicalMemory};

/// Executable header magic
pub const MAGIC: u32 = 0xC0DE_F00D;
/// Size of the ram-filesystem window at the top of memory
pub const FS_SIZE: u32 = 4 * 1024 * 1024;
pub const HEADER_SIZE: usize = 16;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub bss: u32,
    pub entry: u32,
    pub flags: u32,
}

impl Header {
    pub fn parse(data: &[u8]) -> Result<Header, LoadError> {
        if data.len() < HEADER_SIZE {
            return Err(LoadError::Truncated(data.len()));
        }
        let word = |i: usize| u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
        let header = Header {
            magic: word(0),
            bss: word(4),
            entry: word(8),
            flags: word(12),
        };
        if header.magic != MAGIC {
            return Err(LoadError::BadMagic(header.magic));
        }
        Ok(header)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        for (i, w) in [self.magic, self.bss, self.entry, self.flags].iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
        }
        out
    }
}

/// Where a loaded executable starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub pc: u32,
    pub sp: u32,
}

/// Inflate `data` if it carries a gzip or zstd magic
pub fn decompress(data: Vec<u8>) -> Result<Vec<u8>, LoadError> {
    if data.starts_with(&GZIP_MAGIC) {
        let mut out = Vec::new();
        flate2::read::GzDecoder::new(&data[..])
            .read_to_end(&mut out)
            .map_err(LoadError::Decompress)?;
        Ok(out)
    } else if data.starts_with(&ZSTD_MAGIC) {
        zstd::stream::decode_all(&data[..]).map_err(LoadError::Decompress)
    } else {
        Ok(data)
    }
}

pub fn read_file(path: &Path) -> Result<Vec<u8>, LoadError> {
    let data = fs::read(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    decompress(data)
}

/// Initial stack pointer: just below the filesystem window when there is
/// room for one, otherwise the top of memory.
pub fn stack_top(memsz: u32) -> u32 {
    if memsz > FS_SIZE {
        memsz - FS_SIZE
    } else {
        memsz
    }
}

/// Copy an executable into memory and return its entry point
pub fn load_executable(mem: &mut PhysicalMemory, data: &[u8]) -> Result<Entry, LoadError> {
    let header = Header::parse(data)?;
    let payload = &data[HEADER_SIZE..];
    let sp = stack_top(mem.size());
    let needed = payload.len() as u64 + header.bss as u64;
    if needed > sp as u64 {
        return Err(LoadError::MemoryExhausted { needed, limit: sp });
    }
    mem.load_binary(payload, 0)
        .map_err(|_| LoadError::MemoryExhausted { needed, limit: sp })?;
    // memory may be reused across loads
    if let Some(bss) = mem.slice_mut(payload.len() as u32, header.bss as usize) {
        bss.fill(0);
    }
    info!(
        "loaded image: {} bytes, bss = {} entry = {:#x} sp = {:#x}",
        payload.len(),
        header.bss,
        header.entry,
        sp
    );
    Ok(Entry {
        pc: header.entry,
        sp,
    })
}

/// Copy a flat filesystem image into the window at the top of memory
pub fn load_filesystem(mem: &mut PhysicalMemory, data: &[u8]) -> Result<(), LoadError> {
    let memsz = mem.size();
    if memsz <= FS_SIZE {
        return Err(LoadError::NoRoomForFilesystem(memsz >> 20));
    }
    if data.len() > FS_SIZE as usize {
        return Err(LoadError::FilesystemTooLarge {
            size: data.len(),
            max: FS_SIZE,
        });
    }
    let base = memsz - FS_SIZE;
    mem.load_binary(data, base)
        .map_err(|_| LoadError::FilesystemTooLarge {
            size: data.len(),
            max: FS_SIZE,
        })?;
    info!("loaded ram filesystem: {} bytes at {:#x}", data.len(), base);
    Ok(())
}
