//! Error types
//!
//! Guest faults are not errors: they are delivered to the guest kernel. The
//! types here cover the two ways emulation can end badly, a load that never
//! starts and a fatal halt of a running machine.

use std::fmt;

use thiserror::Error;

/// Failure while building or loading a machine
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("bad image magic {0:#010x}")]
    BadMagic(u32),

    #[error("truncated image: {0} bytes is shorter than the header")]
    Truncated(usize),

    #[error("image of {needed} bytes does not fit below the stack at {limit:#010x}")]
    MemoryExhausted { needed: u64, limit: u32 },

    #[error("filesystem image of {size} bytes exceeds the {max} byte window")]
    FilesystemTooLarge { size: usize, max: u32 },

    #[error("memory of {0} MiB is too small to hold a filesystem image")]
    NoRoomForFilesystem(u32),

    #[error("invalid memory size: {0} MiB")]
    InvalidMemorySize(u32),

    #[error("decompression failed: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("snapshot error: {0}")]
    Snapshot(String),
}

/// Why the machine stopped for good
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FatalReason {
    #[error("exception in interrupt handler")]
    DoubleFault,

    #[error("kernel stack fault")]
    KernelStackFault,

    #[error("pc {0:#010x} not word aligned")]
    MisalignedPc(u32),

    #[error("idle with no interrupt source")]
    IdleWithoutInterruptSource,
}

/// Registers captured at a fatal halt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterDump {
    pub cycle: u64,
    pub pc: u32,
    pub ir: u32,
    pub sp: u32,
    pub a: u32,
    pub b: u32,
    pub c: u32,
    pub trap: u32,
}

impl fmt::Display for RegisterDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle = {} pc = {:08x} ir = {:08x} sp = {:08x} a = {} b = {} c = {} trap = {}",
            self.cycle, self.pc, self.ir, self.sp, self.a as i32, self.b as i32, self.c as i32,
            self.trap
        )
    }
}

/// A fatal halt: the reason plus the register dump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("processor halted! {reason}: {dump}")]
pub struct FatalError {
    pub reason: FatalReason,
    pub dump: RegisterDump,
}
