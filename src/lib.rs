//! em32 emulator
//!
//! A CPU and MMU emulator for a small 32-bit stack-oriented instruction set:
//! two-level paging behind a soft TLB, restartable block instructions,
//! kernel/user privilege with a single interrupt vector, and a host bridge
//! for console and socket I/O.

pub mod config;
pub mod cpu;
pub mod devices;
pub mod error;
pub mod image;
pub mod memory;
pub mod snapshot;
mod system;

pub use config::EmulatorConfig;
pub use error::{FatalError, FatalReason, LoadError};
pub use system::{RunExit, Stats, System};
