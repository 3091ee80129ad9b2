//! Devices module
//!
//! The machine has no memory-mapped devices. Its only I/O surface is the
//! host bridge (console plus host sockets, reached through privileged
//! opcodes) and the interval timer that drives the timer interrupt.

pub mod console;
pub mod net;
mod timer;

pub use console::{BufferConsole, Console, Input, StdConsole};
pub use net::Sockets;
pub use timer::IntervalTimer;

use tracing::{debug, warn};

/// Default console byte that aborts emulation
pub const DEFAULT_ESCAPE: u8 = b'`';

/// What a console poll produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleEvent {
    None,
    /// A byte arrived and is now latched for `BIN`
    Byte(u8),
    /// The escape byte arrived
    Escape,
}

/// Host side of the console and socket opcodes
pub struct HostBridge {
    console: Box<dyn Console>,
    sockets: Sockets,
    /// Last received console byte, consumed by `BIN`
    kbchar: Option<u8>,
    escape: Option<u8>,
}

impl HostBridge {
    pub fn new(console: Box<dyn Console>, escape: Option<u8>) -> Self {
        HostBridge {
            console,
            sockets: Sockets::new(),
            kbchar: None,
            escape,
        }
    }

    /// Poll the console once and latch whatever arrived
    pub fn poll_console(&mut self) -> ConsoleEvent {
        match self.console.poll_byte() {
            Input::Byte(b) if Some(b) == self.escape => ConsoleEvent::Escape,
            Input::Byte(b) => {
                self.kbchar = Some(b);
                ConsoleEvent::Byte(b)
            }
            Input::Empty | Input::Closed => ConsoleEvent::None,
        }
    }

    pub fn console_open(&self) -> bool {
        self.console.is_open()
    }

    /// `BIN`: latched byte or -1, clearing the latch
    pub fn take_char(&mut self) -> i32 {
        let r = self.kbchar.take().map_or(-1, i32::from);
        debug!("bin -> {}", r);
        r
    }

    /// `BOUT`: only descriptor 1 is a console
    pub fn put_char(&mut self, fd: u32, byte: u8) -> i32 {
        if fd != 1 {
            warn!("bad write a={}", fd as i32);
            return -1;
        }
        let r = self.console.write_byte(byte);
        debug!("bout {:#04x} -> {}", byte, r);
        r
    }

    pub fn latched(&self) -> Option<u8> {
        self.kbchar
    }

    pub fn set_latched(&mut self, kbchar: Option<u8>) {
        self.kbchar = kbchar;
    }

    pub fn sockets(&mut self) -> &mut Sockets {
        &mut self.sockets
    }
}
