//! Console byte stream
//!
//! Single-byte, unbuffered, non-blocking input and byte-at-a-time output.
//! `StdConsole` talks to the host's stdin/stdout; `BufferConsole` keeps both
//! directions in memory for tests and embedding.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Result of polling for input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// Nothing available right now
    Empty,
    Byte(u8),
    /// Input is closed and will never produce another byte
    Closed,
}

pub trait Console {
    /// Read one byte without blocking
    fn poll_byte(&mut self) -> Input;

    /// Write one byte. Returns the number of bytes written or a negative
    /// host error.
    fn write_byte(&mut self, byte: u8) -> i32;

    /// Whether input may still produce a byte
    fn is_open(&self) -> bool;
}

/// Host stdin/stdout
pub struct StdConsole {
    open: bool,
}

impl StdConsole {
    pub fn new() -> Self {
        StdConsole { open: true }
    }
}

impl Default for StdConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl Console for StdConsole {
    fn poll_byte(&mut self) -> Input {
        if !self.open {
            return Input::Closed;
        }
        let mut pfd = libc::pollfd {
            fd: libc::STDIN_FILENO,
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: pfd is a valid pollfd for the duration of the call
        if unsafe { libc::poll(&mut pfd, 1, 0) } != 1 {
            return Input::Empty;
        }
        let mut ch = 0u8;
        // SAFETY: reading one byte into a live stack byte
        let n = unsafe { libc::read(libc::STDIN_FILENO, &mut ch as *mut u8 as *mut libc::c_void, 1) };
        match n {
            1 => Input::Byte(ch),
            0 => {
                self.open = false;
                Input::Closed
            }
            _ => Input::Empty,
        }
    }

    fn write_byte(&mut self, byte: u8) -> i32 {
        // SAFETY: writing one byte from a live stack byte
        unsafe { libc::write(libc::STDOUT_FILENO, &byte as *const u8 as *const libc::c_void, 1) as i32 }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// In-memory console. Output is shared so the caller can keep a handle to
/// it after the console has moved into the machine.
#[derive(Clone, Default)]
pub struct BufferConsole {
    input: Arc<Mutex<VecDeque<u8>>>,
    output: Arc<Mutex<Vec<u8>>>,
    closed: Arc<Mutex<bool>>,
}

impl BufferConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Console whose input holds `bytes` and then reports closed
    pub fn with_input(bytes: &[u8]) -> Self {
        let console = Self::new();
        console.push_input(bytes);
        console.close_input();
        console
    }

    pub fn push_input(&self, bytes: &[u8]) {
        if let Ok(mut input) = self.input.lock() {
            input.extend(bytes.iter().copied());
        }
    }

    pub fn close_input(&self) {
        if let Ok(mut closed) = self.closed.lock() {
            *closed = true;
        }
    }

    /// Everything written so far
    pub fn output(&self) -> Vec<u8> {
        self.output.lock().map(|o| o.clone()).unwrap_or_default()
    }
}

impl Console for BufferConsole {
    fn poll_byte(&mut self) -> Input {
        let next = self.input.lock().ok().and_then(|mut input| input.pop_front());
        match next {
            Some(b) => Input::Byte(b),
            None if !self.is_open() => Input::Closed,
            None => Input::Empty,
        }
    }

    fn write_byte(&mut self, byte: u8) -> i32 {
        match self.output.lock() {
            Ok(mut out) => {
                out.push(byte);
                1
            }
            Err(_) => -1,
        }
    }

    fn is_open(&self) -> bool {
        let closed = self.closed.lock().map(|c| *c).unwrap_or(true);
        let drained = self.input.lock().map(|i| i.is_empty()).unwrap_or(true);
        !(closed && drained)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_console_input_then_closed() {
        let mut console = BufferConsole::with_input(b"hi");
        assert!(console.is_open());
        assert_eq!(console.poll_byte(), Input::Byte(b'h'));
        assert_eq!(console.poll_byte(), Input::Byte(b'i'));
        assert_eq!(console.poll_byte(), Input::Closed);
        assert!(!console.is_open());
    }

    #[test]
    fn test_buffer_console_open_when_empty() {
        let mut console = BufferConsole::new();
        assert_eq!(console.poll_byte(), Input::Empty);
        assert!(console.is_open());
    }

    #[test]
    fn test_output_is_shared() {
        let console = BufferConsole::new();
        let mut moved = console.clone();
        assert_eq!(moved.write_byte(b'x'), 1);
        assert_eq!(console.output(), b"x");
    }
}
