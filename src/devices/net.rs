//! Host socket passthrough
//!
//! IPv4/TCP only. Addresses arrive packed into two guest words: the first
//! holds the family in its low half and the port (already in network byte
//! order) in its high half, the second holds the IPv4 address as stored in
//! `sin_addr`. Every call is non-blocking from the guest's point of view:
//! reads and accepts poll first and report -1 when nothing is ready, and
//! writes report -1 when the send buffer is full.

use std::collections::HashSet;
use std::os::unix::io::RawFd;

use tracing::debug;

const AF_INET: u32 = 2;
const SOCK_STREAM: u32 = 1;
const IPPROTO_TCP: u32 = 6;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL | libc::MSG_DONTWAIT;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = libc::MSG_DONTWAIT;

/// Largest transfer a single read or write moves
pub const MAX_TRANSFER: usize = 4096;

/// Sockets opened on behalf of the guest
#[derive(Debug, Default)]
pub struct Sockets {
    owned: HashSet<RawFd>,
}

fn sockaddr(packed: u32, addr: u32) -> libc::sockaddr_in {
    // SAFETY: sockaddr_in is plain data; all-zero is a valid value
    let mut sa: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    sa.sin_family = (packed & 0xffff) as libc::sa_family_t;
    sa.sin_port = (packed >> 16) as u16;
    sa.sin_addr.s_addr = addr;
    sa
}

impl Sockets {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn owns(&self, fd: u32) -> Option<RawFd> {
        let fd = fd as i32;
        self.owned.contains(&fd).then_some(fd)
    }

    /// Number of open descriptors
    pub fn len(&self) -> usize {
        self.owned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owned.is_empty()
    }

    pub fn socket(&mut self, family: u32, ty: u32, protocol: u32) -> i32 {
        if family != AF_INET || ty != SOCK_STREAM || (protocol != 0 && protocol != IPPROTO_TCP) {
            debug!("socket({}, {}, {}) rejected", family, ty, protocol);
            return -1;
        }
        // SAFETY: plain syscall with integer arguments
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        if fd >= 0 {
            self.owned.insert(fd);
        }
        fd
    }

    pub fn close(&mut self, fd: u32) -> i32 {
        match self.owns(fd) {
            Some(fd) => {
                self.owned.remove(&fd);
                // SAFETY: fd is a descriptor this table opened
                unsafe { libc::close(fd) }
            }
            None => -1,
        }
    }

    pub fn connect(&mut self, fd: u32, packed: u32, addr: u32) -> i32 {
        let Some(fd) = self.owns(fd) else { return -1 };
        let sa = sockaddr(packed, addr);
        // SAFETY: sa outlives the call and the length matches its type
        unsafe {
            libc::connect(
                fd,
                &sa as *const libc::sockaddr_in as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        }
    }

    pub fn bind(&mut self, fd: u32, packed: u32, addr: u32) -> i32 {
        let Some(fd) = self.owns(fd) else { return -1 };
        let sa = sockaddr(packed, addr);
        // SAFETY: sa outlives the call and the length matches its type
        unsafe {
            libc::bind(
                fd,
                &sa as *const libc::sockaddr_in as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        }
    }

    pub fn listen(&mut self, fd: u32, backlog: u32) -> i32 {
        let Some(fd) = self.owns(fd) else { return -1 };
        // SAFETY: plain syscall on an owned descriptor
        unsafe { libc::listen(fd, backlog as i32) }
    }

    /// 1 readable, 0 not ready, -1 error
    pub fn poll(&self, fd: u32) -> i32 {
        match self.owns(fd) {
            Some(fd) => poll_readable(fd),
            None => -1,
        }
    }

    /// Accept a pending connection; -1 when none is ready. The peer address
    /// is not reported.
    pub fn accept(&mut self, fd: u32) -> i32 {
        let Some(fd) = self.owns(fd) else { return -1 };
        if poll_readable(fd) != 1 {
            return -1;
        }
        // SAFETY: null address pointers are allowed by accept(2)
        let conn = unsafe { libc::accept(fd, std::ptr::null_mut(), std::ptr::null_mut()) };
        if conn >= 0 {
            self.owned.insert(conn);
        }
        conn
    }

    /// Read into `buf` (at most `MAX_TRANSFER` bytes); -1 when nothing is
    /// ready
    pub fn read(&mut self, fd: u32, buf: &mut [u8]) -> i32 {
        let Some(fd) = self.owns(fd) else { return -1 };
        if poll_readable(fd) != 1 {
            return -1;
        }
        let len = buf.len().min(MAX_TRANSFER);
        // SAFETY: buf is valid for len bytes
        unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, len) as i32 }
    }

    /// Send up to `MAX_TRANSFER` bytes of `buf`; -1 when the peer is not
    /// draining and nothing fits
    pub fn write(&mut self, fd: u32, buf: &[u8]) -> i32 {
        let Some(fd) = self.owns(fd) else { return -1 };
        let len = buf.len().min(MAX_TRANSFER);
        // SAFETY: buf is valid for len bytes
        unsafe { libc::send(fd, buf.as_ptr() as *const libc::c_void, len, SEND_FLAGS) as i32 }
    }
}

fn poll_readable(fd: RawFd) -> i32 {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: pfd is a valid pollfd for the duration of the call
    match unsafe { libc::poll(&mut pfd, 1, 0) } {
        n if n < 0 => -1,
        0 => 0,
        _ => 1,
    }
}

impl Drop for Sockets {
    fn drop(&mut self) {
        for fd in self.owned.drain() {
            // SAFETY: every descriptor in the table was opened here
            unsafe {
                libc::close(fd);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::time::{Duration, Instant};

    fn loopback() -> u32 {
        u32::from_ne_bytes([127, 0, 0, 1])
    }

    fn local_port(fd: i32) -> u16 {
        // SAFETY: sa/len are valid out-parameters for getsockname
        unsafe {
            let mut sa: libc::sockaddr_in = std::mem::zeroed();
            let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
            let rc = libc::getsockname(fd, &mut sa as *mut _ as *mut libc::sockaddr, &mut len);
            assert_eq!(rc, 0);
            u16::from_be(sa.sin_port)
        }
    }

    fn retry<F: FnMut() -> i32>(mut f: F) -> i32 {
        let start = Instant::now();
        loop {
            let r = f();
            if r >= 0 || start.elapsed() > Duration::from_secs(2) {
                return r;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_only_ipv4_tcp_is_accepted() {
        let mut s = Sockets::new();
        assert_eq!(s.socket(10, 1, 0), -1);
        assert_eq!(s.socket(2, 2, 0), -1);
        assert_eq!(s.socket(2, 1, 17), -1);
        let fd = s.socket(2, 1, 0);
        assert!(fd >= 0);
        assert_eq!(s.len(), 1);
        assert_eq!(s.close(fd as u32), 0);
        assert!(s.is_empty());
    }

    #[test]
    fn test_foreign_descriptors_are_refused() {
        let mut s = Sockets::new();
        let mut buf = [0u8; 4];
        assert_eq!(s.read(0, &mut buf), -1);
        assert_eq!(s.write(1, b"x"), -1);
        assert_eq!(s.close(2), -1);
        assert_eq!(s.poll(0), -1);
    }

    #[test]
    fn test_loopback_echo() {
        let mut s = Sockets::new();
        let listener = s.socket(2, 1, 0);
        assert!(listener >= 0);
        let packed = AF_INET | ((0u16.to_be() as u32) << 16);
        assert_eq!(s.bind(listener as u32, packed, loopback()), 0);
        assert_eq!(s.listen(listener as u32, 4), 0);
        let port = local_port(listener);

        // nothing to accept yet
        assert_eq!(s.accept(listener as u32), -1);

        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let conn = retry(|| s.accept(listener as u32));
        assert!(conn >= 0);

        client.write_all(b"ping").unwrap();
        let mut buf = [0u8; 16];
        let n = retry(|| s.read(conn as u32, &mut buf));
        assert_eq!(&buf[..n as usize], b"ping");

        assert_eq!(s.write(conn as u32, b"pong"), 4);
        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"pong");
    }

    #[test]
    fn test_write_to_stalled_peer_does_not_block() {
        let mut s = Sockets::new();
        let listener = s.socket(2, 1, 0);
        let packed = AF_INET | ((0u16.to_be() as u32) << 16);
        assert_eq!(s.bind(listener as u32, packed, loopback()), 0);
        assert_eq!(s.listen(listener as u32, 4), 0);
        let port = local_port(listener);

        // never reads
        let _client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let conn = retry(|| s.accept(listener as u32));
        assert!(conn >= 0);

        let chunk = [0u8; MAX_TRANSFER];
        let start = Instant::now();
        let mut sent = 0usize;
        let full = loop {
            let n = s.write(conn as u32, &chunk);
            if n < 0 {
                break true;
            }
            assert!(n as usize <= MAX_TRANSFER);
            sent += n as usize;
            if sent > 1 << 30 {
                break false;
            }
        };
        assert!(full, "send buffer never filled after {} bytes", sent);
        assert!(sent > 0);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_write_is_bounded_per_call() {
        let mut s = Sockets::new();
        let listener = s.socket(2, 1, 0);
        let packed = AF_INET | ((0u16.to_be() as u32) << 16);
        assert_eq!(s.bind(listener as u32, packed, loopback()), 0);
        assert_eq!(s.listen(listener as u32, 4), 0);
        let port = local_port(listener);

        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let conn = retry(|| s.accept(listener as u32));
        let big = vec![7u8; 3 * MAX_TRANSFER];
        let n = s.write(conn as u32, &big);
        assert!(n > 0 && n as usize <= MAX_TRANSFER);

        let mut got = vec![0u8; n as usize];
        client.read_exact(&mut got).unwrap();
        assert!(got.iter().all(|&b| b == 7));
    }
}
