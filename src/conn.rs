//! Connected stream endpoints and listeners on top of the in-memory queues.
//!
//! ```text
//!      Endpoint A                      Endpoint B
//!  ┌───────────────┐   ByteQueue   ┌───────────────┐
//!  │  wr ──────────┼──────────────►│ rd            │
//!  │               │               │               │
//!  │  rd ◄─────────┼───────────────┼── wr          │
//!  └───────────────┘   ByteQueue   └───────────────┘
//! ```
//!
//! Each direction is one [`ByteQueue`]. Closing the write half of one side
//! lets the peer drain what is buffered and then read end-of-stream.
//!
//! # Example
//!
//! ```no_run
//! use sockq::addr::SockAddr;
//! use sockq::conn::Listener;
//! use sockq::queue::{Deadline, QueueConfig};
//!
//! let listener = Listener::bind(SockAddr::inet4([127, 0, 0, 1], 80), QueueConfig::byte_stream())?;
//! let client = listener.connect(SockAddr::inet4([127, 0, 0, 1], 50_000), Deadline::NONE)?;
//! let server = listener.accept()?;
//!
//! client.write(b"ping")?;
//! let mut buf = [0u8; 4];
//! server.read(&mut buf)?;
//! # Ok::<(), sockq::Error>(())
//! ```

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::addr::SockAddr;
use crate::error::{Error, Result};
use crate::queue::{ByteQueue, Deadline, MessageQueue, QueueConfig, DEFAULT_MESSAGE_CAPACITY};

/// One side of an emulated stream connection.
#[derive(Debug)]
pub struct Endpoint {
    rd: ByteQueue,
    wr: ByteQueue,
    read_deadline: AtomicU64,
    write_deadline: AtomicU64,
    local: SockAddr,
    peer: SockAddr,
}

/// Builds two connected endpoints, one per address.
pub fn pipe(a: SockAddr, b: SockAddr, config: &QueueConfig) -> Result<(Endpoint, Endpoint)> {
    let a_to_b = ByteQueue::with_config(config.clone())?;
    let b_to_a = ByteQueue::with_config(config.clone())?;
    let left = Endpoint::new(b_to_a.clone(), a_to_b.clone(), a.copy(), b.copy());
    let right = Endpoint::new(a_to_b, b_to_a, b, a);
    Ok((left, right))
}

impl Endpoint {
    fn new(rd: ByteQueue, wr: ByteQueue, local: SockAddr, peer: SockAddr) -> Self {
        Self {
            rd,
            wr,
            read_deadline: AtomicU64::new(0),
            write_deadline: AtomicU64::new(0),
            local,
            peer,
        }
    }

    /// Reads what is buffered, honouring the read deadline. `Ok(0)` means the
    /// peer closed its write half and everything was drained.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.rd.read_with(buf, || self.read_deadline())
    }

    /// Writes all of `buf` unless the write deadline passes first, in which
    /// case [`Error::transferred`] tells how much went out.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        if self.wr.is_closed() {
            return Err(Error::Closed);
        }
        self.wr.write_with(buf, || self.write_deadline())
    }

    pub fn set_deadline(&self, deadline: Deadline) {
        self.set_read_deadline(deadline);
        self.set_write_deadline(deadline);
    }

    /// Applies to later reads and to a read blocked right now. A deadline in
    /// the past fails the blocked read at once.
    pub fn set_read_deadline(&self, deadline: Deadline) {
        self.read_deadline.store(deadline.as_nanos(), Ordering::Release);
        self.rd.reset_read_deadline(deadline);
    }

    /// Applies to later writes and to the rest of a write blocked right now.
    pub fn set_write_deadline(&self, deadline: Deadline) {
        self.write_deadline.store(deadline.as_nanos(), Ordering::Release);
        self.wr.reset_write_deadline(deadline);
    }

    /// Sets both deadlines `timeout` from now.
    pub fn set_timeout(&self, timeout: Duration) {
        let clock = self.rd.timekeeper().clock();
        self.set_deadline(Deadline::after(&**clock, timeout));
    }

    pub fn read_deadline(&self) -> Deadline {
        Deadline::at(self.read_deadline.load(Ordering::Acquire))
    }

    pub fn write_deadline(&self) -> Deadline {
        Deadline::at(self.write_deadline.load(Ordering::Acquire))
    }

    /// Stops reading: blocked reads return, and the peer's writes fail once
    /// started.
    pub fn close_read(&self) {
        self.rd.close();
    }

    /// Signals end-of-stream to the peer after the buffered bytes.
    pub fn close_write(&self) {
        self.wr.close();
    }

    pub fn close(&self) {
        self.close_read();
        self.close_write();
    }

    pub fn local_addr(&self) -> &SockAddr {
        &self.local
    }

    pub fn peer_addr(&self) -> &SockAddr {
        &self.peer
    }
}

impl io::Read for &Endpoint {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        Endpoint::read(*self, buf).map_err(io::Error::from)
    }
}

impl io::Write for &Endpoint {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match Endpoint::write(*self, buf) {
            Ok(n) => Ok(n),
            Err(err) if err.transferred() > 0 => Ok(err.transferred()),
            Err(err) => Err(err.into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for Endpoint {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut &*self, buf)
    }
}

impl io::Write for Endpoint {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Accepts emulated connections through a bounded backlog of pending
/// server-side endpoints.
#[derive(Debug)]
pub struct Listener {
    addr: SockAddr,
    backlog: MessageQueue<Endpoint>,
    deadline: AtomicU64,
    config: QueueConfig,
}

impl Listener {
    /// `config` sizes the byte queues of every accepted connection; the
    /// backlog holds [`DEFAULT_MESSAGE_CAPACITY`] pending connections.
    pub fn bind(addr: SockAddr, config: QueueConfig) -> Result<Self> {
        let backlog =
            MessageQueue::with_timekeeper(DEFAULT_MESSAGE_CAPACITY, config.timekeeper.clone())?;
        log::debug!("listening on {addr}");
        Ok(Self {
            addr,
            backlog,
            deadline: AtomicU64::new(0),
            config,
        })
    }

    /// Dials this listener from `from`. Blocks while the backlog is full, up to
    /// `deadline`.
    pub fn connect(&self, from: SockAddr, deadline: Deadline) -> Result<Endpoint> {
        if self.backlog.is_closed() {
            return Err(Error::Closed);
        }
        let (client, server) = pipe(from, self.addr.copy(), &self.config)?;
        match self.backlog.send(server, deadline) {
            Ok(()) => Ok(client),
            Err(err) => {
                err.message.close();
                client.close();
                Err(err.error)
            }
        }
    }

    /// Next pending connection, honouring the listener deadline.
    pub fn accept(&self) -> Result<Endpoint> {
        let mut pending = Vec::with_capacity(1);
        self.backlog.read_with(&mut pending, 1, || self.deadline())?;
        pending.pop().ok_or(Error::Closed)
    }

    /// Also moves the deadline of an `accept` blocked right now.
    pub fn set_deadline(&self, deadline: Deadline) {
        self.deadline.store(deadline.as_nanos(), Ordering::Release);
        self.backlog.reset_read_deadline(deadline);
    }

    pub fn deadline(&self) -> Deadline {
        Deadline::at(self.deadline.load(Ordering::Acquire))
    }

    pub fn local_addr(&self) -> &SockAddr {
        &self.addr
    }

    /// Refuses new connections and closes every one still waiting in the
    /// backlog.
    pub fn close(&self) {
        self.backlog.close();
        while let Ok(Some(pending)) = self.backlog.recv(Deadline::NONE) {
            log::debug!("dropping unaccepted connection from {}", pending.peer_addr());
            pending.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::Timekeeper;
    use std::io::{Read, Write};

    fn config() -> QueueConfig {
        let (timekeeper, _) = Timekeeper::manual(1);
        QueueConfig::byte_stream().with_capacity(16).with_timekeeper(timekeeper)
    }

    fn addr(port: u16) -> SockAddr {
        SockAddr::inet4([127, 0, 0, 1], port)
    }

    #[test]
    fn pipe_carries_bytes_both_ways() {
        let (a, b) = pipe(addr(1), addr(2), &config()).unwrap();
        a.write(b"ping").unwrap();
        b.write(b"pong").unwrap();

        let mut buf = [0u8; 8];
        let n = b.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
        let n = a.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"pong");
        assert_eq!(a.peer_addr(), b.local_addr());
    }

    #[test]
    fn close_write_reaches_peer_as_eof() {
        let (mut a, mut b) = pipe(addr(1), addr(2), &config()).unwrap();
        a.write_all(b"bye").unwrap();
        a.close_write();

        let mut out = Vec::new();
        b.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"bye");
    }

    #[test]
    fn write_after_peer_close_read_fails() {
        let (a, b) = pipe(addr(1), addr(2), &config()).unwrap();
        b.close_read();
        assert!(matches!(a.write(b"x"), Err(Error::Closed)));
    }

    #[test]
    fn past_read_deadline_is_would_block() {
        let (timekeeper, timers) = Timekeeper::manual(100);
        let config = QueueConfig::byte_stream().with_timekeeper(timekeeper);
        let (mut a, _b) = pipe(addr(1), addr(2), &config).unwrap();
        a.set_read_deadline(Deadline::at(50));
        let err = Read::read(&mut a, &mut [0u8; 4]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert_eq!(timers.pending(), 0);
    }

    #[test]
    fn empty_io_read_does_not_wait() {
        let (mut a, _b) = pipe(addr(1), addr(2), &config()).unwrap();
        assert_eq!(Read::read(&mut a, &mut []).unwrap(), 0);
    }

    #[test]
    fn new_read_deadline_reaches_blocked_read() {
        let (timekeeper, timers) = Timekeeper::manual(100);
        let config = QueueConfig::byte_stream().with_timekeeper(timekeeper);
        let (a, _b) = pipe(addr(1), addr(2), &config).unwrap();
        std::thread::scope(|s| {
            let reader = s.spawn(|| a.read(&mut [0u8; 4]));
            while a.rd.blocked_readers() == 0 {
                std::thread::yield_now();
            }
            a.set_read_deadline(Deadline::at(300));
            assert_eq!(timers.pending(), 1);
            timers.advance(250);
            assert!(reader.join().unwrap().unwrap_err().is_temporarily_unavailable());
        });
        assert_eq!(a.read_deadline(), Deadline::at(300));
    }

    #[test]
    fn listener_hands_out_connected_pairs() {
        let listener = Listener::bind(addr(80), config()).unwrap();
        let client = listener.connect(addr(5000), Deadline::NONE).unwrap();
        let server = listener.accept().unwrap();
        assert_eq!(server.peer_addr(), &addr(5000));
        assert_eq!(client.peer_addr(), listener.local_addr());

        client.write(b"hi").unwrap();
        let mut buf = [0u8; 2];
        server.read(&mut buf).unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn closed_listener_refuses_and_drains() {
        let listener = Listener::bind(addr(80), config()).unwrap();
        let client = listener.connect(addr(5000), Deadline::NONE).unwrap();
        listener.close();

        assert!(matches!(listener.accept(), Err(Error::Closed)));
        assert!(matches!(listener.connect(addr(5001), Deadline::NONE), Err(Error::Closed)));
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }
}
