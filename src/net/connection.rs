//! Connection pair state.
//!
//! # Responsibilities
//! - Generate unique pair IDs for tracing
//! - Own the client and upstream streams of one pair
//! - Track bytes a socket has not accepted yet and the write interest they need
//! - Know when an upstream connect has completed

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

use crate::load_balancer::Backend;

/// Global atomic counter for pair IDs.
/// Relaxed ordering is enough: only uniqueness matters.
static PAIR_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a client/upstream pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairId(u64);

impl PairId {
    /// Generate a new unique pair ID.
    pub fn new() -> Self {
        Self(PAIR_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for PairId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PairId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pair-{}", self.0)
    }
}

/// Which half of a pair a socket is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Upstream,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Client => Side::Upstream,
            Side::Upstream => Side::Client,
        }
    }
}

/// One socket of a pair.
#[derive(Debug)]
pub struct Endpoint {
    pub token: Token,
    pub addr: SocketAddr,
    pub(crate) stream: TcpStream,
    outbox: Vec<u8>,
    write_armed: bool,
    connected: bool,
    paused: bool,
}

impl Endpoint {
    /// An accepted, already connected socket registered for reads.
    pub(crate) fn new(token: Token, addr: SocketAddr, stream: TcpStream) -> Self {
        Self {
            token,
            addr,
            stream,
            outbox: Vec::new(),
            write_armed: false,
            connected: true,
            paused: false,
        }
    }

    /// A socket whose connect is in flight, registered for reads and writes
    /// so completion is reported.
    pub(crate) fn connecting(token: Token, addr: SocketAddr, stream: TcpStream) -> Self {
        Self {
            write_armed: true,
            connected: false,
            ..Self::new(token, addr, stream)
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Check whether a pending connect has completed.
    ///
    /// True only on the call that first observes the connection.
    pub(crate) fn confirm_connected(&mut self) -> bool {
        if self.connected {
            return false;
        }
        self.connected = self.stream.peer_addr().is_ok();
        self.connected
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Stop reading from this socket until `resume`.
    pub(crate) fn pause(&mut self) {
        self.paused = true;
    }

    /// Clear the pause flag, returning whether it was set.
    pub(crate) fn resume(&mut self) -> bool {
        std::mem::replace(&mut self.paused, false)
    }

    pub(crate) fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    /// Queue `data` behind anything not yet written and push as much as the
    /// socket takes right now.
    pub(crate) fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.outbox.extend_from_slice(data);
        self.write_buffered()
    }

    /// Write queued bytes until the outbox is empty or the socket is full.
    pub(crate) fn write_buffered(&mut self) -> io::Result<()> {
        while !self.outbox.is_empty() {
            match self.stream.write(&self.outbox) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "peer stopped accepting data"));
                }
                Ok(n) => {
                    self.outbox.drain(..n);
                }
                Err(ref e) if would_block(e) => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Bytes accepted for sending but not yet written.
    pub fn backlog(&self) -> usize {
        self.outbox.len()
    }

    /// Keep write interest armed exactly while there is a backlog.
    pub(crate) fn sync_interest(&mut self, registry: &Registry) -> io::Result<()> {
        let want_write = !self.outbox.is_empty();
        if want_write == self.write_armed {
            return Ok(());
        }

        let interest = if want_write {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        registry.reregister(&mut self.stream, self.token, interest)?;
        self.write_armed = want_write;
        Ok(())
    }
}

/// A client connection and the upstream connection opened for it.
#[derive(Debug)]
pub struct Pair {
    pub id: PairId,
    pub backend: Backend,
    pub client: Endpoint,
    pub upstream: Endpoint,
}

impl Pair {
    pub fn endpoint(&self, side: Side) -> &Endpoint {
        match side {
            Side::Client => &self.client,
            Side::Upstream => &self.upstream,
        }
    }

    pub fn endpoint_mut(&mut self, side: Side) -> &mut Endpoint {
        match side {
            Side::Client => &mut self.client,
            Side::Upstream => &mut self.upstream,
        }
    }
}

/// `WouldBlock`, or a write on an upstream whose connect is still in flight.
pub(crate) fn would_block(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::NotConnected)
}
