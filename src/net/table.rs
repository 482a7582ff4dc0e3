//! Client/upstream pairing table.
//!
//! # Responsibilities
//! - Open the upstream link for every accepted client and record the pair
//! - Resolve either half of a pair to the other by token
//! - Keep the pending request awaiting each upstream's reply
//! - Tear pairs down atomically: both sockets leave the poller and close together
//!
//! # Design Decisions
//! - Sockets are addressed by `mio::Token` handles, never by stream identity
//! - Tokens are never reused within a process, so a late event for a closed
//!   pair cannot reach a new one
//! - Teardown is idempotent; the second side's close event finds nothing

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use thiserror::Error;

use crate::load_balancer::Backend;
use crate::net::connection::{Endpoint, Pair, PairId, Side};
use crate::observability::metrics;

/// Errors raised while registering a pair.
#[derive(Debug, Error)]
pub enum TableError {
    /// The upstream connect could not be initiated.
    #[error("failed to connect to backend {backend}: {source}")]
    Connect {
        backend: Backend,
        #[source]
        source: io::Error,
    },

    /// A socket could not be armed with the poller.
    #[error("failed to register socket: {0}")]
    Register(#[source] io::Error),
}

/// What remains of a pair after teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosedPair {
    pub id: PairId,
    pub backend: Backend,
    pub client: Token,
    pub upstream: Token,
    pub client_addr: SocketAddr,
}

/// Owns every live pair and the pending-request records.
#[derive(Debug)]
pub struct ConnectionTable {
    pairs: HashMap<PairId, Pair>,
    tokens: HashMap<Token, (PairId, Side)>,
    pending: HashMap<Token, Vec<u8>>,
    next_token: usize,
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self {
            pairs: HashMap::new(),
            tokens: HashMap::new(),
            pending: HashMap::new(),
            // Token(0) belongs to the listener
            next_token: 1,
        }
    }

    fn allocate(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    /// Open a connection to `backend` for `client` and record the pair.
    ///
    /// Returns the upstream token. On failure nothing is recorded, neither
    /// socket stays registered, and the client stream is closed.
    pub fn register(
        &mut self,
        registry: &Registry,
        mut client: TcpStream,
        client_addr: SocketAddr,
        backend: Backend,
    ) -> Result<Token, TableError> {
        let mut upstream =
            TcpStream::connect(backend.addr).map_err(|source| TableError::Connect { backend, source })?;

        let client_token = self.allocate();
        let upstream_token = self.allocate();

        registry
            .register(&mut client, client_token, Interest::READABLE)
            .map_err(TableError::Register)?;
        if let Err(e) = registry.register(
            &mut upstream,
            upstream_token,
            Interest::READABLE | Interest::WRITABLE,
        ) {
            let _ = registry.deregister(&mut client);
            return Err(TableError::Register(e));
        }

        let id = PairId::new();
        let pair = Pair {
            id,
            backend,
            client: Endpoint::new(client_token, client_addr, client),
            upstream: Endpoint::connecting(upstream_token, backend.addr, upstream),
        };

        self.tokens.insert(client_token, (id, Side::Client));
        self.tokens.insert(upstream_token, (id, Side::Upstream));
        self.pairs.insert(id, pair);

        tracing::debug!(
            pair = %id,
            client = %client_addr,
            backend = %backend,
            "Proxying to backend"
        );
        metrics::record_active_pairs(self.pairs.len());

        Ok(upstream_token)
    }

    /// The other half of the pair `token` belongs to.
    pub fn peer_of(&self, token: Token) -> Option<Token> {
        let (id, side) = self.tokens.get(&token)?;
        self.pairs.get(id).map(|pair| pair.endpoint(side.other()).token)
    }

    /// Which half of its pair `token` is.
    pub fn side_of(&self, token: Token) -> Option<Side> {
        self.tokens.get(&token).map(|(_, side)| *side)
    }

    /// Backend serving the pair `token` belongs to.
    pub fn backend_of(&self, token: Token) -> Option<Backend> {
        let (id, _) = self.tokens.get(&token)?;
        self.pairs.get(id).map(|pair| pair.backend)
    }

    /// Read from the socket behind `token`.
    pub fn read(&mut self, token: Token, buf: &mut [u8]) -> io::Result<usize> {
        self.endpoint_mut(token)
            .ok_or_else(|| unknown_token(token))?
            .read(buf)
    }

    /// Send `data` on the socket behind `token` without blocking.
    ///
    /// Whatever the socket does not take now is kept and written once it
    /// reports write readiness.
    pub fn send(&mut self, registry: &Registry, token: Token, data: &[u8]) -> io::Result<()> {
        let endpoint = self.endpoint_mut(token).ok_or_else(|| unknown_token(token))?;
        endpoint.send(data)?;
        endpoint.sync_interest(registry)
    }

    /// Push out bytes left over from earlier sends.
    pub fn flush(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        let Some(endpoint) = self.endpoint_mut(token) else {
            return Ok(());
        };
        endpoint.write_buffered()?;
        endpoint.sync_interest(registry)
    }

    /// Bytes queued on `token` and not yet written.
    pub fn backlog(&self, token: Token) -> usize {
        self.endpoint(token).map_or(0, Endpoint::backlog)
    }

    /// Report the backend of `upstream` the first time its connect is seen
    /// to have completed.
    pub fn confirm_connected(&mut self, upstream: Token) -> Option<Backend> {
        let (id, side) = self.tokens.get(&upstream).copied()?;
        if side != Side::Upstream {
            return None;
        }
        let pair = self.pairs.get_mut(&id)?;
        pair.upstream.confirm_connected().then_some(pair.backend)
    }

    /// Whether the socket behind `token` has finished connecting.
    pub fn is_connected(&self, token: Token) -> bool {
        self.endpoint(token).is_some_and(Endpoint::is_connected)
    }

    /// Pairs whose upstream connect has completed.
    pub fn established(&self) -> usize {
        self.pairs.values().filter(|p| p.upstream.is_connected()).count()
    }

    /// Stop draining `token` until it is resumed.
    pub fn pause(&mut self, token: Token) {
        if let Some(endpoint) = self.endpoint_mut(token) {
            endpoint.pause();
        }
    }

    /// Lift a pause on `token`; true if it was paused.
    pub fn resume(&mut self, token: Token) -> bool {
        self.endpoint_mut(token).is_some_and(Endpoint::resume)
    }

    pub fn is_paused(&self, token: Token) -> bool {
        self.endpoint(token).is_some_and(Endpoint::is_paused)
    }

    /// Remember `request` as forwarded to `upstream` and awaiting a reply.
    pub fn record_pending(&mut self, upstream: Token, request: Vec<u8>) {
        if self.side_of(upstream) != Some(Side::Upstream) {
            tracing::debug!(token = upstream.0, "Pending request for unpaired socket ignored");
            return;
        }
        self.pending.insert(upstream, request);
    }

    /// Consume the pending request of `upstream`.
    pub fn take_pending(&mut self, upstream: Token) -> Option<Vec<u8>> {
        self.pending.remove(&upstream)
    }

    pub fn has_pending(&self, upstream: Token) -> bool {
        self.pending.contains_key(&upstream)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Deregister and close both halves of the pair `token` belongs to.
    ///
    /// Returns `None` when the pair is already gone.
    pub fn teardown(&mut self, registry: &Registry, token: Token) -> Option<ClosedPair> {
        let (id, _) = self.tokens.get(&token).copied()?;
        let mut pair = self.pairs.remove(&id)?;

        self.tokens.remove(&pair.client.token);
        self.tokens.remove(&pair.upstream.token);
        self.pending.remove(&pair.upstream.token);

        for endpoint in [&mut pair.client, &mut pair.upstream] {
            if let Err(e) = registry.deregister(&mut endpoint.stream) {
                tracing::debug!(pair = %id, token = endpoint.token.0, error = %e, "Deregister failed");
            }
        }

        let closed = ClosedPair {
            id,
            backend: pair.backend,
            client: pair.client.token,
            upstream: pair.upstream.token,
            client_addr: pair.client.addr,
        };
        // dropping the pair closes both streams
        drop(pair);

        tracing::debug!(pair = %id, backend = %closed.backend, "Pair closed");
        metrics::record_active_pairs(self.pairs.len());
        Some(closed)
    }

    /// Tear down every pair.
    pub fn teardown_all(&mut self, registry: &Registry) -> Vec<ClosedPair> {
        let tokens: Vec<Token> = self.pairs.values().map(|p| p.client.token).collect();
        tokens
            .into_iter()
            .filter_map(|token| self.teardown(registry, token))
            .collect()
    }

    /// Number of live pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Number of sockets registered through this table.
    pub fn registered(&self) -> usize {
        self.tokens.len()
    }

    fn endpoint(&self, token: Token) -> Option<&Endpoint> {
        let (id, side) = self.tokens.get(&token)?;
        self.pairs.get(id).map(|pair| pair.endpoint(*side))
    }

    fn endpoint_mut(&mut self, token: Token) -> Option<&mut Endpoint> {
        let (id, side) = self.tokens.get(&token).copied()?;
        self.pairs.get_mut(&id).map(|pair| pair.endpoint_mut(side))
    }
}

fn unknown_token(token: Token) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no socket for token {}", token.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::Poll;
    use std::io::Read;
    use std::time::Duration;

    struct Fixture {
        poll: Poll,
        table: ConnectionTable,
        backend_listener: std::net::TcpListener,
        front: std::net::TcpListener,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                poll: Poll::new().unwrap(),
                table: ConnectionTable::new(),
                backend_listener: std::net::TcpListener::bind("127.0.0.1:0").unwrap(),
                front: std::net::TcpListener::bind("127.0.0.1:0").unwrap(),
            }
        }

        fn backend(&self) -> Backend {
            Backend::new(0, self.backend_listener.local_addr().unwrap())
        }

        /// Connect a client to the front listener and hand the accepted side to the table.
        fn pair(&mut self) -> (std::net::TcpStream, std::net::TcpStream, Token) {
            let client = std::net::TcpStream::connect(self.front.local_addr().unwrap()).unwrap();
            let (accepted, addr) = self.front.accept().unwrap();
            accepted.set_nonblocking(true).unwrap();

            let upstream = self
                .table
                .register(self.poll.registry(), TcpStream::from_std(accepted), addr, self.backend())
                .unwrap();
            let (served, _) = self.backend_listener.accept().unwrap();
            served.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            (client, served, upstream)
        }
    }

    #[test]
    fn register_pairs_both_sides() {
        let mut fx = Fixture::new();
        assert_eq!(fx.table.registered(), 0);

        let (_client, _served, upstream) = fx.pair();
        assert_eq!(fx.table.len(), 1);
        assert_eq!(fx.table.registered(), 2);

        let client_token = fx.table.peer_of(upstream).unwrap();
        assert_eq!(fx.table.peer_of(client_token), Some(upstream));
        assert_eq!(fx.table.side_of(client_token), Some(Side::Client));
        assert_eq!(fx.table.side_of(upstream), Some(Side::Upstream));
        assert_eq!(fx.table.backend_of(client_token), Some(fx.backend()));
        assert_ne!(client_token, crate::net::listener::LISTENER);
    }

    #[test]
    fn teardown_is_atomic_and_idempotent() {
        let mut fx = Fixture::new();
        let (_client, _served, upstream) = fx.pair();
        let client_token = fx.table.peer_of(upstream).unwrap();
        fx.table.record_pending(upstream, b"GET /x".to_vec());

        let closed = fx.table.teardown(fx.poll.registry(), client_token).unwrap();
        assert_eq!(closed.upstream, upstream);
        assert_eq!(closed.backend, fx.backend());

        assert_eq!(fx.table.len(), 0);
        assert_eq!(fx.table.registered(), 0);
        assert_eq!(fx.table.pending_len(), 0);
        assert_eq!(fx.table.peer_of(upstream), None);
        assert_eq!(fx.table.peer_of(client_token), None);

        // the other side's close event finds nothing
        assert!(fx.table.teardown(fx.poll.registry(), upstream).is_none());
        assert!(fx.table.teardown(fx.poll.registry(), client_token).is_none());
    }

    #[test]
    fn teardown_closes_both_sockets() {
        let mut fx = Fixture::new();
        let (mut client, mut served, upstream) = fx.pair();
        fx.table.teardown(fx.poll.registry(), upstream).unwrap();

        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
        assert_eq!(served.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn pending_is_consumed_once() {
        let mut fx = Fixture::new();
        let (_client, _served, upstream) = fx.pair();
        let client_token = fx.table.peer_of(upstream).unwrap();

        assert!(!fx.table.has_pending(upstream));
        fx.table.record_pending(upstream, b"one".to_vec());
        fx.table.record_pending(upstream, b"two".to_vec());
        assert_eq!(fx.table.take_pending(upstream), Some(b"two".to_vec()));
        assert_eq!(fx.table.take_pending(upstream), None);

        // client tokens never carry pending requests
        fx.table.record_pending(client_token, b"nope".to_vec());
        assert_eq!(fx.table.pending_len(), 0);
    }

    #[test]
    fn send_reaches_backend() {
        let mut fx = Fixture::new();
        let (_client, mut served, upstream) = fx.pair();

        // the connect may still be in flight; the bytes wait in the outbox then
        fx.table.send(fx.poll.registry(), upstream, b"ping").unwrap();
        let mut events = mio::Events::with_capacity(8);
        for _ in 0..50 {
            if fx.table.backlog(upstream) == 0 {
                break;
            }
            fx.poll.poll(&mut events, Some(Duration::from_millis(20))).unwrap();
            fx.table.flush(fx.poll.registry(), upstream).unwrap();
        }

        let mut buf = [0u8; 4];
        served.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn upstream_connect_is_confirmed_once() {
        let mut fx = Fixture::new();
        let (_client, _served, upstream) = fx.pair();
        let client_token = fx.table.peer_of(upstream).unwrap();
        assert_eq!(fx.table.established(), 0);

        // accepted clients are connected from the start and never reported
        assert!(fx.table.is_connected(client_token));
        assert_eq!(fx.table.confirm_connected(client_token), None);

        assert_eq!(fx.table.confirm_connected(upstream), Some(fx.backend()));
        assert_eq!(fx.table.confirm_connected(upstream), None);
        assert!(fx.table.is_connected(upstream));
        assert_eq!(fx.table.established(), 1);
    }

    #[test]
    fn pause_is_cleared_by_resume_and_teardown() {
        let mut fx = Fixture::new();
        let (_client, _served, upstream) = fx.pair();
        assert!(!fx.table.resume(upstream));

        fx.table.pause(upstream);
        assert!(fx.table.is_paused(upstream));
        assert!(fx.table.resume(upstream));
        assert!(!fx.table.is_paused(upstream));

        fx.table.pause(upstream);
        fx.table.teardown(fx.poll.registry(), upstream).unwrap();
        assert!(!fx.table.is_paused(upstream));
        assert!(!fx.table.resume(upstream));
    }

    #[test]
    fn connect_failure_records_nothing() {
        let mut fx = Fixture::new();
        let client = std::net::TcpStream::connect(fx.front.local_addr().unwrap()).unwrap();
        let (accepted, addr) = fx.front.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();

        // the broadcast address is refused at connect time
        let bogus = Backend::new(0, "255.255.255.255:9".parse().unwrap());
        let result = fx
            .table
            .register(fx.poll.registry(), TcpStream::from_std(accepted), addr, bogus);

        if let Err(e) = result {
            assert!(matches!(e, TableError::Connect { .. }));
            assert_eq!(fx.table.len(), 0);
            assert_eq!(fx.table.registered(), 0);
        }
        drop(client);
    }

    #[test]
    fn unknown_tokens_are_harmless() {
        let mut fx = Fixture::new();
        let ghost = Token(4242);
        assert_eq!(fx.table.peer_of(ghost), None);
        assert!(fx.table.teardown(fx.poll.registry(), ghost).is_none());
        assert!(fx.table.flush(fx.poll.registry(), ghost).is_ok());
        assert!(fx.table.send(fx.poll.registry(), ghost, b"x").is_err());
        let mut buf = [0u8; 1];
        assert!(fx.table.read(ghost, &mut buf).is_err());
    }
}
