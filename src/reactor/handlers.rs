//! Accept, read and write handlers.

use std::io;

use mio::Token;

use super::{Reactor, Ready};
use crate::load_balancer::{Feedback, LoadBalancer};
use crate::net::Side;
use crate::observability::metrics;

impl Reactor {
    /// Accept every waiting client and pair it with a backend.
    pub(super) fn accept(&mut self) {
        loop {
            let (stream, addr) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    break;
                }
            };

            tracing::debug!(client = %addr, "Accepted connection");

            if self.table.len() >= self.listener.max_connections() {
                tracing::warn!(
                    client = %addr,
                    max_connections = self.listener.max_connections(),
                    "Connection limit reached, dropping client"
                );
                continue;
            }

            if let Err(e) = stream.set_nodelay(true) {
                tracing::trace!(client = %addr, error = %e, "set_nodelay failed");
            }

            let backend = self.policy.select_server();
            if let Err(e) = self.table.register(self.poll.registry(), stream, addr, backend) {
                tracing::warn!(client = %addr, backend = %backend, error = %e, "Dropping client");
                metrics::record_connect_failure(&backend);
                // the slot the policy just counted was never used
                self.notify(backend, Feedback::Closed);
            }
        }
    }

    /// Handle readiness on one pair socket.
    ///
    /// Any I/O error is confined to this pair: it is torn down and the loop
    /// carries on.
    pub(super) fn dispatch(&mut self, event: Ready) {
        let Some(side) = self.table.side_of(event.token) else {
            tracing::trace!(token = event.token.0, "Event for closed socket ignored");
            return;
        };

        let result = self.handle(event, side);
        if let Err(e) = result {
            tracing::warn!(token = event.token.0, side = ?side, error = %e, "Connection error, closing pair");
            if side == Side::Upstream && !self.table.is_connected(event.token) {
                if let Some(backend) = self.table.backend_of(event.token) {
                    metrics::record_connect_failure(&backend);
                }
            }
            self.close_pair(event.token);
        }
    }

    fn handle(&mut self, event: Ready, side: Side) -> io::Result<()> {
        if side == Side::Upstream {
            if let Some(backend) = self.table.confirm_connected(event.token) {
                tracing::debug!(token = event.token.0, backend = %backend, "Upstream connected");
                metrics::record_connection_opened(&backend);
            }
        }
        if event.writable {
            self.table.flush(self.poll.registry(), event.token)?;
            self.resume_after_flush(event.token)?;
        }
        if event.readable || event.closed {
            self.drain(event.token, side)?;
        }
        Ok(())
    }

    /// Whether `token` must not be read: its own or its peer's outbox is full.
    fn over_backlog(&self, token: Token) -> bool {
        let peer = self.table.peer_of(token).map_or(0, |peer| self.table.backlog(peer));
        self.table.backlog(token).max(peer) >= self.max_backlog
    }

    /// Once `token` is below the backlog limit, drain whatever was paused on it.
    ///
    /// Readiness is edge-triggered, so a paused socket gets no new event for
    /// bytes that were already waiting.
    fn resume_after_flush(&mut self, token: Token) -> io::Result<()> {
        if self.table.backlog(token) >= self.max_backlog {
            return Ok(());
        }

        let peer = self.table.peer_of(token);
        for paused in std::iter::once(token).chain(peer) {
            if !self.table.resume(paused) {
                continue;
            }
            let Some(side) = self.table.side_of(paused) else {
                continue;
            };
            tracing::trace!(token = paused.0, "Reads resumed");
            self.drain(paused, side)?;
        }
        Ok(())
    }

    /// Read until the socket is empty; every chunk is one message.
    fn drain(&mut self, token: Token, side: Side) -> io::Result<()> {
        loop {
            if self.over_backlog(token) {
                tracing::trace!(token = token.0, "Reads paused on backlog");
                self.table.pause(token);
                return Ok(());
            }

            let n = match self.table.read(token, &mut self.read_buf) {
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            if n == 0 {
                tracing::debug!(token = token.0, side = ?side, "Peer closed");
                self.close_pair(token);
                return Ok(());
            }

            let data = self.read_buf[..n].to_vec();
            match side {
                Side::Client => self.on_request(token, data)?,
                Side::Upstream => self.on_response(token, data)?,
            }
        }
    }

    /// Bytes from a client: answer from cache or forward upstream.
    fn on_request(&mut self, client: Token, request: Vec<u8>) -> io::Result<()> {
        let Some(upstream) = self.table.peer_of(client) else {
            return Ok(());
        };

        if let Some(response) = self.cache.lookup(&request) {
            tracing::debug!(token = client.0, "Serving response from cache");
            return self.table.send(self.poll.registry(), client, &response);
        }

        self.table.send(self.poll.registry(), upstream, &request)?;
        self.table.record_pending(upstream, request);
        Ok(())
    }

    /// Bytes from a backend: cache them against the pending request and relay.
    fn on_response(&mut self, upstream: Token, response: Vec<u8>) -> io::Result<()> {
        let Some(client) = self.table.peer_of(upstream) else {
            return Ok(());
        };

        match self.table.take_pending(upstream) {
            Some(request) => self.cache.insert(request, response.clone()),
            None => tracing::debug!(token = upstream.0, "Response without pending request, not cached"),
        }

        if let Some(backend) = self.table.backend_of(upstream) {
            self.notify(backend, Feedback::Response);
        }

        self.table.send(self.poll.registry(), client, &response)
    }

    /// Tear down the pair `token` belongs to and tell the policy.
    pub(super) fn close_pair(&mut self, token: Token) {
        if let Some(closed) = self.table.teardown(self.poll.registry(), token) {
            self.notify(closed.backend, Feedback::Closed);
        }
    }
}
