//! Event loop.
//!
//! # State Machine
//! ```text
//! Idle ──poll ready──▶ Dispatching ──events drained──▶ Idle
//!   │
//!   └── shutdown flag / top-level error ──▶ Stopped
//! ```
//!
//! # Handlers (handlers.rs)
//! - Accept: listener readable → policy picks backend → table opens the pair
//! - Read, client side: cache hit answers directly; miss forwards and records pending
//! - Read, upstream side: pending request + reply populate the cache; reply goes to client
//! - Write: flush bytes a socket did not take earlier; the first write
//!   readiness of an upstream confirms its connect
//!
//! # Design Decisions
//! - One thread owns every socket, the policy and the cache; nothing is locked
//! - Readiness is edge-triggered, so reads and accepts drain until `WouldBlock`
//! - Each `read` chunk is one request or response; there is no framing
//! - Failures on one pair tear that pair down and never stop the loop
//! - A socket is not read while either side of its pair has more than
//!   `max_backlog` unsent bytes; flushing below the limit resumes it
//! - The poll timeout bounds how long a stop request can go unnoticed

mod handlers;

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use mio::{Events, Poll, Token};
use thiserror::Error;

use crate::cache::ResponseCache;
use crate::config::ReactorConfig;
use crate::lifecycle::Shutdown;
use crate::load_balancer::{Feedback, LoadBalancer, Policy};
use crate::net::{ConnectionTable, Listener, LISTENER};
use crate::net::listener::ListenerError;

/// Errors that stop the loop.
#[derive(Debug, Error)]
pub enum ReactorError {
    /// The poller itself failed.
    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),

    /// The listener could not be armed.
    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorState {
    Idle,
    Dispatching,
    Stopped,
}

/// Readiness of one token, copied out of the event buffer.
#[derive(Debug, Clone, Copy)]
struct Ready {
    token: Token,
    readable: bool,
    writable: bool,
    closed: bool,
}

/// Single-threaded readiness multiplexer driving the whole balancer.
pub struct Reactor {
    poll: Poll,
    events: Events,
    ready: Vec<Ready>,
    listener: Listener,
    table: ConnectionTable,
    policy: Policy,
    cache: ResponseCache,
    shutdown: Shutdown,
    poll_timeout: Duration,
    read_buf: Vec<u8>,
    max_backlog: usize,
    state: ReactorState,
}

impl Reactor {
    /// Take ownership of the listener and arm it.
    pub fn new(
        mut listener: Listener,
        policy: Policy,
        cache: ResponseCache,
        config: &ReactorConfig,
        shutdown: Shutdown,
    ) -> Result<Self, ReactorError> {
        let poll = Poll::new().map_err(ReactorError::Poll)?;
        listener.register(poll.registry())?;

        Ok(Self {
            poll,
            events: Events::with_capacity(config.events_capacity.max(1)),
            ready: Vec::with_capacity(config.events_capacity.max(1)),
            listener,
            table: ConnectionTable::new(),
            policy,
            cache,
            shutdown,
            poll_timeout: Duration::from_millis(config.poll_timeout_ms.max(1)),
            read_buf: vec![0; config.read_buffer_size.max(1)],
            max_backlog: config.max_backlog.max(1),
            state: ReactorState::Idle,
        })
    }

    /// Run until shutdown is requested or the loop fails.
    ///
    /// Every remaining pair is torn down before returning, on either path.
    pub fn run(&mut self) -> Result<(), ReactorError> {
        tracing::info!(
            address = ?self.local_addr().ok(),
            policy = self.policy.name(),
            cache_capacity = self.cache.capacity(),
            "Reactor running"
        );

        let result = loop {
            if self.shutdown.is_triggered() {
                tracing::debug!("Shutdown flag observed");
                break Ok(());
            }
            if let Err(e) = self.turn() {
                tracing::error!(error = %e, "Reactor failed");
                break Err(e);
            }
        };

        self.stop();
        result
    }

    /// One Idle → Dispatching → Idle cycle.
    ///
    /// Waits at most the poll timeout, then handles every ready socket.
    pub fn turn(&mut self) -> Result<(), ReactorError> {
        if self.state == ReactorState::Stopped {
            return Ok(());
        }

        self.state = ReactorState::Idle;
        match self.poll.poll(&mut self.events, Some(self.poll_timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(ReactorError::Poll(e)),
        }

        self.state = ReactorState::Dispatching;
        let mut ready = std::mem::take(&mut self.ready);
        ready.clear();
        ready.extend(self.events.iter().map(|event| Ready {
            token: event.token(),
            readable: event.is_readable(),
            writable: event.is_writable(),
            closed: event.is_error() || event.is_read_closed() || event.is_write_closed(),
        }));

        for event in &ready {
            match event.token {
                LISTENER => self.accept(),
                _ => self.dispatch(*event),
            }
        }

        self.ready = ready;
        self.state = ReactorState::Idle;
        Ok(())
    }

    /// Tear everything down and enter `Stopped`.
    pub fn stop(&mut self) {
        if self.state == ReactorState::Stopped {
            return;
        }

        let closed = self.table.teardown_all(self.poll.registry());
        for pair in &closed {
            self.notify(pair.backend, Feedback::Closed);
        }
        if let Err(e) = self.listener.deregister(self.poll.registry()) {
            tracing::debug!(error = %e, "Listener deregister failed");
        }

        self.state = ReactorState::Stopped;
        let stats = self.cache.stats();
        tracing::info!(
            closed_pairs = closed.len(),
            cache_hits = stats.hits,
            cache_misses = stats.misses,
            "Balancer stopped"
        );
    }

    fn notify(&mut self, backend: crate::load_balancer::Backend, feedback: Feedback) {
        if let Err(e) = self.policy.update(Some(&backend), feedback) {
            tracing::warn!(backend = %backend, error = %e, "Policy update rejected");
        }
        crate::observability::metrics::record_backend_loads(&self.policy.loads());
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> ReactorState {
        self.state
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.table
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("state", &self.state)
            .field("pairs", &self.table.len())
            .field("policy", &self.policy.name())
            .field("cache", &self.cache.stats())
            .finish()
    }
}
