//! TCP listener implementation with a connection cap.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Register with the reactor under the reserved listener token
//! - Accept incoming TCP connections without blocking
//! - Report the configured pair limit to the accept handler

use std::net::SocketAddr;

use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};

use crate::config::ListenerConfig;

/// Token reserved for the listening socket.
pub const LISTENER: Token = Token(0);

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind(std::io::Error),
    /// Failed to register with the poller.
    Register(std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
            ListenerError::Register(e) => write!(f, "Failed to register listener: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenerError::Bind(e) | ListenerError::Register(e) => Some(e),
        }
    }
}

/// A non-blocking TCP listener that caps concurrent pairs.
///
/// The cap is enforced by the accept handler: clients accepted while the
/// table is full are closed immediately.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    max_connections: usize,
}

impl Listener {
    /// Bind to the configured address.
    pub fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
            ListenerError::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;

        let inner = TcpListener::bind(addr).map_err(ListenerError::Bind)?;
        let local_addr = inner.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %local_addr,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner,
            max_connections: config.max_connections,
        })
    }

    /// Arm the listener for accept readiness.
    pub fn register(&mut self, registry: &Registry) -> Result<(), ListenerError> {
        registry
            .register(&mut self.inner, LISTENER, Interest::READABLE)
            .map_err(ListenerError::Register)
    }

    /// Remove the listener from the poller.
    pub fn deregister(&mut self, registry: &Registry) -> std::io::Result<()> {
        registry.deregister(&mut self.inner)
    }

    /// Accept one pending connection; `WouldBlock` when the backlog is empty.
    pub fn accept(&self) -> std::io::Result<(TcpStream, SocketAddr)> {
        self.inner.accept()
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Get configured maximum pairs.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_ephemeral_port() {
        let config = ListenerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            max_connections: 3,
        };
        let listener = Listener::bind(&config).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
        assert_eq!(listener.max_connections(), 3);

        // nothing is waiting yet
        let err = listener.accept().unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
    }

    #[test]
    fn rejects_unparsable_address() {
        let config = ListenerConfig {
            bind_address: "nowhere".to_string(),
            max_connections: 1,
        };
        assert!(matches!(Listener::bind(&config), Err(ListenerError::Bind(_))));
    }
}
