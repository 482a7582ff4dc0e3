//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream server by its resolved address
//! - Give every backend a stable index within the configured set
//! - Carry per-backend load snapshots out of the policies

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// Index of a backend within the configured set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendId(pub usize);

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "backend-{}", self.0)
    }
}

/// A single backend server.
///
/// The backend set is fixed once the balancer starts, so a backend is a plain
/// value: cheap to copy, compared by id and address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Backend {
    /// Position in the configured list.
    pub id: BackendId,
    /// The address of the backend.
    pub addr: SocketAddr,
}

impl Backend {
    /// Create a new backend.
    pub fn new(id: usize, addr: SocketAddr) -> Self {
        Self {
            id: BackendId(id),
            addr,
        }
    }

    /// Build the backend set from already resolved addresses.
    pub fn from_addrs<I>(addrs: I) -> Vec<Backend>
    where
        I: IntoIterator<Item = SocketAddr>,
    {
        addrs
            .into_iter()
            .enumerate()
            .map(|(id, addr)| Backend::new(id, addr))
            .collect()
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

/// Resolve a `host:port` string to the first address it maps to.
///
/// IPv4 results are preferred so that `localhost` lands on the loopback
/// address most test backends bind to.
pub fn resolve(address: &str) -> std::io::Result<SocketAddr> {
    let addrs: Vec<SocketAddr> = address.to_socket_addrs()?.collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no address found for {}", address),
            )
        })
}

/// Load snapshot for one backend, as reported by a policy.
///
/// Policies only fill in what they track.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendLoad {
    pub backend: Backend,
    pub active_connections: Option<usize>,
    pub average_response: Option<Duration>,
    pub samples: usize,
}

impl BackendLoad {
    pub fn untracked(backend: Backend) -> Self {
        Self {
            backend,
            active_connections: None,
            average_response: None,
            samples: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_addrs_assigns_indices_in_order() {
        let backends = Backend::from_addrs(vec![
            "127.0.0.1:9001".parse().unwrap(),
            "127.0.0.1:9002".parse().unwrap(),
        ]);
        assert_eq!(backends[0].id, BackendId(0));
        assert_eq!(backends[1].id, BackendId(1));
        assert_eq!(backends[1].addr.port(), 9002);
    }

    #[test]
    fn resolve_localhost_prefers_ipv4() {
        let addr = resolve("localhost:8080").unwrap();
        assert_eq!(addr.port(), 8080);
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn resolve_rejects_garbage() {
        assert!(resolve("not an address").is_err());
    }
}
