//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! New client accepted
//!     → Policy::select_server (pick one backend of the fixed set)
//!         - fixed_first.rs (all traffic to the first backend)
//!         - round_robin.rs (rotate through backends)
//!         - least_conn.rs (pick backend with fewest active connections)
//!         - least_response_time.rs (pick lowest projected latency)
//!     → connection table opens the upstream link
//!
//! Backend reply observed   → Policy::update(backend, Feedback::Response)
//! Connection pair closed   → Policy::update(backend, Feedback::Closed)
//! ```
//!
//! # Design Decisions
//! - The policy owns all of its counters; nothing else mutates them
//! - Closed set of policies behind one trait, chosen once at startup
//! - The reactor is single-threaded, so policies take `&mut self` and need no atomics

pub mod backend;
pub mod fixed_first;
pub mod least_conn;
pub mod least_response_time;
pub mod round_robin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use backend::{Backend, BackendId, BackendLoad};
pub use fixed_first::FixedFirst;
pub use least_conn::LeastConnections;
pub use least_response_time::{Clock, LeastResponseTime, SystemClock};
pub use round_robin::RoundRobin;

/// What happened on a backend, reported back to the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    /// The backend answered a forwarded request.
    Response,
    /// A connection to the backend finished (pair torn down or accept aborted).
    Closed,
}

/// Errors raised by policies.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    /// A policy cannot be built over an empty backend set.
    #[error("no backends configured")]
    NoBackends,

    /// `update` was called without identifying a backend.
    #[error("missing backend to update")]
    MissingBackend,
}

/// Backend selection strategy.
pub trait LoadBalancer {
    /// Pick the backend for the next new connection.
    fn select_server(&mut self) -> Backend;

    /// Feed back a completed connection or an observed response.
    fn update(&mut self, backend: Option<&Backend>, feedback: Feedback) -> Result<(), PolicyError>;

    /// Per-backend load, in configuration order.
    fn loads(&self) -> Vec<BackendLoad>;

    /// Stable policy name for logs and metrics.
    fn name(&self) -> &'static str;
}

/// Policy names accepted in configuration and on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    #[serde(alias = "N2One")]
    #[value(alias = "N2One")]
    FixedFirst,
    #[default]
    #[serde(alias = "RoundRobin")]
    #[value(alias = "RoundRobin")]
    RoundRobin,
    #[serde(alias = "LeastConnections")]
    #[value(alias = "LeastConnections")]
    LeastConnections,
    #[serde(alias = "LeastResponseTime")]
    #[value(alias = "LeastResponseTime")]
    LeastResponseTime,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::FixedFirst => "fixed-first",
            PolicyKind::RoundRobin => "round-robin",
            PolicyKind::LeastConnections => "least-connections",
            PolicyKind::LeastResponseTime => "least-response-time",
        }
    }
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The configured policy.
#[derive(Debug)]
pub enum Policy {
    FixedFirst(FixedFirst),
    RoundRobin(RoundRobin),
    LeastConnections(LeastConnections),
    LeastResponseTime(LeastResponseTime),
}

impl Policy {
    /// Build the policy named by `kind` over a fixed backend set.
    pub fn new(kind: PolicyKind, backends: Vec<Backend>) -> Result<Self, PolicyError> {
        if backends.is_empty() {
            return Err(PolicyError::NoBackends);
        }

        Ok(match kind {
            PolicyKind::FixedFirst => Policy::FixedFirst(FixedFirst::new(backends)?),
            PolicyKind::RoundRobin => Policy::RoundRobin(RoundRobin::new(backends)?),
            PolicyKind::LeastConnections => {
                Policy::LeastConnections(LeastConnections::new(backends)?)
            }
            PolicyKind::LeastResponseTime => {
                Policy::LeastResponseTime(LeastResponseTime::new(backends)?)
            }
        })
    }

    fn inner(&self) -> &dyn LoadBalancer {
        match self {
            Policy::FixedFirst(p) => p,
            Policy::RoundRobin(p) => p,
            Policy::LeastConnections(p) => p,
            Policy::LeastResponseTime(p) => p,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn LoadBalancer {
        match self {
            Policy::FixedFirst(p) => p,
            Policy::RoundRobin(p) => p,
            Policy::LeastConnections(p) => p,
            Policy::LeastResponseTime(p) => p,
        }
    }
}

impl LoadBalancer for Policy {
    fn select_server(&mut self) -> Backend {
        self.inner_mut().select_server()
    }

    fn update(&mut self, backend: Option<&Backend>, feedback: Feedback) -> Result<(), PolicyError> {
        self.inner_mut().update(backend, feedback)
    }

    fn loads(&self) -> Vec<BackendLoad> {
        self.inner().loads()
    }

    fn name(&self) -> &'static str {
        self.inner().name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backends(n: usize) -> Vec<Backend> {
        (0..n)
            .map(|i| Backend::new(i, format!("127.0.0.1:{}", 9000 + i).parse().unwrap()))
            .collect()
    }

    #[test]
    fn empty_backend_set_is_rejected() {
        for kind in [
            PolicyKind::FixedFirst,
            PolicyKind::RoundRobin,
            PolicyKind::LeastConnections,
            PolicyKind::LeastResponseTime,
        ] {
            assert_eq!(Policy::new(kind, Vec::new()).unwrap_err(), PolicyError::NoBackends);
        }
    }

    #[test]
    fn policy_dispatches_to_variant() {
        let mut policy = Policy::new(PolicyKind::RoundRobin, backends(2)).unwrap();
        assert_eq!(policy.name(), "round-robin");
        assert_eq!(policy.select_server().id, BackendId(0));
        assert_eq!(policy.select_server().id, BackendId(1));

        let mut policy = Policy::new(PolicyKind::FixedFirst, backends(3)).unwrap();
        assert_eq!(policy.name(), "fixed-first");
        for _ in 0..4 {
            assert_eq!(policy.select_server().id, BackendId(0));
        }
    }

    #[test]
    fn policy_kind_accepts_legacy_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: PolicyKind,
        }

        let w: Wrapper = toml::from_str(r#"policy = "N2One""#).unwrap();
        assert_eq!(w.policy, PolicyKind::FixedFirst);
        let w: Wrapper = toml::from_str(r#"policy = "least-response-time""#).unwrap();
        assert_eq!(w.policy, PolicyKind::LeastResponseTime);
    }
}
