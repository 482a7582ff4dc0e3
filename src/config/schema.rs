//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the balancer.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::cache;
use crate::load_balancer::PolicyKind;

/// Root configuration for the load balancer.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct BalancerConfig {
    /// Listener configuration (bind address, pair cap).
    pub listener: ListenerConfig,

    /// Backend servers, in selection order.
    pub backends: Vec<BackendConfig>,

    /// Backend selection policy.
    pub policy: PolicyKind,

    /// Response cache settings.
    pub cache: CacheConfig,

    /// Event loop tuning.
    pub reactor: ReactorConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind_address: String,

    /// Maximum concurrent client/upstream pairs.
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Backend server configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BackendConfig {
    /// Backend address (e.g., "localhost:3000").
    pub address: String,
}

impl BackendConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum cached request/response pairs (0 disables the cache).
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: cache::DEFAULT_CAPACITY,
        }
    }
}

/// Event loop configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ReactorConfig {
    /// Upper bound on one readiness wait, in milliseconds.
    /// Shutdown is noticed within this interval.
    pub poll_timeout_ms: u64,

    /// Bytes read per `read` call; one read is one request or response.
    pub read_buffer_size: usize,

    /// Readiness events drained per poll.
    pub events_capacity: usize,

    /// Unsent bytes a socket may queue before its peer stops being read.
    pub max_backlog: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 1000,
            read_buffer_size: 4096,
            events_capacity: 1024,
            max_backlog: 1024 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "debug".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
