//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that every backend address has the `host:port` shape
//! - Validate value ranges (timeouts > 0, buffers > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure: BalancerConfig → Result<(), Vec<ValidationError>>
//! - Names are resolved once, at startup
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::BalancerConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("at least one backend is required")]
    NoBackends,

    #[error("invalid bind address '{0}'")]
    BindAddress(String),

    #[error("invalid backend address '{address}': {reason}")]
    Backend { address: String, reason: String },

    #[error("listener.max_connections must be greater than zero")]
    MaxConnections,

    #[error("reactor.poll_timeout_ms must be greater than zero")]
    PollTimeout,

    #[error("reactor.read_buffer_size must be greater than zero")]
    ReadBuffer,

    #[error("reactor.events_capacity must be greater than zero")]
    EventsCapacity,

    #[error("reactor.max_backlog must be greater than zero")]
    MaxBacklog,

    #[error("invalid metrics address '{0}'")]
    MetricsAddress(String),
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &BalancerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::MaxConnections);
    }

    if config.backends.is_empty() {
        errors.push(ValidationError::NoBackends);
    }
    for b in &config.backends {
        if let Err(reason) = check_host_port(&b.address) {
            errors.push(ValidationError::Backend {
                address: b.address.clone(),
                reason: reason.to_string(),
            });
        }
    }

    if config.reactor.poll_timeout_ms == 0 {
        errors.push(ValidationError::PollTimeout);
    }
    if config.reactor.read_buffer_size == 0 {
        errors.push(ValidationError::ReadBuffer);
    }
    if config.reactor.events_capacity == 0 {
        errors.push(ValidationError::EventsCapacity);
    }
    if config.reactor.max_backlog == 0 {
        errors.push(ValidationError::MaxBacklog);
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// `host:port` with a non-empty host and a numeric port. Nothing is looked up.
fn check_host_port(address: &str) -> Result<(), &'static str> {
    let (host, port) = address.rsplit_once(':').ok_or("missing port")?;
    if host.is_empty() {
        return Err("missing host");
    }
    port.parse::<u16>().map_err(|_| "port is not a number")?;
    Ok(())
}
