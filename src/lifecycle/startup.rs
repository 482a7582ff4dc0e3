//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate the merged configuration
//! - Resolve the backend set once
//! - Build the policy and the cache
//! - Bind the listener last, then hand everything to the reactor
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The listener binds last so nothing is accepted before the core is ready

use std::net::SocketAddr;

use thiserror::Error;

use crate::cache::{CacheStats, ResponseCache};
use crate::config::validation::validate_config;
use crate::config::{BalancerConfig, ConfigError};
use crate::lifecycle::Shutdown;
use crate::load_balancer::backend::resolve;
use crate::load_balancer::{Backend, BackendLoad, LoadBalancer, Policy, PolicyError};
use crate::net::listener::{Listener, ListenerError};
use crate::reactor::{Reactor, ReactorError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot resolve backend {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Reactor(#[from] ReactorError),
}

/// What the balancer looked like when it stopped.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub cache: CacheStats,
    pub loads: Vec<BackendLoad>,
}

/// A bound, not yet running balancer.
#[derive(Debug)]
pub struct Balancer {
    reactor: Reactor,
}

impl Balancer {
    /// Validate `config` and bind everything it describes.
    ///
    /// Backend names are resolved here, once.
    pub fn bind(config: BalancerConfig) -> Result<Self, StartupError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let mut addrs = Vec::with_capacity(config.backends.len());
        for backend in &config.backends {
            let addr = resolve(&backend.address).map_err(|source| StartupError::Resolve {
                address: backend.address.clone(),
                source,
            })?;
            addrs.push(addr);
        }
        let backends = Backend::from_addrs(addrs);
        for backend in &backends {
            tracing::info!(id = backend.id.0, address = %backend, "Backend configured");
        }

        let policy = Policy::new(config.policy, backends)?;
        let cache = ResponseCache::new(config.cache.capacity);
        let listener = Listener::bind(&config.listener)?;
        let reactor = Reactor::new(listener, policy, cache, &config.reactor, Shutdown::new())?;

        tracing::info!(
            address = ?reactor.local_addr().ok(),
            policy = %config.policy,
            backends = config.backends.len(),
            cache_capacity = config.cache.capacity,
            "Balancer ready"
        );

        Ok(Self { reactor })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.reactor.local_addr()
    }

    /// Flag that stops `run` within one poll timeout once triggered.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.reactor.shutdown_handle()
    }

    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    /// Serve until shutdown, then report cache and backend state.
    pub fn run(mut self) -> Result<RunSummary, ReactorError> {
        self.reactor.run()?;

        let summary = RunSummary {
            cache: self.reactor.cache().stats(),
            loads: self.reactor.policy().loads(),
        };
        for load in &summary.loads {
            tracing::info!(
                backend = %load.backend,
                active_connections = ?load.active_connections,
                average_response = ?load.average_response,
                samples = load.samples,
                "Backend load at exit"
            );
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, ListenerConfig};

    fn config(backends: &[&str]) -> BalancerConfig {
        BalancerConfig {
            listener: ListenerConfig {
                bind_address: "127.0.0.1:0".into(),
                ..ListenerConfig::default()
            },
            backends: backends.iter().map(|b| BackendConfig::new(*b)).collect(),
            ..BalancerConfig::default()
        }
    }

    #[test]
    fn binds_ephemeral_port() {
        let balancer = Balancer::bind(config(&["127.0.0.1:9001", "127.0.0.1:9002"])).unwrap();
        assert_ne!(balancer.local_addr().unwrap().port(), 0);
        assert_eq!(balancer.reactor().policy().loads().len(), 2);
    }

    #[test]
    fn empty_backend_set_is_rejected() {
        let err = Balancer::bind(config(&[])).unwrap_err();
        assert!(matches!(err, StartupError::Config(ConfigError::Validation(_))));
    }

    #[test]
    fn unresolvable_backend_fails_at_bind() {
        let err = Balancer::bind(config(&["127.0.0.1:9001", "no-such-host.invalid:80"])).unwrap_err();
        assert!(matches!(err, StartupError::Resolve { ref address, .. } if address == "no-such-host.invalid:80"));
    }

    #[test]
    fn run_stops_on_flag() {
        let balancer = Balancer::bind(config(&["127.0.0.1:9001"])).unwrap();
        balancer.shutdown_handle().trigger();
        let summary = balancer.run().unwrap();
        assert_eq!(summary.cache.hits, 0);
        assert_eq!(summary.loads.len(), 1);
    }
}
