//! Command-line arguments.
//!
//! Flags are applied on top of the optional config file. The merged
//! configuration is validated once, by `Balancer::bind`.

use std::path::PathBuf;

use clap::Parser;

use crate::config::loader::{read_config, ConfigError};
use crate::config::schema::{BackendConfig, BalancerConfig};
use crate::load_balancer::PolicyKind;

#[derive(Debug, Parser)]
#[command(name = "tcp-balancer")]
#[command(about = "TCP load balancer with a request/response cache", long_about = None)]
pub struct Args {
    /// Load balancing policy
    #[arg(short = 'a', long, value_enum)]
    pub policy: Option<PolicyKind>,

    /// Load balancer port (listens on 127.0.0.1)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Backend ports on localhost
    #[arg(short, long, num_args = 1..)]
    pub servers: Vec<u16>,

    /// Backend address as host:port (repeatable)
    #[arg(short = 'b', long = "backend")]
    pub backends: Vec<String>,

    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of cached request/response pairs (0 disables the cache)
    #[arg(long)]
    pub cache_size: Option<usize>,

    /// Log level when RUST_LOG is unset
    #[arg(long)]
    pub log_level: Option<String>,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    pub metrics: Option<String>,
}

impl Args {
    /// Merge the config file, if any, with the flags.
    pub fn into_config(self) -> Result<BalancerConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => read_config(path)?,
            None => BalancerConfig::default(),
        };
        self.apply(&mut config);
        Ok(config)
    }

    /// Override `config` with whatever was given on the command line.
    pub fn apply(&self, config: &mut BalancerConfig) {
        if let Some(policy) = self.policy {
            config.policy = policy;
        }
        if let Some(port) = self.port {
            config.listener.bind_address = format!("127.0.0.1:{}", port);
        }

        if !self.servers.is_empty() || !self.backends.is_empty() {
            config.backends = self
                .servers
                .iter()
                .map(|port| BackendConfig::new(format!("localhost:{}", port)))
                .chain(self.backends.iter().map(BackendConfig::new))
                .collect();
        }

        if let Some(capacity) = self.cache_size {
            config.cache.capacity = capacity;
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
        if let Some(addr) = &self.metrics {
            config.observability.metrics_enabled = true;
            config.observability.metrics_address = addr.clone();
        }
    }
}
