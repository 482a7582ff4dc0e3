//! TCP load balancer
//!
//! Accepts client connections, pairs each with an upstream connection to a
//! backend chosen by the configured policy, and relays bytes both ways.
//! Repeated requests are answered from a small response cache.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────────────────────────────┐
//!                  │                   BALANCER                   │
//!                  │                                              │
//!   Client ────────┼─▶ listener ──▶ policy ──▶ connection table ──┼──▶ Backend
//!                  │                               │              │
//!   Client ◀───────┼──────────── cache ◀───────────┘              │
//!                  │                                              │
//!                  │   one reactor thread drives every socket     │
//!                  └──────────────────────────────────────────────┘
//! ```

use clap::Parser;

use tcp_balancer::config::Args;
use tcp_balancer::lifecycle::{signals, Balancer};
use tcp_balancer::observability::{logging, metrics};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = args.into_config()?;

    logging::init_logging(&config.observability.log_level)?;

    tracing::info!(
        bind_address = %config.listener.bind_address,
        policy = %config.policy,
        backends = config.backends.len(),
        cache_capacity = config.cache.capacity,
        "tcp-balancer v0.1.0 starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let balancer = Balancer::bind(config)?;
    signals::install(&balancer.shutdown_handle())?;

    let summary = balancer.run()?;
    tracing::info!(
        cache_hits = summary.cache.hits,
        cache_misses = summary.cache.misses,
        cache_entries = summary.cache.len,
        "Shutdown complete"
    );

    Ok(())
}
