//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define balancer metrics (cache, connections, per-backend load)
//! - Expose a Prometheus-compatible endpoint when enabled
//!
//! # Metrics
//! - `balancer_cache_lookups_total` (counter): lookups by result (hit/miss)
//! - `balancer_cache_entries` (gauge): current cache occupancy
//! - `balancer_connections_total` (counter): upstream connects that completed, by backend
//! - `balancer_connect_failures_total` (counter): upstream connects that failed to start or were refused
//! - `balancer_active_pairs` (gauge): pairs currently in the connection table
//! - `balancer_backend_active_connections` (gauge): policy view of per-backend load
//! - `balancer_backend_response_seconds` (gauge): policy view of average latency
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::load_balancer::{Backend, BackendLoad};

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    ::metrics::counter!("balancer_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_size(len: usize) {
    ::metrics::gauge!("balancer_cache_entries").set(len as f64);
}

pub fn record_connection_opened(backend: &Backend) {
    ::metrics::counter!("balancer_connections_total", "backend" => backend.addr.to_string())
        .increment(1);
}

pub fn record_connect_failure(backend: &Backend) {
    ::metrics::counter!("balancer_connect_failures_total", "backend" => backend.addr.to_string())
        .increment(1);
}

pub fn record_active_pairs(pairs: usize) {
    ::metrics::gauge!("balancer_active_pairs").set(pairs as f64);
}

pub fn record_backend_loads(loads: &[BackendLoad]) {
    for load in loads {
        let backend = load.backend.addr.to_string();
        if let Some(active) = load.active_connections {
            ::metrics::gauge!("balancer_backend_active_connections", "backend" => backend.clone())
                .set(active as f64);
        }
        if let Some(average) = load.average_response {
            ::metrics::gauge!("balancer_backend_response_seconds", "backend" => backend)
                .set(average.as_secs_f64());
        }
    }
}
