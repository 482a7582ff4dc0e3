//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Reactor, connection table, cache and policies produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters and gauges via the `metrics` facade)
//!
//! Consumers:
//!     → stdout (tracing-subscriber fmt layer)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Counters are not load-bearing: the balancer behaves the same with no recorder installed
//! - Log level configurable via config and `RUST_LOG`

pub mod logging;
pub mod metrics;
