//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → Resolve backends → Build policy + cache → Bind listener
//!
//! Shutdown (shutdown.rs):
//!     Flag set → Reactor notices on its next turn → Tear down all pairs → Return
//!
//! Signals (signals.rs):
//!     SIGINT/SIGTERM → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then the listener
//! - Shutdown is observed within one poll timeout, even with no traffic

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{Balancer, RunSummary, StartupError};
