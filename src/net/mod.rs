//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (non-blocking accept, pair cap)
//!     → table.rs (open upstream, register both halves, record the pair)
//!     → connection.rs (per-socket stream, outbox and write interest)
//!
//! Pair lifecycle:
//!     Registered → (reads / writes) → Torn down (both halves together)
//! ```
//!
//! # Design Decisions
//! - Everything is non-blocking and driven by the reactor
//! - Tokens, not socket identity, key the pairing map
//! - No half-open pairs: teardown always takes both sockets

pub mod connection;
pub mod listener;
pub mod table;

pub use connection::{PairId, Side};
pub use listener::{Listener, LISTENER};
pub use table::{ClosedPair, ConnectionTable, TableError};
