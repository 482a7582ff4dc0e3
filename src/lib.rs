//! Single-process TCP load balancer library

pub mod cache;
pub mod config;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod reactor;

pub use config::schema::BalancerConfig;
pub use lifecycle::{Balancer, Shutdown};
pub use load_balancer::{Policy, PolicyKind};
