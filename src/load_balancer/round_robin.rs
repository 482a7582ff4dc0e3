//! Round-robin load balancing strategy.

use crate::load_balancer::{Backend, BackendLoad, Feedback, LoadBalancer, PolicyError};

/// Round-robin selector.
/// Stores a cursor to rotate through backends in configuration order.
#[derive(Debug)]
pub struct RoundRobin {
    backends: Vec<Backend>,
    cursor: usize,
}

impl RoundRobin {
    pub fn new(backends: Vec<Backend>) -> Result<Self, PolicyError> {
        if backends.is_empty() {
            return Err(PolicyError::NoBackends);
        }
        Ok(Self {
            backends,
            cursor: 0,
        })
    }
}

impl LoadBalancer for RoundRobin {
    fn select_server(&mut self) -> Backend {
        let backend = self.backends[self.cursor];
        self.cursor = (self.cursor + 1) % self.backends.len();
        backend
    }

    fn update(&mut self, _backend: Option<&Backend>, _feedback: Feedback) -> Result<(), PolicyError> {
        // Stateless with respect to load
        Ok(())
    }

    fn loads(&self) -> Vec<BackendLoad> {
        self.backends.iter().copied().map(BackendLoad::untracked).collect()
    }

    fn name(&self) -> &'static str {
        "round-robin"
    }
}
