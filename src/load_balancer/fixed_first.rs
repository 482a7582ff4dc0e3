//! Fixed-first strategy: every connection goes to the first backend.

use crate::load_balancer::{Backend, BackendLoad, Feedback, LoadBalancer, PolicyError};

/// Degenerate "n to 1" selector.
#[derive(Debug)]
pub struct FixedFirst {
    backends: Vec<Backend>,
}

impl FixedFirst {
    pub fn new(backends: Vec<Backend>) -> Result<Self, PolicyError> {
        if backends.is_empty() {
            return Err(PolicyError::NoBackends);
        }
        Ok(Self { backends })
    }
}

impl LoadBalancer for FixedFirst {
    fn select_server(&mut self) -> Backend {
        self.backends[0]
    }

    fn update(&mut self, _backend: Option<&Backend>, _feedback: Feedback) -> Result<(), PolicyError> {
        Ok(())
    }

    fn loads(&self) -> Vec<BackendLoad> {
        self.backends.iter().copied().map(BackendLoad::untracked).collect()
    }

    fn name(&self) -> &'static str {
        "fixed-first"
    }
}
