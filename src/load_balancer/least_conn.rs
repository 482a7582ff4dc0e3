//! Least Connections load balancing strategy.

use crate::load_balancer::{Backend, BackendLoad, Feedback, LoadBalancer, PolicyError};

/// Least connections selector.
/// Selects the backend with the minimum number of active connections.
#[derive(Debug)]
pub struct LeastConnections {
    backends: Vec<Backend>,
    /// Active connections, indexed like `backends`.
    active: Vec<usize>,
}

impl LeastConnections {
    pub fn new(backends: Vec<Backend>) -> Result<Self, PolicyError> {
        if backends.is_empty() {
            return Err(PolicyError::NoBackends);
        }
        let active = vec![0; backends.len()];
        Ok(Self { backends, active })
    }

    /// Current active count for a backend, if it belongs to this set.
    pub fn active_connections(&self, backend: &Backend) -> Option<usize> {
        self.index_of(backend).map(|i| self.active[i])
    }

    fn index_of(&self, backend: &Backend) -> Option<usize> {
        let i = backend.id.0;
        (self.backends.get(i) == Some(backend)).then_some(i)
    }
}

impl LoadBalancer for LeastConnections {
    fn select_server(&mut self) -> Backend {
        // In case of tie, the first one is selected (stability)
        let (index, _) = self
            .active
            .iter()
            .enumerate()
            .min_by_key(|(_, count)| **count)
            .unwrap_or((0, &0));

        self.active[index] += 1;
        self.backends[index]
    }

    fn update(&mut self, backend: Option<&Backend>, feedback: Feedback) -> Result<(), PolicyError> {
        if feedback != Feedback::Closed {
            return Ok(());
        }

        let Some(backend) = backend else {
            tracing::debug!("Connection closed without a backend, ignoring");
            return Ok(());
        };

        match self.index_of(backend) {
            Some(i) => {
                // clamp: duplicate or late notifications must not underflow
                self.active[i] = self.active[i].saturating_sub(1);
            }
            None => {
                tracing::warn!(backend = %backend, "Update for unknown backend ignored");
            }
        }
        Ok(())
    }

    fn loads(&self) -> Vec<BackendLoad> {
        self.backends
            .iter()
            .zip(&self.active)
            .map(|(backend, active)| BackendLoad {
                active_connections: Some(*active),
                ..BackendLoad::untracked(*backend)
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "least-connections"
    }
}
