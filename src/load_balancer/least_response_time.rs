//! Least Response Time load balancing strategy.
//!
//! # Estimate
//! For every backend the selector projects the average latency it would have
//! if a request were dispatched now:
//!
//! ```text
//! estimate = (sum(samples) + (last_dispatch - now)) / (samples + 1)
//! ```
//!
//! `last_dispatch - now` is zero or negative, so a backend that has been idle
//! for a long time (or never used, `last_dispatch = 0`) looks cheaper. The
//! projected term can drag the estimate below zero before any response is
//! recorded; that is kept as is.
//!
//! # Feedback
//! - `Feedback::Response` appends `now - last_dispatch` to the backend's samples
//! - `Feedback::Closed` is ignored
//! - no backend at all is an invalid argument

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::load_balancer::{Backend, BackendLoad, Feedback, LoadBalancer, PolicyError};

/// Source of timestamps, in seconds.
pub trait Clock: std::fmt::Debug {
    fn now(&self) -> f64;
}

/// Wall clock, seconds since the UNIX epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}

/// Latency history of one backend.
#[derive(Debug, Default, Clone)]
struct ResponseTimes {
    samples: Vec<f64>,
    last_dispatch: Option<f64>,
    average: f64,
}

impl ResponseTimes {
    fn estimate(&self, now: f64) -> f64 {
        let gap = self.last_dispatch.unwrap_or(0.0) - now;
        let total: f64 = self.samples.iter().sum::<f64>() + gap;
        total / (self.samples.len() + 1) as f64
    }

    fn record(&mut self, elapsed: f64) {
        self.samples.push(elapsed);
        self.average = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
    }
}

/// Least response time selector.
#[derive(Debug)]
pub struct LeastResponseTime<C: Clock = SystemClock> {
    backends: Vec<Backend>,
    times: Vec<ResponseTimes>,
    clock: C,
}

impl LeastResponseTime<SystemClock> {
    pub fn new(backends: Vec<Backend>) -> Result<Self, PolicyError> {
        Self::with_clock(backends, SystemClock)
    }
}

impl<C: Clock> LeastResponseTime<C> {
    pub fn with_clock(backends: Vec<Backend>, clock: C) -> Result<Self, PolicyError> {
        if backends.is_empty() {
            return Err(PolicyError::NoBackends);
        }
        let times = vec![ResponseTimes::default(); backends.len()];
        Ok(Self {
            backends,
            times,
            clock,
        })
    }

    /// Recorded average response time in seconds (0 until a sample exists).
    pub fn average(&self, backend: &Backend) -> Option<f64> {
        self.index_of(backend).map(|i| self.times[i].average)
    }

    /// Projected estimate for every backend at `now`, in configuration order.
    pub fn estimates(&self, now: f64) -> Vec<f64> {
        self.times.iter().map(|t| t.estimate(now)).collect()
    }

    fn index_of(&self, backend: &Backend) -> Option<usize> {
        let i = backend.id.0;
        (self.backends.get(i) == Some(backend)).then_some(i)
    }
}

impl<C: Clock> LoadBalancer for LeastResponseTime<C> {
    fn select_server(&mut self) -> Backend {
        let now = self.clock.now();

        let mut best = 0;
        let mut best_estimate = f64::INFINITY;
        for (i, times) in self.times.iter().enumerate() {
            let estimate = times.estimate(now);
            if estimate < best_estimate {
                best = i;
                best_estimate = estimate;
            }
        }

        self.times[best].last_dispatch = Some(self.clock.now());
        self.backends[best]
    }

    fn update(&mut self, backend: Option<&Backend>, feedback: Feedback) -> Result<(), PolicyError> {
        let backend = backend.ok_or(PolicyError::MissingBackend)?;

        if feedback != Feedback::Response {
            return Ok(());
        }

        let Some(i) = self.index_of(backend) else {
            tracing::warn!(backend = %backend, "Update for unknown backend ignored");
            return Ok(());
        };

        let times = &mut self.times[i];
        let Some(started) = times.last_dispatch else {
            tracing::debug!(backend = %backend, "Response from a backend never dispatched to, ignoring");
            return Ok(());
        };

        let elapsed = self.clock.now() - started;
        times.record(elapsed);

        tracing::trace!(
            backend = %backend,
            elapsed_secs = elapsed,
            average_secs = times.average,
            "Response time recorded"
        );
        Ok(())
    }

    fn loads(&self) -> Vec<BackendLoad> {
        self.backends
            .iter()
            .zip(&self.times)
            .map(|(backend, times)| BackendLoad {
                average_response: if times.samples.is_empty() {
                    None
                } else {
                    Duration::try_from_secs_f64(times.average.max(0.0)).ok()
                },
                samples: times.samples.len(),
                ..BackendLoad::untracked(*backend)
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "least-response-time"
    }
}
