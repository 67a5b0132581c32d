//! Readiness probing.
//!
//! The probe polls a health endpoint at a fixed interval until it reports
//! serving or a bounded budget expires. This is deliberately a plain
//! busy-poll rather than exponential backoff: the instance either comes up
//! within the budget or the run is aborted, and a predictable cadence
//! keeps the wait observable and testable.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

pub mod grpc;

pub use grpc::GrpcHealth;

/// Verdict of a single health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServingStatus {
    /// The service is ready to accept requests.
    Serving,
    /// The service is up but not serving.
    NotServing,
    /// The endpoint reported an unknown or unrecognized status.
    Unknown,
}

/// Errors from a single health check attempt.
///
/// The probe treats these the same as a non-serving verdict and keeps
/// polling; they are never surfaced to the caller.
#[derive(Debug, Error)]
pub enum HealthError {
    /// The endpoint address could not be turned into a channel.
    #[error("invalid health endpoint address: {address}")]
    InvalidAddress {
        /// The offending address.
        address: String,
        /// Underlying error.
        #[source]
        source: tonic::transport::Error,
    },

    /// The health RPC failed.
    #[error("health check RPC failed: {0}")]
    Rpc(#[from] tonic::Status),
}

/// A single readiness check against a named service.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Checks the serving status of `service` at `address`.
    async fn check(&self, address: &str, service: &str) -> Result<ServingStatus, HealthError>;
}

/// Bounded fixed-interval readiness poll.
#[derive(Debug, Clone, Copy)]
pub struct HealthProbe {
    /// Total budget for the poll loop.
    pub budget: Duration,
    /// Delay between checks.
    pub poll_interval: Duration,
}

impl Default for HealthProbe {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl HealthProbe {
    /// Polls until `service` reports serving or the budget expires.
    ///
    /// Returns `true` only on an explicit serving verdict observed within
    /// the budget. Check errors and non-serving verdicts keep the loop
    /// polling; budget exhaustion yields `false`. No partial health
    /// information is reported.
    pub async fn await_serving(
        &self,
        client: &dyn HealthCheck,
        address: &str,
        service: &str,
    ) -> bool {
        let poll = async {
            loop {
                match client.check(address, service).await {
                    Ok(ServingStatus::Serving) => return,
                    Ok(status) => debug!(?status, service, "health endpoint not serving yet"),
                    Err(err) => debug!(error = %err, service, "health check failed, retrying"),
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };
        tokio::time::timeout(self.budget, poll).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Scripted health endpoint: plays back verdicts, then repeats the
    /// last one forever.
    struct Scripted {
        script: Mutex<Vec<Result<ServingStatus, ()>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(mut script: Vec<Result<ServingStatus, ()>>) -> Self {
            script.reverse();
            Self { script: Mutex::new(script), calls: AtomicUsize::new(0) }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HealthCheck for Scripted {
        async fn check(&self, _: &str, _: &str) -> Result<ServingStatus, HealthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            let step = if script.len() > 1 {
                script.pop().unwrap()
            } else {
                *script.last().unwrap()
            };
            step.map_err(|()| HealthError::Rpc(tonic::Status::unavailable("down")))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_serving_returns_after_one_check() {
        let endpoint = Scripted::new(vec![Ok(ServingStatus::Serving)]);
        let probe = HealthProbe::default();
        assert!(probe.await_serving(&endpoint, "localhost:9494", "model").await);
        assert_eq!(endpoint.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_are_tolerated_until_serving() {
        let endpoint = Scripted::new(vec![
            Err(()),
            Err(()),
            Ok(ServingStatus::NotServing),
            Ok(ServingStatus::Serving),
        ]);
        let probe = HealthProbe::default();
        assert!(probe.await_serving(&endpoint, "localhost:9494", "model").await);
        assert_eq!(endpoint.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_exhaustion_yields_false() {
        let endpoint = Scripted::new(vec![Ok(ServingStatus::NotServing)]);
        let probe = HealthProbe {
            budget: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
        };
        assert!(!probe.await_serving(&endpoint, "localhost:9494", "model").await);
        // Fixed cadence: one check per interval within the budget.
        assert!(endpoint.calls() >= 9 && endpoint.calls() <= 11, "calls = {}", endpoint.calls());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_status_never_counts_as_serving() {
        let endpoint = Scripted::new(vec![Ok(ServingStatus::Unknown)]);
        let probe = HealthProbe {
            budget: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
        };
        assert!(!probe.await_serving(&endpoint, "localhost:9494", "model").await);
    }
}
