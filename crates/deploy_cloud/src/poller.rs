//! Remote operation poller.
//!
//! Cloud calls that complete asynchronously hand back a [`RemoteOperation`].
//! [`Poller::wait`] turns one into a plain awaited result: it polls until the
//! operation reports a terminal state and returns that state's value, or an
//! [`CloudError::OperationFailed`] for a terminal failure.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CloudError, CloudResult};

/// Status reported by one poll of a remote operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus<T> {
    Pending,
    Succeeded(T),
    Failed(String),
}

impl<T> OperationStatus<T> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::Pending)
    }
}

/// An asynchronous backend call that has to be polled to completion.
///
/// Polling must be safe to repeat. Once a terminal status has been
/// reported the operation must keep reporting it.
#[async_trait]
pub trait RemoteOperation: Send + Sync {
    type Output: Send;

    /// Backend identifier of the operation.
    fn id(&self) -> &str;

    /// Fetch the current status.
    async fn poll(&self) -> CloudResult<OperationStatus<Self::Output>>;
}

/// Boxed operation as returned by cloud service contracts.
pub type PendingOperation<T> = Box<dyn RemoteOperation<Output = T>>;

/// An operation whose outcome is already known.
///
/// Used by backends whose calls complete synchronously, and by tests.
pub struct ResolvedOperation<T> {
    id: String,
    status: Mutex<OperationStatus<T>>,
}

impl<T> ResolvedOperation<T> {
    pub fn succeeded(id: impl Into<String>, value: T) -> Self {
        Self {
            id: id.into(),
            status: Mutex::new(OperationStatus::Succeeded(value)),
        }
    }

    pub fn failed(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: Mutex::new(OperationStatus::Failed(message.into())),
        }
    }

    pub fn boxed(self) -> PendingOperation<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        Box::new(self)
    }
}

#[async_trait]
impl<T> RemoteOperation for ResolvedOperation<T>
where
    T: Clone + Send + Sync,
{
    type Output = T;

    fn id(&self) -> &str {
        &self.id
    }

    async fn poll(&self) -> CloudResult<OperationStatus<T>> {
        Ok(self.status.lock().clone())
    }
}

/// Polling cadence and limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay before the second poll
    pub interval: Duration,
    /// Give up once this much time has passed (None = wait indefinitely)
    pub deadline: Option<Duration>,
    /// Growth factor applied to the delay after each poll (1.0 = fixed)
    pub backoff_multiplier: f64,
    /// Upper bound for the delay between polls
    pub max_interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            deadline: None,
            backoff_multiplier: 1.0,
            max_interval: Duration::from_secs(60),
        }
    }
}

impl PollConfig {
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn backoff(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    /// Delay to wait after the given (zero-based) poll attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.max(1.0);
        let cap = self.max_interval.max(self.interval).as_secs_f64();
        let delay = self.interval.as_secs_f64() * multiplier.powi(attempt.min(64) as i32);
        Duration::from_secs_f64(delay.min(cap))
    }
}

/// Waits for remote operations to reach a terminal state.
#[derive(Debug, Clone, Default)]
pub struct Poller {
    config: PollConfig,
}

impl Poller {
    pub fn new(config: PollConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Poll `operation` until it succeeds or fails.
    pub async fn wait<O>(&self, operation: &O) -> CloudResult<O::Output>
    where
        O: RemoteOperation + ?Sized,
    {
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            match operation.poll().await? {
                OperationStatus::Succeeded(value) => {
                    debug!(
                        "Operation {} completed after {:?}",
                        operation.id(),
                        started.elapsed()
                    );
                    return Ok(value);
                }
                OperationStatus::Failed(message) => {
                    return Err(CloudError::OperationFailed {
                        operation: operation.id().to_string(),
                        message,
                    });
                }
                OperationStatus::Pending => {}
            }

            let mut delay = self.config.delay_for_attempt(attempt);
            let elapsed = started.elapsed();
            if let Some(deadline) = self.config.deadline {
                if elapsed >= deadline {
                    return Err(CloudError::Timeout {
                        operation: operation.id().to_string(),
                        waited: elapsed,
                    });
                }
                delay = delay.min(deadline - elapsed);
            }

            debug!(
                "Waiting for operation {} to complete... [{}s]",
                operation.id(),
                elapsed.as_secs()
            );
            tokio::time::sleep(delay).await;
            attempt = attempt.saturating_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports Pending a fixed number of times, then the final status.
    struct Countdown {
        pending: usize,
        polls: AtomicUsize,
        outcome: OperationStatus<u32>,
    }

    impl Countdown {
        fn new(pending: usize, outcome: OperationStatus<u32>) -> Self {
            Self {
                pending,
                polls: AtomicUsize::new(0),
                outcome,
            }
        }
    }

    #[async_trait]
    impl RemoteOperation for Countdown {
        type Output = u32;

        fn id(&self) -> &str {
            "countdown"
        }

        async fn poll(&self) -> CloudResult<OperationStatus<u32>> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst);
            if n < self.pending {
                Ok(OperationStatus::Pending)
            } else {
                Ok(self.outcome.clone())
            }
        }
    }

    fn fast() -> Poller {
        Poller::new(PollConfig::default().interval(Duration::from_millis(5)))
    }

    #[tokio::test]
    async fn test_returns_value_on_success() {
        let op = Countdown::new(3, OperationStatus::Succeeded(7));
        assert_eq!(fast().wait(&op).await.unwrap(), 7);
        assert_eq!(op.polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_failure_becomes_operation_failed() {
        let op = Countdown::new(1, OperationStatus::Failed("quota exceeded".into()));
        let err = fast().wait(&op).await.unwrap_err();

        match err {
            CloudError::OperationFailed { operation, message } => {
                assert_eq!(operation, "countdown");
                assert_eq!(message, "quota exceeded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_deadline_times_out() {
        let op = Countdown::new(usize::MAX, OperationStatus::Succeeded(0));
        let poller = Poller::new(
            PollConfig::default()
                .interval(Duration::from_millis(5))
                .deadline(Duration::from_millis(30)),
        );

        let err = poller.wait(&op).await.unwrap_err();
        assert!(matches!(err, CloudError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_resolved_operation_through_box() {
        let op: PendingOperation<String> = ResolvedOperation::succeeded("op-1", "done".to_string()).boxed();
        assert_eq!(fast().wait(op.as_ref()).await.unwrap(), "done");
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = PollConfig::default()
            .interval(Duration::from_secs(1))
            .backoff(2.0)
            .max_interval(Duration::from_secs(5));

        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(5));
    }

    #[test]
    fn test_default_is_fixed_interval_without_deadline() {
        let config = PollConfig::default();
        assert_eq!(config.delay_for_attempt(0), config.delay_for_attempt(9));
        assert!(config.deadline.is_none());
    }
}
