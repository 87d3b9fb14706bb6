//! Fan-out/fan-in execution of independent sub-flows.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::error::{BranchFailure, BranchFailures, IacError, IacResult};

/// One independent sub-flow.
pub type Branch<T> = BoxFuture<'static, IacResult<T>>;

/// Runs named branches concurrently on a bounded pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelOrchestrator {
    max_workers: Option<usize>,
}

impl ParallelOrchestrator {
    /// Pool sized to the number of submitted branches.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of branches running at once.
    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers.max(1));
        self
    }

    /// Run every branch to completion and return their results by key.
    ///
    /// If any branch fails, the first failure by completion order is
    /// returned once all branches have settled.
    pub async fn provision<T>(&self, branches: Vec<(String, Branch<T>)>) -> IacResult<HashMap<String, T>>
    where
        T: Send + 'static,
    {
        let total = branches.len();
        let mut results = HashMap::with_capacity(total);
        let mut first_error: Option<IacError> = None;

        for (key, outcome) in self.run_all(branches).await {
            match outcome {
                Ok(value) => {
                    results.insert(key, value);
                }
                Err(e) => {
                    error!("Branch '{}' failed: {}", key, e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                debug!("All {} branch(es) completed", total);
                Ok(results)
            }
        }
    }

    /// Run every branch to completion and report all failures together.
    pub async fn teardown(&self, branches: Vec<(String, Branch<()>)>) -> IacResult<()> {
        let mut failures = Vec::new();

        for (key, outcome) in self.run_all(branches).await {
            if let Err(e) = outcome {
                error!("Teardown branch '{}' failed: {}", key, e);
                failures.push(BranchFailure {
                    branch: key,
                    message: e.to_string(),
                });
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(IacError::Teardown(BranchFailures(failures)))
        }
    }

    /// Outcomes in completion order.
    async fn run_all<T>(&self, branches: Vec<(String, Branch<T>)>) -> Vec<(String, IacResult<T>)>
    where
        T: Send + 'static,
    {
        let workers = self.max_workers.unwrap_or(branches.len()).max(1);
        let permits = Arc::new(Semaphore::new(workers));
        let mut set = JoinSet::new();
        let mut outcomes = Vec::with_capacity(branches.len());
        let keys: Vec<String> = branches.iter().map(|(key, _)| key.clone()).collect();

        for (key, branch) in branches {
            let permits = permits.clone();
            set.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        let failure = IacError::Branch {
                            branch: key.clone(),
                            message: "worker pool closed".to_string(),
                        };
                        return (key, Err(failure));
                    }
                };
                debug!("Branch '{}' started", key);
                let outcome = match AssertUnwindSafe(branch).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => Err(IacError::Branch {
                        branch: key.clone(),
                        message: "branch panicked".to_string(),
                    }),
                };
                (key, outcome)
            });
        }

        let mut join_error = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!("Branch task could not be joined: {}", e);
                    join_error = Some(e.to_string());
                }
            }
        }
        if let Some(reason) = join_error {
            record_unjoined(&keys, &mut outcomes, &reason);
        }
        outcomes
    }
}

/// Give every branch without an outcome an error of its own.
fn record_unjoined<T>(keys: &[String], outcomes: &mut Vec<(String, IacResult<T>)>, reason: &str) {
    let missing: Vec<String> = keys
        .iter()
        .filter(|key| !outcomes.iter().any(|(done, _)| done == *key))
        .cloned()
        .collect();
    for key in missing {
        let failure = IacError::Branch {
            branch: key.clone(),
            message: format!("task could not be joined: {}", reason),
        };
        outcomes.push((key, Err(failure)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn delayed<T: Send + 'static>(ms: u64, result: IacResult<T>) -> Branch<T> {
        async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            result
        }
        .boxed()
    }

    #[tokio::test]
    async fn test_provision_collects_every_result() {
        let orchestrator = ParallelOrchestrator::new();
        let results = orchestrator
            .provision(vec![
                ("database".to_string(), delayed(30, Ok("conn".to_string()))),
                ("image".to_string(), delayed(5, Ok("img@sha".to_string()))),
            ])
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results["database"], "conn");
        assert_eq!(results["image"], "img@sha");
    }

    #[tokio::test]
    async fn test_provision_surfaces_first_failure_by_completion() {
        let finished = Arc::new(AtomicUsize::new(0));
        let slow_done = finished.clone();
        let slow: Branch<u32> = async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            slow_done.fetch_add(1, Ordering::SeqCst);
            Err(IacError::operation("slow", "late failure"))
        }
        .boxed();

        let err = ParallelOrchestrator::new()
            .provision(vec![
                ("slow".to_string(), slow),
                ("fast".to_string(), delayed(1, Err(IacError::operation("fast", "early failure")))),
                ("ok".to_string(), delayed(10, Ok(1))),
            ])
            .await
            .unwrap_err();

        assert!(err.to_string().contains("early failure"));
        // siblings were allowed to finish
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_teardown_reports_all_failures() {
        let err = ParallelOrchestrator::new()
            .teardown(vec![
                ("service".to_string(), delayed(5, Err(IacError::operation("delete", "denied")))),
                ("instance".to_string(), delayed(1, Ok(()))),
                ("object".to_string(), delayed(3, Err(IacError::operation("delete", "gone wrong")))),
                ("package".to_string(), delayed(2, Ok(()))),
            ])
            .await
            .unwrap_err();

        match err {
            IacError::Teardown(failures) => {
                assert_eq!(failures.len(), 2);
                let mut branches = failures.branches();
                branches.sort();
                assert_eq!(branches, vec!["object", "service"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_max_workers_bounds_concurrency() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let branches = (0..6)
            .map(|i| {
                let running = running.clone();
                let peak = peak.clone();
                let branch: Branch<()> = async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed();
                (format!("b{i}"), branch)
            })
            .collect();

        ParallelOrchestrator::new()
            .max_workers(2)
            .teardown(branches)
            .await
            .unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    fn explode() -> IacResult<()> {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_panicking_branch_becomes_error() {
        let branch: Branch<()> = async { explode() }.boxed();
        let err = ParallelOrchestrator::new()
            .teardown(vec![("bad".to_string(), branch)])
            .await
            .unwrap_err();
        assert!(matches!(err, IacError::Teardown(f) if f.branches() == vec!["bad"]));
    }

    #[tokio::test]
    async fn test_empty_branch_list() {
        let results = ParallelOrchestrator::new()
            .provision::<()>(Vec::new())
            .await
            .unwrap();
        assert!(results.is_empty());
        ParallelOrchestrator::new().teardown(Vec::new()).await.unwrap();
    }

    #[test]
    fn test_unjoined_branch_gets_its_own_error() {
        let keys = vec!["database".to_string(), "image".to_string()];
        let mut outcomes: Vec<(String, IacResult<u8>)> = vec![("database".to_string(), Ok(1))];

        record_unjoined(&keys, &mut outcomes, "task was cancelled");

        assert_eq!(outcomes.len(), 2);
        match &outcomes[1] {
            (key, Err(IacError::Branch { branch, message })) => {
                assert_eq!(key, "image");
                assert_eq!(branch, "image");
                assert!(message.contains("cancelled"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
