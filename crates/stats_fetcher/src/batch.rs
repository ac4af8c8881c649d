use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::provider::StatsProvider;
use crate::retry::{FetchError, Fetcher};
use crate::task::{FetchTask, RawResult};

/// Upper bound on concurrent fetches regardless of configuration.
pub const MAX_WORKERS: usize = 250;

/// A batch never runs more workers than it has tasks, nor more than the
/// ceiling, nor fewer than one.
pub fn effective_workers(requested: usize, task_count: usize) -> usize {
    requested.min(MAX_WORKERS).min(task_count).max(1)
}

#[derive(Debug)]
pub struct TaskOutcome {
    pub task: FetchTask,
    pub result: Result<RawResult, FetchError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub aborted: usize,
    pub gave_up: usize,
    pub cancelled: usize,
    pub panicked: usize,
}

impl BatchSummary {
    pub fn of(outcomes: &[TaskOutcome]) -> Self {
        let mut s = Self::default();
        for o in outcomes {
            match &o.result {
                Ok(_) => s.succeeded += 1,
                Err(FetchError::Aborted { .. }) => s.aborted += 1,
                Err(FetchError::GaveUp { .. }) => s.gave_up += 1,
                Err(FetchError::Cancelled { .. }) => s.cancelled += 1,
                Err(FetchError::Panicked(_)) => s.panicked += 1,
            }
        }
        s
    }

    pub fn failed(&self) -> usize {
        self.aborted + self.gave_up + self.cancelled + self.panicked
    }
}

/// Runs every task through `fetcher` on at most `worker_count` concurrent
/// tokio tasks. Outcomes arrive in completion order, each paired with its
/// task; one task's failure, or panic, never stops the others.
pub async fn run_batch<P>(fetcher: Arc<Fetcher<P>>, tasks: Vec<FetchTask>, worker_count: usize) -> Vec<TaskOutcome>
where
    P: StatsProvider + 'static,
{
    if tasks.is_empty() {
        return Vec::new();
    }
    let total = tasks.len();
    let workers = effective_workers(worker_count, total);
    let started = Instant::now();

    let outcomes: Vec<TaskOutcome> = stream::iter(tasks)
        .map(|task| {
            let fetcher = fetcher.clone();
            let kept = task.clone();
            // Spawned so a panicking fetch surfaces as a JoinError instead of
            // unwinding through the batch.
            let handle = tokio::spawn(async move {
                let result = fetcher.fetch(&task).await;
                TaskOutcome { task, result }
            });
            async move {
                handle.await.unwrap_or_else(|e| TaskOutcome {
                    task: kept,
                    result: Err(FetchError::Panicked(e.to_string())),
                })
            }
        })
        .buffer_unordered(workers)
        .collect()
        .await;

    let summary = BatchSummary::of(&outcomes);
    info!(
        tasks = total,
        workers,
        succeeded = summary.succeeded,
        aborted = summary.aborted,
        gave_up = summary.gave_up,
        cancelled = summary.cancelled,
        panicked = summary.panicked,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "batch finished"
    );
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::AttemptError;
    use crate::retry::{Backoff, CancelFlag, RetryPolicy};
    use async_trait::async_trait;
    use proxy_pool::{ProxyAddress, ProxyPool};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use table_schema::{Fragment, Value};

    /// {1,3} succeed at once, {2} after one transient failure, {4} is a 404,
    /// {5} never answers usefully.
    struct Scripted {
        calls: Mutex<HashMap<String, u32>>,
    }

    #[async_trait]
    impl StatsProvider for Scripted {
        async fn fetch(&self, task: &FetchTask, _: &ProxyAddress) -> Result<RawResult, AttemptError> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                let n = calls.entry(task.entity.clone()).or_insert(0);
                *n += 1;
                *n
            };
            let ok = || {
                Ok(RawResult::new(vec![Fragment::from_parts(
                    "CommonPlayerInfo",
                    &["person_id"],
                    vec![vec![Value::text(task.entity.clone())]],
                )]))
            };
            match task.entity.as_str() {
                "1" | "3" => ok(),
                "2" if n >= 2 => ok(),
                "4" => Err(AttemptError::Permanent { status: 404, message: "unknown player".into() }),
                _ => Err(AttemptError::Transient("proxy refused".into())),
            }
        }
    }

    fn fetcher<P: StatsProvider>(provider: P) -> Arc<Fetcher<P>> {
        let pool = Arc::new(ProxyPool::from_live(vec![ProxyAddress::parse("10.0.0.1:3128").unwrap()]));
        let policy = RetryPolicy { max_attempts: Some(3), backoff: Backoff::None, attempt_timeout: Duration::from_secs(1) };
        Arc::new(Fetcher::new(provider, pool, policy, CancelFlag::new()))
    }

    fn player_tasks(ids: &[&str]) -> Vec<FetchTask> {
        ids.iter().map(|id| FetchTask::player_info(id)).collect()
    }

    #[tokio::test]
    async fn partial_failure_is_attributed_per_task() {
        let f = fetcher(Scripted { calls: Mutex::new(HashMap::new()) });
        let outcomes = run_batch(f.clone(), player_tasks(&["1", "2", "3", "4", "5"]), 250).await;

        assert_eq!(outcomes.len(), 5);
        let by_entity: HashMap<&str, &Result<RawResult, FetchError>> =
            outcomes.iter().map(|o| (o.task.entity.as_str(), &o.result)).collect();
        for ok in ["1", "2", "3"] {
            assert!(by_entity[ok].is_ok(), "entity {ok}");
        }
        assert!(matches!(by_entity["4"], Err(FetchError::Aborted { status: 404, .. })));
        assert!(matches!(by_entity["5"], Err(FetchError::GaveUp { attempts: 3, .. })));

        assert_eq!(
            BatchSummary::of(&outcomes),
            BatchSummary { succeeded: 3, aborted: 1, gave_up: 1, cancelled: 0, panicked: 0 }
        );
        assert_eq!(f.provider().calls.lock().unwrap()["5"], 3);
    }

    /// Tracks how many fetches run at the same time.
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl StatsProvider for Gauge {
        async fn fetch(&self, _: &FetchTask, _: &ProxyAddress) -> Result<RawResult, AttemptError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(RawResult::default())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_never_exceeds_worker_count() {
        let f = fetcher(Gauge { current: AtomicUsize::new(0), peak: AtomicUsize::new(0) });
        let ids: Vec<String> = (0..24).map(|i| i.to_string()).collect();
        let tasks = ids.iter().map(|id| FetchTask::player_info(id)).collect();

        let outcomes = run_batch(f.clone(), tasks, 3).await;
        assert_eq!(outcomes.len(), 24);
        let peak = f.provider().peak.load(Ordering::SeqCst);
        assert!((1..=3).contains(&peak), "peak {peak}");
    }

    struct Explosive;

    #[async_trait]
    impl StatsProvider for Explosive {
        async fn fetch(&self, task: &FetchTask, _: &ProxyAddress) -> Result<RawResult, AttemptError> {
            if task.entity == "boom" {
                panic!("malformed row");
            }
            Ok(RawResult::default())
        }
    }

    #[tokio::test]
    async fn panicking_worker_becomes_that_tasks_error() {
        let outcomes = run_batch(fetcher(Explosive), player_tasks(&["a", "boom", "b"]), 2).await;
        let panicked: Vec<_> = outcomes.iter().filter(|o| matches!(o.result, Err(FetchError::Panicked(_)))).collect();
        assert_eq!(panicked.len(), 1);
        assert_eq!(panicked[0].task.entity, "boom");
        assert_eq!(outcomes.iter().filter(|o| o.result.is_ok()).count(), 2);
    }

    #[tokio::test]
    async fn empty_batch_returns_nothing() {
        assert!(run_batch(fetcher(Explosive), Vec::new(), 10).await.is_empty());
    }

    #[test]
    fn worker_count_is_clamped() {
        assert_eq!(effective_workers(250, 5), 5);
        assert_eq!(effective_workers(1000, 10_000), MAX_WORKERS);
        assert_eq!(effective_workers(0, 10), 1);
        assert_eq!(effective_workers(8, 0), 1);
    }
}
