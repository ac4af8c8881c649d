//! Resilient fetching from the stats provider: endpoint client, the
//! retrying fetcher that rotates proxies between attempts, and the fan-out
//! coordinator that runs a batch of tasks on a bounded worker pool.

pub mod batch;
pub mod provider;
pub mod retry;
pub mod task;

pub use batch::{effective_workers, run_batch, BatchSummary, TaskOutcome, MAX_WORKERS};
pub use provider::{AttemptError, HttpStatsProvider, StatsProvider, DEFAULT_BASE_URL};
pub use retry::{Backoff, CancelFlag, FetchError, Fetcher, RetryPolicy};
pub use task::{season_label, season_start_year, Endpoint, FetchTask, RawResult, SEASON_TYPES};
