use proxy_pool::{ProxyAddress, ProxyPool};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::provider::{AttemptError, StatsProvider};
use crate::task::{FetchTask, RawResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    None,
    Constant(Duration),
    /// `base * 2^(attempt-1)`, never more than `cap`.
    Exponential { base: Duration, cap: Duration },
}

impl Backoff {
    /// Pause after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Constant(d) => d,
            Backoff::Exponential { base, cap } => {
                let factor = 1u32 << attempt.saturating_sub(1).min(16);
                base.saturating_mul(factor).min(cap)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// `None` retries transient failures forever.
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(25),
            backoff: Backoff::Exponential { base: Duration::from_millis(100), cap: Duration::from_secs(2) },
            attempt_timeout: Duration::from_secs(3),
        }
    }
}

/// Shared stop switch. Checked between attempts; an attempt already in
/// flight runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("aborted by HTTP {status}: {message}")]
    Aborted { status: u16, message: String },
    #[error("gave up after {attempts} attempts, last error: {last_error}")]
    GaveUp { attempts: u32, last_error: String },
    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
    #[error("worker panicked: {0}")]
    Panicked(String),
}

impl FetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Aborted { .. } => "aborted",
            FetchError::GaveUp { .. } => "gave_up",
            FetchError::Cancelled { .. } => "cancelled",
            FetchError::Panicked(_) => "panicked",
        }
    }
}

pub struct Fetcher<P> {
    provider: P,
    pool: Arc<ProxyPool>,
    policy: RetryPolicy,
    cancel: CancelFlag,
}

impl<P: StatsProvider> Fetcher<P> {
    pub fn new(provider: P, pool: Arc<ProxyPool>, policy: RetryPolicy, cancel: CancelFlag) -> Self {
        Self { provider, pool, policy, cancel }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    /// Retries transient failures on a fresh proxy until success, a
    /// permanent failure, the attempt cap, or cancellation.
    pub async fn fetch(&self, task: &FetchTask) -> Result<RawResult, FetchError> {
        let mut attempts = 0u32;
        let mut last_error = String::from("no attempt made");
        let mut last_proxy: Option<ProxyAddress> = None;

        loop {
            if self.cancel.is_cancelled() {
                return Err(FetchError::Cancelled { attempts });
            }
            if self.policy.max_attempts.is_some_and(|max| attempts >= max) {
                warn!(entity = %task.entity, endpoint = %task.endpoint, attempts, "giving up: {last_error}");
                return Err(FetchError::GaveUp { attempts, last_error });
            }
            attempts += 1;

            let proxy = match self.pool.pick_other(last_proxy) {
                Ok(p) => p,
                Err(e) => {
                    last_error = e.to_string();
                    debug!(entity = %task.entity, attempt = attempts, "pool exhausted, refreshing");
                    self.pool.refresh_if_exhausted().await;
                    self.pause(attempts).await;
                    continue;
                }
            };

            let outcome = tokio::time::timeout(self.policy.attempt_timeout, self.provider.fetch(task, &proxy)).await;
            match outcome {
                Ok(Ok(raw)) => return Ok(raw),
                Ok(Err(AttemptError::Permanent { status, message })) => {
                    warn!(entity = %task.entity, endpoint = %task.endpoint, status, "permanent failure, not retrying");
                    return Err(FetchError::Aborted { status, message });
                }
                Ok(Err(AttemptError::Transient(msg))) => last_error = msg,
                Err(_) => last_error = format!("attempt timed out after {:?} via {proxy}", self.policy.attempt_timeout),
            }
            debug!(entity = %task.entity, endpoint = %task.endpoint, attempt = attempts, "{last_error}");
            last_proxy = Some(proxy);
            self.pause(attempts).await;
        }
    }

    async fn pause(&self, attempt: u32) {
        let delay = self.policy.backoff.delay(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Fails transiently `failures` times per entity, then succeeds. Entity
    /// "404" is rejected outright.
    struct Flaky {
        failures: u32,
        calls: Mutex<HashMap<String, u32>>,
        proxies: Mutex<Vec<ProxyAddress>>,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self { failures, calls: Mutex::new(HashMap::new()), proxies: Mutex::new(Vec::new()) }
        }

        fn calls(&self, entity: &str) -> u32 {
            self.calls.lock().unwrap().get(entity).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl StatsProvider for Flaky {
        async fn fetch(&self, task: &FetchTask, proxy: &ProxyAddress) -> Result<RawResult, AttemptError> {
            self.proxies.lock().unwrap().push(*proxy);
            let n = {
                let mut calls = self.calls.lock().unwrap();
                let n = calls.entry(task.entity.clone()).or_insert(0);
                *n += 1;
                *n
            };
            if task.entity == "404" {
                return Err(AttemptError::Permanent { status: 404, message: "not found".into() });
            }
            if n <= self.failures {
                return Err(AttemptError::Transient(format!("connection reset ({n})")));
            }
            Ok(RawResult::default())
        }
    }

    fn pool() -> Arc<ProxyPool> {
        Arc::new(ProxyPool::from_live(vec![
            ProxyAddress::parse("10.0.0.1:80").unwrap(),
            ProxyAddress::parse("10.0.0.2:80").unwrap(),
        ]))
    }

    fn policy(max: Option<u32>) -> RetryPolicy {
        RetryPolicy { max_attempts: max, backoff: Backoff::None, attempt_timeout: Duration::from_secs(1) }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_on_another_proxy() {
        let fetcher = Fetcher::new(Flaky::new(1), pool(), policy(Some(3)), CancelFlag::new());
        assert!(fetcher.fetch(&FetchTask::player_info("2")).await.is_ok());
        assert_eq!(fetcher.provider().calls("2"), 2);

        let used = fetcher.provider().proxies.lock().unwrap().clone();
        assert_ne!(used[0], used[1]);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let fetcher = Fetcher::new(Flaky::new(0), pool(), policy(Some(25)), CancelFlag::new());
        let err = fetcher.fetch(&FetchTask::player_info("404")).await.unwrap_err();
        assert_eq!(err, FetchError::Aborted { status: 404, message: "not found".into() });
        assert_eq!(fetcher.provider().calls("404"), 1);
    }

    #[tokio::test]
    async fn cap_reached_gives_up_distinctly() {
        let fetcher = Fetcher::new(Flaky::new(u32::MAX), pool(), policy(Some(3)), CancelFlag::new());
        let err = fetcher.fetch(&FetchTask::player_info("5")).await.unwrap_err();
        assert!(matches!(err, FetchError::GaveUp { attempts: 3, .. }), "{err:?}");
        assert_eq!(err.kind(), "gave_up");
        assert_eq!(fetcher.provider().calls("5"), 3);
    }

    #[tokio::test]
    async fn unbounded_policy_keeps_going() {
        let fetcher = Fetcher::new(Flaky::new(40), pool(), policy(None), CancelFlag::new());
        assert!(fetcher.fetch(&FetchTask::player_info("7")).await.is_ok());
        assert_eq!(fetcher.provider().calls("7"), 41);
    }

    #[tokio::test]
    async fn exhausted_pool_counts_as_transient() {
        let empty = Arc::new(ProxyPool::from_live(Vec::new()));
        let fetcher = Fetcher::new(Flaky::new(0), empty, policy(Some(2)), CancelFlag::new());
        let err = fetcher.fetch(&FetchTask::player_info("1")).await.unwrap_err();
        assert_eq!(err, FetchError::GaveUp { attempts: 2, last_error: "no live proxy available".into() });
        assert_eq!(fetcher.provider().calls("1"), 0);
    }

    #[tokio::test]
    async fn exhausted_pool_refreshes_and_recovers() {
        use proxy_pool::{PoolConfig, StaticListSource};
        use std::net::Ipv4Addr;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        // Forward proxy that answers the health probe with 200.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = sock.read(&mut buf).await;
                    let _ = sock
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                        .await;
                });
            }
        });
        let proxy = ProxyAddress { host: Ipv4Addr::LOCALHOST, port };

        let config = PoolConfig { probe_timeout: Duration::from_secs(2), ..PoolConfig::default() };
        let pool = Arc::new(ProxyPool::new(vec![Box::new(StaticListSource::new([proxy.to_string()]))], config));
        assert_eq!(pool.live_count(), 0);

        let fetcher = Fetcher::new(Flaky::new(0), pool.clone(), policy(Some(3)), CancelFlag::new());
        assert!(fetcher.fetch(&FetchTask::player_info("1")).await.is_ok());
        assert_eq!(pool.live_count(), 1);
        assert_eq!(fetcher.provider().proxies.lock().unwrap().as_slice(), &[proxy]);
    }

    #[tokio::test]
    async fn cancelled_fetch_stops_before_the_next_attempt() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let fetcher = Fetcher::new(Flaky::new(0), pool(), policy(None), cancel);
        let err = fetcher.fetch(&FetchTask::player_info("1")).await.unwrap_err();
        assert_eq!(err, FetchError::Cancelled { attempts: 0 });
    }

    #[tokio::test]
    async fn slow_attempt_times_out_and_is_retried() {
        struct SlowOnce(Mutex<bool>);
        #[async_trait]
        impl StatsProvider for SlowOnce {
            async fn fetch(&self, _: &FetchTask, _: &ProxyAddress) -> Result<RawResult, AttemptError> {
                let first = std::mem::replace(&mut *self.0.lock().unwrap(), false);
                if first {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok(RawResult::default())
            }
        }

        let quick = RetryPolicy { attempt_timeout: Duration::from_millis(50), ..policy(Some(2)) };
        let fetcher = Fetcher::new(SlowOnce(Mutex::new(true)), pool(), quick, CancelFlag::new());
        assert!(fetcher.fetch(&FetchTask::player_info("1")).await.is_ok());
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let b = Backoff::Exponential { base: Duration::from_millis(100), cap: Duration::from_secs(2) };
        assert_eq!(b.delay(1), Duration::from_millis(100));
        assert_eq!(b.delay(3), Duration::from_millis(400));
        assert_eq!(b.delay(10), Duration::from_secs(2));
        assert_eq!(b.delay(u32::MAX), Duration::from_secs(2));
        assert_eq!(Backoff::Constant(Duration::from_millis(5)).delay(9), Duration::from_millis(5));
    }
}
