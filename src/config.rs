use proxy_pool::{PoolConfig, DEFAULT_LIST_URLS, DEFAULT_PROBE_URL};
use stats_fetcher::{Backoff, RetryPolicy, DEFAULT_BASE_URL, MAX_WORKERS};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Every tunable of a sync run. Read once in `main` and handed to the
/// components that need it.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub db_path: PathBuf,
    pub log_dir: PathBuf,
    pub workers: usize,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    pub attempt_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub proxy_lists: Vec<String>,
    pub static_proxies: Vec<String>,
    pub probe_url: String,
    pub probe_concurrency: usize,
    pub base_url: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("nba-db/nba.sqlite"),
            log_dir: PathBuf::from("logs"),
            workers: MAX_WORKERS,
            max_attempts: Some(25),
            attempt_timeout: Duration::from_secs(3),
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_secs(2),
            proxy_lists: DEFAULT_LIST_URLS.iter().map(|u| u.to_string()).collect(),
            static_proxies: Vec::new(),
            probe_url: DEFAULT_PROBE_URL.to_string(),
            probe_concurrency: 250,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset or unparseable values
    /// keep their defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let parse = |key: &str| get(key).and_then(|v| v.trim().parse::<u64>().ok());
        let list = |key: &str| {
            get(key).map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
        };

        Self {
            db_path: get("NBA_SYNC_DB_PATH").map(PathBuf::from).unwrap_or(d.db_path),
            log_dir: get("NBA_SYNC_LOG_DIR").map(PathBuf::from).unwrap_or(d.log_dir),
            workers: parse("NBA_SYNC_WORKERS").map(|v| v as usize).unwrap_or(d.workers),
            max_attempts: match parse("NBA_SYNC_MAX_ATTEMPTS") {
                Some(0) => None,
                Some(n) => Some(u32::try_from(n).unwrap_or(u32::MAX)),
                None => d.max_attempts,
            },
            attempt_timeout: parse("NBA_SYNC_ATTEMPT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.attempt_timeout),
            backoff_base: parse("NBA_SYNC_BACKOFF_MS").map(Duration::from_millis).unwrap_or(d.backoff_base),
            backoff_cap: d.backoff_cap,
            proxy_lists: list("NBA_SYNC_PROXY_LISTS").unwrap_or(d.proxy_lists),
            static_proxies: list("NBA_SYNC_PROXIES").unwrap_or(d.static_proxies),
            probe_url: get("NBA_SYNC_PROBE_URL").unwrap_or(d.probe_url),
            probe_concurrency: parse("NBA_SYNC_PROBE_CONCURRENCY")
                .map(|v| v as usize)
                .unwrap_or(d.probe_concurrency),
            base_url: get("NBA_SYNC_BASE_URL").unwrap_or(d.base_url),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            probe_url: self.probe_url.clone(),
            probe_timeout: self.attempt_timeout,
            max_concurrent_probes: self.probe_concurrency,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let backoff = if self.backoff_base.is_zero() {
            Backoff::None
        } else {
            Backoff::Exponential { base: self.backoff_base, cap: self.backoff_cap }
        };
        RetryPolicy { max_attempts: self.max_attempts, backoff, attempt_timeout: self.attempt_timeout }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(pairs: &[(&str, &str)]) -> SyncConfig {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        SyncConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn unset_values_fall_back_to_defaults() {
        assert_eq!(from(&[]), SyncConfig::default());
        assert_eq!(from(&[("NBA_SYNC_WORKERS", "lots")]).workers, 250);
    }

    #[test]
    fn zero_attempts_means_unbounded() {
        assert_eq!(from(&[("NBA_SYNC_MAX_ATTEMPTS", "0")]).max_attempts, None);
        assert_eq!(from(&[("NBA_SYNC_MAX_ATTEMPTS", "7")]).retry_policy().max_attempts, Some(7));
    }

    #[test]
    fn lists_are_comma_separated() {
        let cfg = from(&[("NBA_SYNC_PROXIES", " 1.2.3.4:80, ,5.6.7.8:3128 "), ("NBA_SYNC_PROXY_LISTS", "")]);
        assert_eq!(cfg.static_proxies, vec!["1.2.3.4:80", "5.6.7.8:3128"]);
        assert!(cfg.proxy_lists.is_empty());
    }

    #[test]
    fn zero_backoff_disables_pauses() {
        let policy = from(&[("NBA_SYNC_BACKOFF_MS", "0")]).retry_policy();
        assert_eq!(policy.backoff, Backoff::None);
    }
}
