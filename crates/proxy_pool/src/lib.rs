//! Pool of volatile public HTTP proxies.
//!
//! Candidates come from one or more list sources, are probed concurrently,
//! and the survivors form the live set every outgoing request draws from.
//! Addresses that fail later are not written back; the next refresh drops
//! them.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use rand::seq::SliceRandom;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{OnceLock, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The two public lists the pool has always been seeded from.
pub const DEFAULT_LIST_URLS: &[&str] = &[
    "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt",
    "https://raw.githubusercontent.com/monosans/proxy-list/main/proxies/http.txt",
];

pub const DEFAULT_PROBE_URL: &str = "http://example.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyAddress {
    pub host: Ipv4Addr,
    pub port: u16,
}

fn address_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(\d{1,5})$").expect("static proxy pattern")
    })
}

impl ProxyAddress {
    /// Accepts only numeric `a.b.c.d:port`. Hostnames, missing ports and
    /// out-of-range octets are rejected.
    pub fn parse(line: &str) -> Option<Self> {
        let caps = address_pattern().captures(line.trim())?;
        let host = caps[1].parse::<Ipv4Addr>().ok()?;
        let port = caps[2].parse::<u16>().ok().filter(|p| *p != 0)?;
        Some(Self { host, port })
    }

    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ProxyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Deduplicated, well-formed addresses from raw list lines.
pub fn parse_candidates<I, S>(lines: I) -> HashSet<ProxyAddress>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines.into_iter().filter_map(|l| ProxyAddress::parse(l.as_ref())).collect()
}

// ── List sources ─────────────────────────────────────────────────────────────

#[async_trait]
pub trait ProxyListSource: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch_lines(&self) -> Result<Vec<String>>;
}

/// Plain-text list served over HTTP, one `host:port` per line. Some lists
/// append `|country|...` metadata after the address; it is cut off here.
pub struct HttpListSource {
    url: String,
    client: reqwest::Client,
}

impl HttpListSource {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { url: url.into(), client }
    }

    pub fn defaults() -> Vec<Box<dyn ProxyListSource>> {
        DEFAULT_LIST_URLS
            .iter()
            .map(|u| Box::new(HttpListSource::new(*u)) as Box<dyn ProxyListSource>)
            .collect()
    }
}

pub fn clean_list_lines(body: &str) -> Vec<String> {
    body.lines()
        .map(|l| l.split('|').next().unwrap_or_default().trim())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl ProxyListSource for HttpListSource {
    fn name(&self) -> &str {
        &self.url
    }

    async fn fetch_lines(&self) -> Result<Vec<String>> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("GET {}", self.url))?
            .error_for_status()
            .with_context(|| format!("GET {}", self.url))?
            .text()
            .await
            .context("proxy list body")?;
        Ok(clean_list_lines(&body))
    }
}

/// Fixed list from configuration.
pub struct StaticListSource {
    lines: Vec<String>,
}

impl StaticListSource {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { lines: lines.into_iter().map(Into::into).collect() }
    }
}

#[async_trait]
impl ProxyListSource for StaticListSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch_lines(&self) -> Result<Vec<String>> {
        Ok(self.lines.clone())
    }
}

// ── Pool ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("no live proxy available")]
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub probe_url: String,
    pub probe_timeout: Duration,
    pub max_concurrent_probes: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            probe_url: DEFAULT_PROBE_URL.to_string(),
            probe_timeout: Duration::from_secs(3),
            max_concurrent_probes: 250,
        }
    }
}

pub struct ProxyPool {
    live: RwLock<Vec<ProxyAddress>>,
    sources: Vec<Box<dyn ProxyListSource>>,
    config: PoolConfig,
    last_candidates: AtomicUsize,
    refreshing: tokio::sync::Mutex<()>,
}

impl ProxyPool {
    pub fn new(sources: Vec<Box<dyn ProxyListSource>>, config: PoolConfig) -> Self {
        Self {
            live: RwLock::new(Vec::new()),
            sources,
            config,
            last_candidates: AtomicUsize::new(0),
            refreshing: tokio::sync::Mutex::new(()),
        }
    }

    /// A pool whose live set is given up front. It has no sources, so a
    /// refresh empties it.
    pub fn from_live(live: Vec<ProxyAddress>) -> Self {
        let pool = Self::new(Vec::new(), PoolConfig::default());
        *pool.live.write().unwrap_or_else(PoisonError::into_inner) = live;
        pool
    }

    /// Pulls every source and returns the deduplicated well-formed addresses.
    /// A failing source is logged and skipped.
    pub async fn refresh_candidates(&self) -> HashSet<ProxyAddress> {
        let mut candidates = HashSet::new();
        for source in &self.sources {
            match source.fetch_lines().await {
                Ok(lines) => {
                    let before = candidates.len();
                    candidates.extend(parse_candidates(&lines));
                    debug!(source = source.name(), lines = lines.len(), new = candidates.len() - before, "proxy list fetched");
                }
                Err(e) => warn!(source = source.name(), "proxy list unavailable: {e:#}"),
            }
        }
        candidates
    }

    /// GET of the probe URL through `candidate`. Any failure means not live.
    pub async fn health_check(&self, candidate: &ProxyAddress) -> bool {
        probe(candidate, &self.config.probe_url, self.config.probe_timeout).await
    }

    /// Re-probes all candidates and atomically swaps in the survivors.
    /// Returns the new live count.
    pub async fn refresh(&self) -> usize {
        let started = Instant::now();
        let candidates = self.refresh_candidates().await;
        self.last_candidates.store(candidates.len(), Ordering::Relaxed);

        let width = self.config.max_concurrent_probes.max(1);
        let mut live: Vec<ProxyAddress> = stream::iter(candidates)
            .map(|c| async move { (c, self.health_check(&c).await) })
            .buffer_unordered(width)
            .filter_map(|(c, ok)| async move { ok.then_some(c) })
            .collect()
            .await;
        live.sort();

        let count = live.len();
        *self.live.write().unwrap_or_else(PoisonError::into_inner) = live;
        info!(
            candidates = self.last_candidates.load(Ordering::Relaxed),
            live = count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "proxy pool refreshed"
        );
        count
    }

    /// Refreshes only when the live set is empty, and never twice at once:
    /// callers that queue behind a running refresh reuse its result.
    pub async fn refresh_if_exhausted(&self) -> usize {
        let _guard = self.refreshing.lock().await;
        let current = self.live_count();
        if current > 0 {
            return current;
        }
        self.refresh().await
    }

    pub fn pick(&self) -> Result<ProxyAddress, PoolError> {
        let live = self.live.read().unwrap_or_else(PoisonError::into_inner);
        live.choose(&mut rand::thread_rng()).copied().ok_or(PoolError::Exhausted)
    }

    /// Like `pick`, but avoids `avoid` whenever another address is live.
    pub fn pick_other(&self, avoid: Option<ProxyAddress>) -> Result<ProxyAddress, PoolError> {
        let Some(avoid) = avoid else { return self.pick() };
        let live = self.live.read().unwrap_or_else(PoisonError::into_inner);
        let others: Vec<&ProxyAddress> = live.iter().filter(|p| **p != avoid).collect();
        match others.choose(&mut rand::thread_rng()) {
            Some(p) => Ok(**p),
            None => live.first().copied().ok_or(PoolError::Exhausted),
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Candidate count seen by the most recent refresh.
    pub fn candidate_count(&self) -> usize {
        self.last_candidates.load(Ordering::Relaxed)
    }
}

async fn probe(candidate: &ProxyAddress, probe_url: &str, timeout: Duration) -> bool {
    let proxy = match reqwest::Proxy::all(candidate.url()) {
        Ok(p) => p,
        Err(_) => return false,
    };
    let client = match reqwest::Client::builder().proxy(proxy).timeout(timeout).build() {
        Ok(c) => c,
        Err(_) => return false,
    };
    match client.get(probe_url).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(e) => {
            debug!(proxy = %candidate, "probe failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal forward proxy that answers every request with `status`.
    async fn fake_proxy(status: &'static str) -> ProxyAddress {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = sock.read(&mut buf).await;
                    let resp = format!("HTTP/1.1 {status}\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok");
                    let _ = sock.write_all(resp.as_bytes()).await;
                });
            }
        });
        ProxyAddress { host: Ipv4Addr::LOCALHOST, port }
    }

    /// Accepts connections and never answers.
    async fn silent_proxy() -> ProxyAddress {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });
        ProxyAddress { host: Ipv4Addr::LOCALHOST, port }
    }

    async fn closed_port() -> ProxyAddress {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        ProxyAddress { host: Ipv4Addr::LOCALHOST, port }
    }

    fn quick_config() -> PoolConfig {
        PoolConfig { probe_timeout: Duration::from_millis(300), ..PoolConfig::default() }
    }

    fn pool_of(lines: Vec<String>) -> ProxyPool {
        ProxyPool::new(vec![Box::new(StaticListSource::new(lines))], quick_config())
    }

    #[test]
    fn only_numeric_host_port_is_accepted() {
        assert_eq!(
            ProxyAddress::parse("1.2.3.4:8080"),
            Some(ProxyAddress { host: Ipv4Addr::new(1, 2, 3, 4), port: 8080 })
        );
        assert_eq!(ProxyAddress::parse("abc:123"), None);
        assert_eq!(ProxyAddress::parse("1.2.3.4"), None);
        assert_eq!(ProxyAddress::parse("300.2.3.4:80"), None);
        assert_eq!(ProxyAddress::parse("1.2.3.4:99999"), None);
    }

    #[test]
    fn candidates_are_deduplicated() {
        let set = parse_candidates(["1.2.3.4:80", " 1.2.3.4:80 ", "junk", "5.6.7.8:3128"]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn list_metadata_and_comments_are_stripped() {
        let lines = clean_list_lines("# header\n1.2.3.4:80|US|elite\n\n5.6.7.8:3128\n");
        assert_eq!(lines, vec!["1.2.3.4:80", "5.6.7.8:3128"]);
    }

    #[tokio::test]
    async fn answering_proxy_is_live() {
        let pool = pool_of(Vec::new());
        assert!(pool.health_check(&fake_proxy("200 OK").await).await);
    }

    #[tokio::test]
    async fn failed_probes_return_false() {
        let pool = pool_of(Vec::new());
        assert!(!pool.health_check(&closed_port().await).await);
        assert!(!pool.health_check(&silent_proxy().await).await);
        assert!(!pool.health_check(&fake_proxy("503 Service Unavailable").await).await);
    }

    #[tokio::test]
    async fn refresh_keeps_only_live_candidates() {
        let good = fake_proxy("200 OK").await;
        let dead = closed_port().await;
        let pool = pool_of(vec![good.to_string(), dead.to_string(), "not-a-proxy".into()]);

        assert_eq!(pool.refresh().await, 1);
        assert_eq!(pool.candidate_count(), 2);
        assert_eq!(pool.pick(), Ok(good));
    }

    #[tokio::test]
    async fn failing_source_is_skipped() {
        struct Broken;
        #[async_trait]
        impl ProxyListSource for Broken {
            fn name(&self) -> &str {
                "broken"
            }
            async fn fetch_lines(&self) -> Result<Vec<String>> {
                anyhow::bail!("list host down")
            }
        }

        let good = fake_proxy("200 OK").await;
        let pool = ProxyPool::new(
            vec![Box::new(Broken), Box::new(StaticListSource::new([good.to_string()]))],
            quick_config(),
        );
        assert_eq!(pool.refresh_candidates().await.len(), 1);
    }

    #[tokio::test]
    async fn refresh_if_exhausted_leaves_live_pool_alone() {
        let addr = ProxyAddress::parse("10.0.0.1:8080").unwrap();
        let pool = ProxyPool::from_live(vec![addr]);
        assert_eq!(pool.refresh_if_exhausted().await, 1);
        assert_eq!(pool.pick(), Ok(addr));
    }

    #[test]
    fn empty_pool_is_exhausted() {
        let pool = ProxyPool::from_live(Vec::new());
        assert_eq!(pool.pick(), Err(PoolError::Exhausted));
        assert_eq!(pool.pick_other(None), Err(PoolError::Exhausted));
    }

    #[test]
    fn pick_other_avoids_the_failed_address() {
        let a = ProxyAddress::parse("10.0.0.1:8080").unwrap();
        let b = ProxyAddress::parse("10.0.0.2:8080").unwrap();
        let pool = ProxyPool::from_live(vec![a, b]);
        for _ in 0..20 {
            assert_eq!(pool.pick_other(Some(a)), Ok(b));
        }
        let single = ProxyPool::from_live(vec![a]);
        assert_eq!(single.pick_other(Some(a)), Ok(a));
    }
}
