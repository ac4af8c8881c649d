use async_trait::async_trait;
use proxy_pool::ProxyAddress;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, ORIGIN, REFERER, USER_AGENT};
use reqwest::StatusCode;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use table_schema::{Fragment, Value};
use tracing::debug;

use crate::task::{FetchTask, RawResult};

pub const DEFAULT_BASE_URL: &str = "https://stats.nba.com/stats";

/// Outcome of one failed attempt, as seen by the retry loop.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AttemptError {
    /// Worth retrying through another proxy.
    #[error("transient: {0}")]
    Transient(String),
    /// The provider rejected the request itself; no proxy will change that.
    #[error("HTTP {status}: {message}")]
    Permanent { status: u16, message: String },
}

#[async_trait]
pub trait StatsProvider: Send + Sync {
    /// One attempt at `task` routed through `proxy`.
    async fn fetch(&self, task: &FetchTask, proxy: &ProxyAddress) -> Result<RawResult, AttemptError>;
}

/// Client for the `stats.nba.com` JSON API.
pub struct HttpStatsProvider {
    base_url: String,
    timeout: Duration,
    clients: Mutex<HashMap<ProxyAddress, reqwest::Client>>,
}

impl HttpStatsProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn url_for(&self, task: &FetchTask) -> String {
        format!("{}/{}", self.base_url, task.endpoint.path())
    }

    fn client_for(&self, proxy: &ProxyAddress) -> Result<reqwest::Client, AttemptError> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(c) = clients.get(proxy) {
            return Ok(c.clone());
        }
        let routed = reqwest::Proxy::all(proxy.url()).map_err(|e| AttemptError::Transient(format!("proxy {proxy}: {e}")))?;
        let client = reqwest::Client::builder()
            .default_headers(browser_headers())
            .proxy(routed)
            .timeout(self.timeout)
            .gzip(true)
            .build()
            .map_err(|e| AttemptError::Transient(format!("client for {proxy}: {e}")))?;
        clients.insert(*proxy, client.clone());
        Ok(client)
    }
}

/// The API drops requests that do not look like they come from nba.com.
fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36",
        ),
    );
    headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(ORIGIN, HeaderValue::from_static("https://www.nba.com"));
    headers.insert(REFERER, HeaderValue::from_static("https://www.nba.com/"));
    headers.insert("x-nba-stats-origin", HeaderValue::from_static("stats"));
    headers.insert("x-nba-stats-token", HeaderValue::from_static("true"));
    headers
}

/// 4xx means the request is wrong, except the codes a proxy or rate limiter
/// produces on its own.
pub fn is_permanent(status: StatusCode) -> bool {
    status.is_client_error() && !matches!(status.as_u16(), 407 | 408 | 429)
}

#[async_trait]
impl StatsProvider for HttpStatsProvider {
    async fn fetch(&self, task: &FetchTask, proxy: &ProxyAddress) -> Result<RawResult, AttemptError> {
        let client = self.client_for(proxy)?;
        let resp = client
            .get(self.url_for(task))
            .query(&task.params)
            .send()
            .await
            .map_err(|e| AttemptError::Transient(format!("via {proxy}: {e}")))?;

        let status = resp.status();
        if is_permanent(status) {
            let message = resp.text().await.unwrap_or_default();
            return Err(AttemptError::Permanent { status: status.as_u16(), message: truncate(&message, 200) });
        }
        if !status.is_success() {
            return Err(AttemptError::Transient(format!("HTTP {status} via {proxy}")));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| AttemptError::Transient(format!("body via {proxy}: {e}")))?;
        let raw = parse_result_sets(&body)?;
        debug!(entity = %task.entity, endpoint = %task.endpoint, %proxy, fragments = raw.fragments.len(), "fetched");
        Ok(raw)
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((i, _)) => format!("{}…", &s[..i]),
        None => s.to_string(),
    }
}

/// Parses the provider's `{"resultSets": [{name, headers, rowSet}]}` body
/// (some endpoints say `resultSet`, singular) into fragments with lowercased
/// column names. Empty or malformed bodies are transient: proxies often
/// return truncated or substituted pages.
pub fn parse_result_sets(body: &str) -> Result<RawResult, AttemptError> {
    if body.trim().is_empty() {
        return Err(AttemptError::Transient("empty body".into()));
    }
    let doc: Json = serde_json::from_str(body).map_err(|e| AttemptError::Transient(format!("malformed body: {e}")))?;

    let sets = match doc.get("resultSets").or_else(|| doc.get("resultSet")) {
        Some(Json::Array(sets)) => sets.iter().collect::<Vec<_>>(),
        Some(set @ Json::Object(_)) => vec![set],
        _ => return Err(AttemptError::Transient("body has no result sets".into())),
    };

    let mut fragments = Vec::with_capacity(sets.len());
    for set in sets {
        let name = set.get("name").and_then(Json::as_str).unwrap_or_default();
        let columns: Vec<String> = set
            .get("headers")
            .and_then(Json::as_array)
            .map(|h| h.iter().filter_map(Json::as_str).map(str::to_lowercase).collect())
            .ok_or_else(|| AttemptError::Transient(format!("result set {name:?} has no headers")))?;
        let rows = set
            .get("rowSet")
            .and_then(Json::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(Json::as_array)
                    .map(|cells| cells.iter().map(json_cell).collect())
                    .collect()
            })
            .unwrap_or_default();
        fragments.push(Fragment::new(name, columns, rows));
    }
    Ok(RawResult::new(fragments))
}

fn json_cell(cell: &Json) -> Value {
    match cell {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
        },
        Json::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}
