//! nba-sync event log.
//! JSONL event stream for skipped entities/tables and run summaries, plus
//! the timing wrapper around fallible async calls.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::fmt::Display;
use std::fs::{self, OpenOptions};
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

pub struct EventLogger {
    log_dir: PathBuf,
}

impl EventLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        let dir = log_dir.into();
        fs::create_dir_all(&dir).ok();
        Self { log_dir: dir }
    }

    pub fn log<T: Serialize>(&self, event: &T) -> Result<()> {
        let date  = Utc::now().format("%Y-%m-%d").to_string();
        let path  = self.log_dir.join(format!("{date}.jsonl"));
        let line  = serde_json::to_string(event)?;
        let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }

    /// Like `log`, but a failed write only produces a warning. The event
    /// stream must never take a sync run down with it.
    pub fn record<T: Serialize>(&self, event: &T) {
        if let Err(e) = self.log(event) {
            tracing::warn!("event log write failed: {e:#}");
        }
    }
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Runs `fut`, logging its start, its end with elapsed milliseconds, and the
/// error if it failed. The result passes through untouched.
pub async fn log_call<T, E, F>(name: &str, fut: F) -> std::result::Result<T, E>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    tracing::debug!(call = name, "start");
    let started = Instant::now();
    let result = fut.await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &result {
        Ok(_)  => tracing::info!(call = name, elapsed_ms, "done"),
        Err(e) => tracing::warn!(call = name, elapsed_ms, "failed: {e}"),
    }
    result
}

// ── Event types ──────────────────────────────────────────────────────────────

#[derive(Serialize, Debug)]
pub struct EntitySkippedEvent {
    pub ts:       String,
    pub event:    &'static str,   // "ENTITY_SKIPPED"
    pub step:     String,
    pub entity:   String,
    pub endpoint: String,
    pub kind:     String,         // "aborted" | "gave_up" | "cancelled" | "panicked" | "schema"
    pub detail:   String,
}

#[derive(Serialize, Debug)]
pub struct TableSkippedEvent {
    pub ts:     String,
    pub event:  &'static str,     // "TABLE_SKIPPED"
    pub table:  String,
    pub reason: String,
}

#[derive(Serialize, Debug)]
pub struct TableWrittenEvent {
    pub ts:    String,
    pub event: &'static str,      // "TABLE_WRITTEN"
    pub table: String,
    pub mode:  String,            // "replace" | "append"
    pub rows:  usize,
}

#[derive(Serialize, Debug)]
pub struct ProxyPoolReadyEvent {
    pub ts:         String,
    pub event:      &'static str, // "PROXY_POOL_READY"
    pub candidates: usize,
    pub live:       usize,
}

#[derive(Serialize, Debug)]
pub struct SyncFinishedEvent {
    pub ts:               String,
    pub event:            &'static str, // "SYNC_FINISHED"
    pub workflow:         String,
    pub tables_written:   usize,
    pub tables_skipped:   usize,
    pub entities_skipped: usize,
    pub elapsed_secs:     f64,
}
