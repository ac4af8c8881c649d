//! nba-sync: keeps a SQLite copy of the NBA stats API up to date.
//!
//!   nba-sync bootstrap   full extraction, every table replaced
//!   nba-sync daily       games since the newest stored game, appended
//!   nba-sync monthly     players, teams and draft tables replaced
//!
//! Settings come from the environment (`.env` honoured); see `SyncConfig`.

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use logger::{log_call, EventLogger};
use nba_sync::config::SyncConfig;
use nba_sync::store::SqliteStore;
use nba_sync::sync::{Orchestrator, SyncOutcome, SyncReport};
use proxy_pool::{HttpListSource, ProxyListSource, ProxyPool, StaticListSource};
use stats_fetcher::{CancelFlag, Fetcher, HttpStatsProvider};
use std::env;
use std::fs::File;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "nba-sync", version, about = "Sync NBA stats into SQLite through a rotating proxy pool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Extract everything and replace every table.
    Bootstrap,
    /// Append games played since the newest stored game.
    Daily,
    /// Refresh players, teams, team details and draft tables.
    Monthly,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let cli = Cli::parse();
    let cfg = SyncConfig::from_env();
    info!(db = %cfg.db_path.display(), workers = cfg.workers, "nba-sync starting");

    // Single instance lock
    let lock_file_path = env::temp_dir().join("nba_sync.lock");
    let lock_file = File::create(&lock_file_path)
        .with_context(|| format!("create lock file {}", lock_file_path.display()))?;
    let mut lock = fd_lock::RwLock::new(lock_file);
    let Ok(_write_guard) = lock.try_write() else {
        bail!("another nba-sync instance holds {}", lock_file_path.display());
    };

    let store = SqliteStore::open(&cfg.db_path)
        .with_context(|| format!("open destination {}", cfg.db_path.display()))?;

    let mut sources: Vec<Box<dyn ProxyListSource>> = cfg
        .proxy_lists
        .iter()
        .map(|url| Box::new(HttpListSource::new(url.as_str())) as Box<dyn ProxyListSource>)
        .collect();
    if !cfg.static_proxies.is_empty() {
        sources.push(Box::new(StaticListSource::new(cfg.static_proxies.iter())));
    }
    let pool = Arc::new(ProxyPool::new(sources, cfg.pool_config()));

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing in-flight attempts");
                cancel.cancel();
            }
        });
    }

    let provider = HttpStatsProvider::new(cfg.base_url.as_str(), cfg.attempt_timeout);
    let fetcher = Arc::new(Fetcher::new(provider, pool, cfg.retry_policy(), cancel));
    let orchestrator = Orchestrator::new(fetcher, store, EventLogger::new(&cfg.log_dir), cfg.workers);

    let today = Local::now().date_naive();
    match cli.command {
        Command::Bootstrap => summarize(&log_call("bootstrap", orchestrator.bootstrap(today)).await?),
        Command::Monthly => summarize(&log_call("monthly", orchestrator.monthly(today)).await?),
        Command::Daily => match log_call("daily", orchestrator.daily(today)).await? {
            SyncOutcome::Completed(report) => summarize(&report),
            SyncOutcome::NoNewGames { latest } => info!(%latest, "nothing to do"),
        },
    }
    Ok(())
}

fn summarize(report: &SyncReport) {
    for (table, rows) in &report.written {
        info!(table, rows, "written");
    }
    if !report.skipped_tables.is_empty() {
        warn!(tables = ?report.skipped_tables, "tables skipped, see the event log");
    }
    if !report.skipped_entities.is_empty() {
        warn!(entities = report.skipped_entities.len(), "entities skipped, see the event log");
    }
}
