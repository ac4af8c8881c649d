//! Bootstrap, daily and monthly workflows.
//!
//! Every step fans its fetch tasks out through the fetcher, shapes and
//! validates each successful result, concatenates the pieces per table and
//! writes them. Failed entities and tables are logged and skipped; only
//! setup problems end a run early.

use anyhow::{bail, Context, Result};
use chrono::{Datelike, Days, NaiveDate};
use logger::{
    now_iso, EntitySkippedEvent, EventLogger, ProxyPoolReadyEvent, SyncFinishedEvent, TableSkippedEvent,
    TableWrittenEvent,
};
use stats_fetcher::{run_batch, season_start_year, FetchTask, Fetcher, StatsProvider, TaskOutcome, SEASON_TYPES};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use table_schema::{concat, select_new, validate, SchemaRegistry, ValidatedTable};
use tracing::{info, warn};

use crate::catalog;
use crate::shape::shape;
use crate::store::{CheckpointReader, RecordSink, WriteMode};

/// First season the provider has game logs for.
pub const FIRST_SEASON: i32 = 1946;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntity {
    pub step: String,
    pub entity: String,
    pub endpoint: String,
    pub kind: String,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    /// `(table, rows)` for every write that landed.
    pub written: Vec<(String, usize)>,
    pub skipped_tables: Vec<String>,
    pub skipped_entities: Vec<SkippedEntity>,
}

#[derive(Debug)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// The newest stored game is already dated today or later.
    NoNewGames { latest: NaiveDate },
}

#[derive(Default)]
struct Collected {
    tasks: usize,
    succeeded: usize,
    /// Tasks with at least one skipped fetch, shape or validation.
    failed: usize,
    pieces: BTreeMap<&'static str, Vec<ValidatedTable>>,
}

type Assembled = BTreeMap<&'static str, ValidatedTable>;

pub struct Orchestrator<P, S> {
    fetcher: Arc<Fetcher<P>>,
    store: S,
    registry: SchemaRegistry,
    events: EventLogger,
    workers: usize,
}

impl<P, S> Orchestrator<P, S>
where
    P: StatsProvider + 'static,
    S: RecordSink + CheckpointReader,
{
    pub fn new(fetcher: Arc<Fetcher<P>>, store: S, events: EventLogger, workers: usize) -> Self {
        Self { fetcher, store, registry: catalog::registry(), events, workers }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Fills the proxy pool unless it already has live members. An empty
    /// live set afterwards is fatal.
    pub async fn prepare_pool(&self) -> Result<usize> {
        let pool = self.fetcher.pool();
        let live = match pool.live_count() {
            0 => pool.refresh().await,
            n => n,
        };
        self.events.record(&ProxyPoolReadyEvent {
            ts: now_iso(),
            event: "PROXY_POOL_READY",
            candidates: pool.candidate_count(),
            live,
        });
        if live == 0 {
            bail!("no live proxy after refresh ({} candidates probed)", pool.candidate_count());
        }
        Ok(live)
    }

    pub async fn bootstrap(&self, today: NaiveDate) -> Result<SyncReport> {
        let started = Instant::now();
        self.prepare_pool().await?;
        let mut report = SyncReport::default();
        self.bootstrap_steps(today, &mut report).await;
        Ok(self.finish("bootstrap", started, report))
    }

    /// Appends games played after the newest stored game date, with their
    /// box-score tables and play-by-play. Falls back to a bootstrap when no
    /// game is stored yet.
    pub async fn daily(&self, today: NaiveDate) -> Result<SyncOutcome> {
        let started = Instant::now();
        let Some(latest) = self.store.max_date(catalog::GAME, "game_date").context("read game watermark")? else {
            info!("no stored games, running bootstrap");
            return self.bootstrap(today).await.map(SyncOutcome::Completed);
        };
        let from = latest.checked_add_days(Days::new(1)).context("game watermark out of range")?;
        if from > today {
            info!(%latest, "no new games");
            return Ok(SyncOutcome::NoNewGames { latest });
        }

        self.prepare_pool().await?;
        let mut report = SyncReport::default();

        let tasks = (season_start_year(from)..=season_start_year(today))
            .flat_map(|season| SEASON_TYPES.iter().map(move |t| FetchTask::game_log_from(season, from, t)))
            .collect();
        let collected = self.collect("new game logs", tasks, &mut report).await;
        if collected.failed > 0 {
            // Appending part of the logs would move the watermark past games
            // the failed requests never returned.
            let reason = format!("{} of {} game log requests failed, watermark kept", collected.failed, collected.tasks);
            self.skip_table(&mut report, catalog::GAME, &reason);
            return Ok(SyncOutcome::Completed(self.finish("daily", started, report)));
        }
        let mut assembled = self.assemble(collected, &[catalog::GAME], WriteMode::Append, &mut report);
        if let Some(games) = assembled.remove(catalog::GAME) {
            match select_new(latest, &games, "game_date") {
                Ok(new) => {
                    assembled.insert(catalog::GAME, new);
                }
                Err(e) => self.skip_table(&mut report, catalog::GAME, &e.to_string()),
            }
        }
        self.persist(&assembled, WriteMode::Append, &mut report);

        let game_ids = assembled.get(catalog::GAME).map(|g| g.distinct_keys("game_id")).unwrap_or_default();
        if game_ids.is_empty() {
            info!(%from, "game logs list no new games");
        } else {
            info!(games = game_ids.len(), "fetching box scores and play-by-play for new games");
            self.game_detail_steps(&game_ids, WriteMode::Append, &mut report).await;
        }

        Ok(SyncOutcome::Completed(self.finish("daily", started, report)))
    }

    /// Replaces the slowly changing reference tables.
    pub async fn monthly(&self, today: NaiveDate) -> Result<SyncReport> {
        let started = Instant::now();
        self.prepare_pool().await?;
        let mut report = SyncReport::default();
        let mode = WriteMode::Replace;
        let season = season_start_year(today);

        let players = self.step(&mut report, "players", &[catalog::PLAYER], vec![FetchTask::all_players(season)], mode).await;
        let teams = self.step(&mut report, "teams", &[catalog::TEAM], vec![FetchTask::team_years()], mode).await;

        let player_ids = self.ids(&players, catalog::PLAYER, "person_id");
        let tasks = player_ids.iter().map(|id| FetchTask::player_info(id)).collect();
        self.step(&mut report, "player info", &[catalog::COMMON_PLAYER_INFO], tasks, mode).await;

        let team_ids = self.ids(&teams, catalog::TEAM, "team_id");
        self.team_steps(&team_ids, season, &mut report).await;
        self.draft_steps(today, &mut report).await;

        Ok(self.finish("monthly", started, report))
    }

    async fn bootstrap_steps(&self, today: NaiveDate, report: &mut SyncReport) {
        let mode = WriteMode::Replace;
        let season = season_start_year(today);

        let players = self.step(report, "players", &[catalog::PLAYER], vec![FetchTask::all_players(season)], mode).await;
        let teams = self.step(report, "teams", &[catalog::TEAM], vec![FetchTask::team_years()], mode).await;

        let tasks = (FIRST_SEASON..=season)
            .flat_map(|year| SEASON_TYPES.iter().map(move |t| FetchTask::game_log_season(year, t)))
            .collect();
        let games = self.step(report, "game logs", &[catalog::GAME], tasks, mode).await;

        let team_ids = self.ids(&teams, catalog::TEAM, "team_id");
        let tasks = team_ids.iter().map(|id| FetchTask::team_details(id)).collect();
        self.step(report, "team details", &[catalog::TEAM_DETAILS, catalog::TEAM_HISTORY], tasks, mode).await;

        let player_ids = self.ids(&players, catalog::PLAYER, "person_id");
        let tasks = player_ids.iter().map(|id| FetchTask::player_info(id)).collect();
        self.step(report, "player info", &[catalog::COMMON_PLAYER_INFO], tasks, mode).await;

        let game_ids = self.ids(&games, catalog::GAME, "game_id");
        self.game_detail_steps(&game_ids, mode, report).await;

        self.draft_steps(today, report).await;

        let tasks = team_ids.iter().map(|id| FetchTask::team_info_common(id, season)).collect();
        self.step(report, "team info common", &[catalog::TEAM_INFO_COMMON], tasks, mode).await;
    }

    async fn team_steps(&self, team_ids: &[String], season: i32, report: &mut SyncReport) {
        let mode = WriteMode::Replace;
        let tasks = team_ids.iter().map(|id| FetchTask::team_details(id)).collect();
        self.step(report, "team details", &[catalog::TEAM_DETAILS, catalog::TEAM_HISTORY], tasks, mode).await;
        let tasks = team_ids.iter().map(|id| FetchTask::team_info_common(id, season)).collect();
        self.step(report, "team info common", &[catalog::TEAM_INFO_COMMON], tasks, mode).await;
    }

    async fn game_detail_steps(&self, game_ids: &[String], mode: WriteMode, report: &mut SyncReport) {
        let tasks = game_ids.iter().map(|id| FetchTask::box_score_summary(id)).collect();
        self.step(report, "box scores", &catalog::BOX_SCORE_TABLES, tasks, mode).await;
        let tasks = game_ids.iter().map(|id| FetchTask::play_by_play(id)).collect();
        self.step(report, "play by play", &[catalog::PLAY_BY_PLAY], tasks, mode).await;
    }

    async fn draft_steps(&self, today: NaiveDate, report: &mut SyncReport) {
        let mode = WriteMode::Replace;
        let years = FIRST_SEASON..=today.year();
        let tasks = years.clone().map(FetchTask::draft_combine_stats).collect();
        self.step(report, "draft combine", &[catalog::DRAFT_COMBINE_STATS], tasks, mode).await;
        let tasks = years.map(FetchTask::draft_history).collect();
        self.step(report, "draft history", &[catalog::DRAFT_HISTORY], tasks, mode).await;
    }

    async fn step(
        &self,
        report: &mut SyncReport,
        step: &'static str,
        tables: &[&'static str],
        tasks: Vec<FetchTask>,
        mode: WriteMode,
    ) -> Assembled {
        info!(step, tasks = tasks.len(), "step started");
        let collected = self.collect(step, tasks, report).await;
        let assembled = self.assemble(collected, tables, mode, report);
        self.persist(&assembled, mode, report);
        assembled
    }

    /// Runs `tasks` as one batch and validates every fragment that comes
    /// back. Failed entities and invalid fragments are recorded and left out.
    async fn collect(&self, step: &'static str, tasks: Vec<FetchTask>, report: &mut SyncReport) -> Collected {
        let mut collected = Collected { tasks: tasks.len(), ..Collected::default() };
        let mut outcomes = run_batch(self.fetcher.clone(), tasks, self.workers).await;
        // Completion order is arbitrary; keep row order stable.
        outcomes.sort_by(|a, b| a.task.entity.cmp(&b.task.entity));

        for TaskOutcome { task, result } in outcomes {
            let raw = match result {
                Ok(raw) => raw,
                Err(e) => {
                    self.skip_entity(report, step, &task, e.kind(), &e.to_string());
                    collected.failed += 1;
                    continue;
                }
            };
            let shaped = match shape(&task, raw) {
                Ok(shaped) => shaped,
                Err(e) => {
                    self.skip_entity(report, step, &task, "schema", &e.to_string());
                    collected.failed += 1;
                    continue;
                }
            };
            collected.succeeded += 1;

            let mut valid = true;
            for (table, fragment) in shaped {
                let Some(schema) = self.registry.get(table) else {
                    warn!(table, "no schema registered, fragment dropped");
                    continue;
                };
                match validate(fragment, schema) {
                    Ok(valid) => collected.pieces.entry(table).or_default().push(valid),
                    Err(violation) => {
                        warn!(step, entity = %task.entity, table, "schema violations:\n{}", violation.report());
                        self.skip_entity(report, step, &task, "schema", &violation.to_string());
                        valid = false;
                    }
                }
            }
            if !valid {
                collected.failed += 1;
            }
        }
        collected
    }

    /// Concatenates the validated pieces of each expected table. A table is
    /// left out when nothing succeeded or its pieces do not combine.
    fn assemble(
        &self,
        mut collected: Collected,
        tables: &[&'static str],
        mode: WriteMode,
        report: &mut SyncReport,
    ) -> Assembled {
        let mut assembled = Assembled::new();
        if collected.tasks == 0 {
            info!(?tables, "nothing to fetch");
            return assembled;
        }
        for &table in tables {
            if collected.succeeded == 0 {
                self.skip_table(report, table, "no entity succeeded, existing rows kept");
                continue;
            }
            let pieces = collected.pieces.remove(table).unwrap_or_default();
            if pieces.is_empty() {
                match mode {
                    WriteMode::Replace => self.skip_table(report, table, "no valid rows, existing rows kept"),
                    WriteMode::Append => info!(table, "no rows to append"),
                }
                continue;
            }
            let Some(schema) = self.registry.get(table) else { continue };
            match concat(schema, pieces) {
                Ok(whole) => {
                    assembled.insert(table, whole);
                }
                Err(e) => self.skip_table(report, table, &e.to_string()),
            }
        }
        assembled
    }

    fn persist(&self, assembled: &Assembled, mode: WriteMode, report: &mut SyncReport) {
        for (&table, rows) in assembled {
            if mode == WriteMode::Append && rows.is_empty() {
                info!(table, "no rows to append");
                continue;
            }
            match self.store.write(rows, mode) {
                Ok(n) => {
                    info!(table, mode = mode.as_str(), rows = n, "table written");
                    self.events.record(&TableWrittenEvent {
                        ts: now_iso(),
                        event: "TABLE_WRITTEN",
                        table: table.to_string(),
                        mode: mode.as_str().to_string(),
                        rows: n,
                    });
                    report.written.push((table.to_string(), n));
                }
                Err(e) => self.skip_table(report, table, &format!("write failed: {e:#}")),
            }
        }
    }

    /// Ids from a table assembled earlier in this run, or from the store
    /// when that step produced nothing.
    fn ids(&self, assembled: &Assembled, table: &str, column: &str) -> Vec<String> {
        if let Some(t) = assembled.get(table) {
            return t.distinct_keys(column);
        }
        match self.store.distinct_ids(table, column) {
            Ok(ids) => {
                info!(table, column, ids = ids.len(), "ids read from store");
                ids
            }
            Err(e) => {
                warn!(table, column, "cannot read stored ids: {e:#}");
                Vec::new()
            }
        }
    }

    fn skip_entity(&self, report: &mut SyncReport, step: &str, task: &FetchTask, kind: &str, detail: &str) {
        warn!(step, entity = %task.entity, endpoint = %task.endpoint, kind, "entity skipped: {detail}");
        self.events.record(&EntitySkippedEvent {
            ts: now_iso(),
            event: "ENTITY_SKIPPED",
            step: step.to_string(),
            entity: task.entity.clone(),
            endpoint: task.endpoint.to_string(),
            kind: kind.to_string(),
            detail: detail.to_string(),
        });
        report.skipped_entities.push(SkippedEntity {
            step: step.to_string(),
            entity: task.entity.clone(),
            endpoint: task.endpoint.to_string(),
            kind: kind.to_string(),
        });
    }

    fn skip_table(&self, report: &mut SyncReport, table: &str, reason: &str) {
        warn!(table, "table skipped: {reason}");
        self.events.record(&TableSkippedEvent {
            ts: now_iso(),
            event: "TABLE_SKIPPED",
            table: table.to_string(),
            reason: reason.to_string(),
        });
        report.skipped_tables.push(table.to_string());
    }

    fn finish(&self, workflow: &str, started: Instant, report: SyncReport) -> SyncReport {
        let elapsed_secs = started.elapsed().as_secs_f64();
        info!(
            workflow,
            written = report.written.len(),
            skipped_tables = report.skipped_tables.len(),
            skipped_entities = report.skipped_entities.len(),
            elapsed_secs,
            "sync finished"
        );
        self.events.record(&SyncFinishedEvent {
            ts: now_iso(),
            event: "SYNC_FINISHED",
            workflow: workflow.to_string(),
            tables_written: report.written.len(),
            tables_skipped: report.skipped_tables.len(),
            entities_skipped: report.skipped_entities.len(),
            elapsed_secs,
        });
        report
    }
}
