//! Table aggregation: concatenation, the home/away self-join that turns
//! team-centric rows into one row per game, and watermark filtering.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::warn;

use crate::fragment::Fragment;
use crate::schema::TableSchema;
use crate::validate::{unique_violations, SchemaViolation, ValidatedTable};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MergeError {
    #[error("{table}: expected columns {expected:?}, found {found:?}")]
    ColumnMismatch { table: String, expected: Vec<String>, found: Vec<String> },
    #[error("{fragment}: no column named {column}")]
    UnknownColumn { fragment: String, column: String },
    #[error("{fragment}: column {column} has no _home/_away suffix and is not a key")]
    UnpairedColumn { fragment: String, column: String },
    #[error(transparent)]
    Schema(#[from] SchemaViolation),
}

/// Union of validated tables of one schema. Unique columns are re-checked
/// across the union since each part was only checked on its own.
pub fn concat(schema: &Arc<TableSchema>, tables: Vec<ValidatedTable>) -> Result<ValidatedTable, MergeError> {
    let expected = schema.column_names();
    let mut rows = Vec::new();
    for table in tables {
        let found = table.column_names();
        if found != expected {
            return Err(MergeError::ColumnMismatch { table: schema.name.clone(), expected, found });
        }
        rows.extend(table.into_rows());
    }

    let violations = unique_violations(schema, &rows);
    if !violations.is_empty() {
        return Err(SchemaViolation { table: schema.name.clone(), violations }.into());
    }
    Ok(ValidatedTable::from_rows(Arc::clone(schema), rows))
}

/// Rows of `table` whose `date_column` is strictly later than `watermark`.
/// Rows with a null or unparseable date are not new.
pub fn select_new(watermark: NaiveDate, table: &ValidatedTable, date_column: &str) -> Result<ValidatedTable, MergeError> {
    if table.is_empty() {
        return Ok(table.clone());
    }
    let idx = table.column_index(date_column).ok_or_else(|| MergeError::UnknownColumn {
        fragment: table.name().to_string(),
        column: date_column.to_string(),
    })?;

    let rows = table
        .rows()
        .iter()
        .filter(|r| r.get(idx).and_then(Value::as_date).is_some_and(|d| d > watermark))
        .cloned()
        .collect();
    Ok(ValidatedTable::from_rows(Arc::clone(table.schema()), rows))
}

/// Whether a matchup string like `"LAL vs. BOS"` describes the home side.
/// Away rows read `"BOS @ LAL"`. This is the provider's text convention.
pub fn is_home_matchup(matchup: &str) -> bool {
    matchup.contains(" vs. ")
}

/// How the home row of a pair is recognised.
#[derive(Debug, Clone, PartialEq)]
pub enum HomeRule {
    /// `column` holds matchup text checked with [`is_home_matchup`].
    Matchup { column: String },
    /// The first row of each key group is the home side.
    FirstListed,
}

/// Self-join of a one-row-per-team fragment into one row per game.
#[derive(Debug, Clone)]
pub struct HomeAwayJoin {
    keys: Vec<String>,
    team_column: String,
    rule: HomeRule,
}

impl HomeAwayJoin {
    pub fn new(keys: &[&str], team_column: &str, rule: HomeRule) -> Self {
        Self {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            team_column: team_column.to_string(),
            rule,
        }
    }

    pub fn by_matchup(keys: &[&str], team_column: &str, matchup_column: &str) -> Self {
        Self::new(keys, team_column, HomeRule::Matchup { column: matchup_column.to_string() })
    }

    /// Output layout: the input's columns in order with keys unchanged and
    /// every other column suffixed `_home`, then the non-key columns again
    /// suffixed `_away`. Key groups without a valid pair are dropped; groups
    /// with several valid pairs keep the first in (home team, away team)
    /// order and log the anomaly.
    pub fn reshape(&self, fragment: &Fragment) -> Result<Fragment, MergeError> {
        let col = |name: &str| {
            fragment.column_index(name).ok_or_else(|| MergeError::UnknownColumn {
                fragment: fragment.name.clone(),
                column: name.to_string(),
            })
        };
        let key_idx = self.keys.iter().map(|k| col(k)).collect::<Result<Vec<_>, _>>()?;
        let team_idx = col(&self.team_column)?;
        let matchup_idx = match &self.rule {
            HomeRule::Matchup { column } => Some(col(column)?),
            HomeRule::FirstListed => None,
        };

        let non_key: Vec<usize> = (0..fragment.columns.len()).filter(|i| !key_idx.contains(i)).collect();
        let mut columns = Vec::with_capacity(fragment.columns.len() + non_key.len());
        for (i, name) in fragment.columns.iter().enumerate() {
            if key_idx.contains(&i) {
                columns.push(name.clone());
            } else {
                columns.push(format!("{name}_home"));
            }
        }
        columns.extend(non_key.iter().map(|&i| format!("{}_away", fragment.columns[i])));

        let mut order: Vec<Vec<String>> = Vec::new();
        let mut groups: HashMap<Vec<String>, Vec<usize>> = HashMap::new();
        for (r, row) in fragment.rows.iter().enumerate() {
            // Null key cells group together.
            let key: Vec<String> = key_idx.iter().map(|&i| row.get(i).and_then(Value::key).unwrap_or_default()).collect();
            groups
                .entry(key.clone())
                .or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                })
                .push(r);
        }

        let team = |r: usize| fragment.rows[r].get(team_idx).and_then(Value::key);
        let is_home = |r: usize, first: usize| match matchup_idx {
            Some(m) => fragment.rows[r].get(m).and_then(Value::as_str).is_some_and(is_home_matchup),
            None => r == first,
        };

        let mut rows = Vec::with_capacity(order.len());
        for key in &order {
            let members = &groups[key];
            let first = members[0];
            let mut pairs: Vec<(String, String, usize, usize)> = Vec::new();
            for &h in members.iter().filter(|&&h| is_home(h, first)) {
                for &a in members.iter().filter(|&&a| a != h) {
                    if let (Some(ht), Some(at)) = (team(h), team(a)) {
                        if ht != at {
                            pairs.push((ht, at, h, a));
                        }
                    }
                }
            }
            if pairs.is_empty() {
                warn!(fragment = %fragment.name, key = ?key, rows = members.len(), "no home/away pair, rows dropped");
                continue;
            }
            if pairs.len() > 1 {
                pairs.sort();
                warn!(
                    fragment = %fragment.name,
                    key = ?key,
                    candidates = pairs.len(),
                    "more than one home/away pairing, keeping {} vs {}",
                    pairs[0].0, pairs[0].1
                );
            }
            let (_, _, h, a) = &pairs[0];
            let (home, away) = (&fragment.rows[*h], &fragment.rows[*a]);
            let mut row: Vec<Value> = home.clone();
            row.extend(non_key.iter().map(|&i| away.get(i).cloned().unwrap_or(Value::Null)));
            rows.push(row);
        }

        Ok(Fragment::new(fragment.name.clone(), columns, rows))
    }
}

/// Inverse of [`HomeAwayJoin::reshape`]: one row per game becomes a home row
/// and an away row with the suffixes stripped.
pub fn split_home_away(fragment: &Fragment, keys: &[&str]) -> Result<Fragment, MergeError> {
    let mut columns = Vec::new();
    let mut home_idx = Vec::new();
    let mut away_idx = Vec::new();
    for (i, name) in fragment.columns.iter().enumerate() {
        if keys.contains(&name.as_str()) {
            columns.push(name.clone());
            home_idx.push(i);
            away_idx.push(i);
        } else if let Some(base) = name.strip_suffix("_home") {
            let away = fragment.column_index(&format!("{base}_away")).ok_or_else(|| MergeError::UnpairedColumn {
                fragment: fragment.name.clone(),
                column: name.clone(),
            })?;
            columns.push(base.to_string());
            home_idx.push(i);
            away_idx.push(away);
        } else if name.strip_suffix("_away").is_none() {
            return Err(MergeError::UnpairedColumn { fragment: fragment.name.clone(), column: name.clone() });
        }
    }

    let pick = |row: &[Value], idx: &[usize]| idx.iter().map(|&i| row.get(i).cloned().unwrap_or(Value::Null)).collect();
    let mut rows = Vec::with_capacity(fragment.rows.len() * 2);
    for row in &fragment.rows {
        rows.push(pick(row, &home_idx));
        rows.push(pick(row, &away_idx));
    }
    Ok(Fragment::new(fragment.name.clone(), columns, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnSpec;
    use crate::validate::validate;

    const KEYS: [&str; 3] = ["season_id", "game_id", "game_date"];

    fn team_row(game: &str, date: &str, team: &str, matchup: &str, pts: i64) -> Vec<Value> {
        vec![
            Value::text("22023"),
            Value::text(team),
            Value::text(game),
            Value::text(date),
            Value::text(matchup),
            Value::Int(pts),
        ]
    }

    fn game_log() -> Fragment {
        Fragment::from_parts(
            "LeagueGameLog",
            &["season_id", "team_id", "game_id", "game_date", "matchup", "pts"],
            vec![
                team_row("001", "2023-10-24", "DEN", "DEN vs. LAL", 119),
                team_row("001", "2023-10-24", "LAL", "LAL @ DEN", 107),
                team_row("002", "2023-10-24", "PHX", "PHX @ GSW", 108),
                team_row("002", "2023-10-24", "GSW", "GSW vs. PHX", 104),
            ],
        )
    }

    fn join() -> HomeAwayJoin {
        HomeAwayJoin::by_matchup(&KEYS, "team_id", "matchup")
    }

    fn sorted(mut rows: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
        rows.sort_by_key(|r| r.iter().map(|v| v.to_string()).collect::<Vec<_>>());
        rows
    }

    #[test]
    fn reshape_pairs_home_with_away() {
        let games = join().reshape(&game_log()).unwrap();
        assert_eq!(
            games.columns,
            vec![
                "season_id", "team_id_home", "game_id", "game_date", "matchup_home", "pts_home",
                "team_id_away", "matchup_away", "pts_away",
            ]
        );
        assert_eq!(games.len(), 2);
        assert_eq!(games.cell(0, "team_id_home"), Some(&Value::text("DEN")));
        assert_eq!(games.cell(0, "pts_away"), Some(&Value::Int(107)));
        assert_eq!(games.cell(1, "team_id_home"), Some(&Value::text("GSW")));
        assert_eq!(games.cell(1, "team_id_away"), Some(&Value::text("PHX")));
    }

    #[test]
    fn reshape_is_idempotent_through_split() {
        let once = join().reshape(&game_log()).unwrap();
        let split = split_home_away(&once, &KEYS).unwrap();
        assert_eq!(split.len(), 4);
        let twice = join().reshape(&split).unwrap();

        assert_eq!(twice.columns, once.columns);
        assert_eq!(sorted(twice.rows), sorted(once.rows));
    }

    #[test]
    fn unpaired_rows_are_dropped() {
        let mut log = game_log();
        log.rows.push(team_row("003", "2023-10-25", "BOS", "BOS vs. NYK", 108));
        let games = join().reshape(&log).unwrap();
        assert_eq!(games.len(), 2);
    }

    #[test]
    fn ambiguous_pairing_keeps_one_deterministic_row() {
        let mut log = game_log();
        // A duplicated away row with a different team id for game 001.
        log.rows.insert(0, team_row("001", "2023-10-24", "LAC", "LAC @ DEN", 90));
        let games = join().reshape(&log).unwrap();

        let game_001: Vec<_> = (0..games.len())
            .filter(|&r| games.cell(r, "game_id") == Some(&Value::text("001")))
            .collect();
        assert_eq!(game_001.len(), 1);
        assert_eq!(games.cell(game_001[0], "team_id_away"), Some(&Value::text("LAC")));
    }

    #[test]
    fn first_listed_rule_uses_group_order() {
        let line_score = Fragment::from_parts(
            "LineScore",
            &["game_id", "team_id", "pts"],
            vec![
                vec![Value::text("001"), Value::Int(2), Value::Int(99)],
                vec![Value::text("001"), Value::Int(1), Value::Int(101)],
            ],
        );
        let games = HomeAwayJoin::new(&["game_id"], "team_id", HomeRule::FirstListed)
            .reshape(&line_score)
            .unwrap();
        assert_eq!(games.rows, vec![vec![
            Value::text("001"), Value::Int(2), Value::Int(99), Value::Int(1), Value::Int(101),
        ]]);
    }

    #[test]
    fn unknown_key_column_is_an_error() {
        let err = HomeAwayJoin::by_matchup(&["season"], "team_id", "matchup").reshape(&game_log()).unwrap_err();
        assert!(matches!(err, MergeError::UnknownColumn { .. }));
    }

    #[test]
    fn home_predicate() {
        assert!(is_home_matchup("BOS vs. NYK"));
        assert!(!is_home_matchup("NYK @ BOS"));
        assert!(!is_home_matchup("vs."));
    }

    fn dated_schema() -> Arc<TableSchema> {
        Arc::new(
            TableSchema::new("game")
                .column(ColumnSpec::text("game_id").required().unique())
                .column(ColumnSpec::date("game_date").required()),
        )
    }

    fn dated(rows: &[(&str, &str)]) -> ValidatedTable {
        let fragment = Fragment::from_parts(
            "game",
            &["game_id", "game_date"],
            rows.iter().map(|(g, d)| vec![Value::text(*g), Value::text(*d)]).collect(),
        );
        validate(fragment, &dated_schema()).unwrap()
    }

    #[test]
    fn select_new_keeps_rows_after_watermark() {
        let wm = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let table = dated(&[("1", "2024-01-01"), ("2", "2024-01-02"), ("3", "2024-01-03")]);
        let fresh = select_new(wm, &table, "game_date").unwrap();
        assert_eq!(fresh.distinct_keys("game_id"), vec!["3"]);
    }

    #[test]
    fn select_new_on_empty_or_stale_rows_is_empty() {
        let wm = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert!(select_new(wm, &ValidatedTable::empty(&dated_schema()), "game_date").unwrap().is_empty());
        assert!(select_new(wm, &ValidatedTable::empty(&dated_schema()), "no_such_column").unwrap().is_empty());
        let stale = dated(&[("1", "2023-12-30"), ("2", "2024-01-02")]);
        assert!(select_new(wm, &stale, "game_date").unwrap().is_empty());
    }

    #[test]
    fn concat_rechecks_uniqueness_across_parts() {
        let schema = dated_schema();
        let merged = concat(&schema, vec![dated(&[("1", "2024-01-01")]), dated(&[("2", "2024-01-02")])]).unwrap();
        assert_eq!(merged.len(), 2);

        let err = concat(&schema, vec![dated(&[("1", "2024-01-01")]), dated(&[("1", "2024-01-02")])]).unwrap_err();
        assert!(matches!(err, MergeError::Schema(v) if v.mentions_column("game_id")));
    }

    #[test]
    fn concat_rejects_foreign_tables() {
        let other = Arc::new(TableSchema::new("team").column(ColumnSpec::text("team_id")));
        let err = concat(&other, vec![dated(&[("1", "2024-01-01")])]).unwrap_err();
        assert!(matches!(err, MergeError::ColumnMismatch { .. }));
        assert!(concat(&other, Vec::new()).unwrap().is_empty());
    }
}
