//! Turns the fragments of one endpoint response into rows for catalog
//! tables: renames, pivots, the home/away reshape and the columns the
//! provider leaves implicit.

use stats_fetcher::{Endpoint, FetchTask, RawResult};
use table_schema::{Fragment, HomeAwayJoin, HomeRule, MergeError, Value};
use tracing::debug;

use crate::catalog;

#[derive(Debug, thiserror::Error)]
pub enum ShapeError {
    #[error("{endpoint} response has no {name} result set")]
    MissingResultSet { endpoint: Endpoint, name: &'static str },
    #[error(transparent)]
    Merge(#[from] MergeError),
}

pub type Shaped = Vec<(&'static str, Fragment)>;

const GAME_LOG_KEYS: [&str; 4] = ["season_id", "game_id", "game_date", "min"];
const OTHER_STATS_KEYS: [&str; 4] = ["league_id", "game_id", "lead_changes", "times_tied"];
const LINE_SCORE_KEYS: [&str; 3] = ["game_date_est", "game_sequence", "game_id"];

/// Table fragments for one successful fetch of `task`.
pub fn shape(task: &FetchTask, mut raw: RawResult) -> Result<Shaped, ShapeError> {
    let endpoint = task.endpoint;

    let shaped = match endpoint {
        Endpoint::CommonAllPlayers => vec![(catalog::PLAYER, required(&mut raw, endpoint, "CommonAllPlayers")?)],
        Endpoint::CommonTeamYears => vec![(catalog::TEAM, required(&mut raw, endpoint, "TeamYears")?)],
        Endpoint::LeagueGameLog => {
            let log = required(&mut raw, endpoint, "LeagueGameLog")?;
            let season_type = task.param("SeasonType").unwrap_or_default();
            vec![(catalog::GAME, game_log(&log, season_type)?)]
        }
        Endpoint::CommonPlayerInfo => vec![(catalog::COMMON_PLAYER_INFO, required(&mut raw, endpoint, "CommonPlayerInfo")?)],
        Endpoint::TeamDetails => {
            let background = required(&mut raw, endpoint, "TeamBackground")?;
            let history = required(&mut raw, endpoint, "TeamHistory")?;
            let socials = raw.take("TeamSocialSites");
            vec![
                (catalog::TEAM_DETAILS, with_social_sites(background, socials.as_ref())),
                (catalog::TEAM_HISTORY, team_history(history)),
            ]
        }
        Endpoint::TeamInfoCommon => {
            let info = required(&mut raw, endpoint, "TeamInfoCommon")?;
            let merged = match raw.take("TeamSeasonRanks") {
                Some(ranks) if !ranks.is_empty() => info.merge_on(&ranks, "team_id")?,
                _ => info,
            };
            vec![(catalog::TEAM_INFO_COMMON, merged)]
        }
        Endpoint::BoxScoreSummaryV2 => box_score(&task.entity, raw)?,
        Endpoint::PlayByPlayV2 => vec![(catalog::PLAY_BY_PLAY, required(&mut raw, endpoint, "PlayByPlay")?)],
        Endpoint::DraftCombineStats => vec![(catalog::DRAFT_COMBINE_STATS, required(&mut raw, endpoint, "DraftCombineStats")?)],
        Endpoint::DraftHistory => vec![(catalog::DRAFT_HISTORY, required(&mut raw, endpoint, "DraftHistory")?)],
    };
    Ok(shaped)
}

fn required(raw: &mut RawResult, endpoint: Endpoint, name: &'static str) -> Result<Fragment, ShapeError> {
    raw.take(name).ok_or(ShapeError::MissingResultSet { endpoint, name })
}

/// Team rows of the game log paired into one row per game, tagged with the
/// season type the log was requested for.
pub fn game_log(log: &Fragment, season_type: &str) -> Result<Fragment, ShapeError> {
    let games = HomeAwayJoin::by_matchup(&GAME_LOG_KEYS, "team_id", "matchup").reshape(log)?;
    Ok(games.with_column("season_type", Value::text(season_type)))
}

/// `TeamSocialSites` lists one `(accounttype, website_link)` row per
/// account; each becomes a lowercased column on the background row.
fn with_social_sites(background: Fragment, socials: Option<&Fragment>) -> Fragment {
    let Some(socials) = socials else { return background };
    let (Some(kind), Some(link)) = (socials.column_index("accounttype"), socials.column_index("website_link")) else {
        return background;
    };
    socials.rows.iter().fold(background, |acc, row| {
        match row.get(kind).and_then(Value::as_str) {
            Some(account) if acc.column_index(&account.to_lowercase()).is_none() => {
                let value = row.get(link).cloned().unwrap_or(Value::Null);
                acc.with_column(&account.to_lowercase(), value)
            }
            _ => acc,
        }
    })
}

fn team_history(history: Fragment) -> Fragment {
    history.rename_columns(&[("yearfounded", "year_founded"), ("yearactivetill", "year_active_till")])
}

fn with_game_id(fragment: Fragment, game_id: &str) -> Fragment {
    if fragment.column_index("game_id").is_some() {
        fragment
    } else {
        fragment.with_leading_column("game_id", Value::text(game_id))
    }
}

fn box_score(game_id: &str, mut raw: RawResult) -> Result<Shaped, ShapeError> {
    let summary = required(&mut raw, Endpoint::BoxScoreSummaryV2, "GameSummary")?;
    let line_score = required(&mut raw, Endpoint::BoxScoreSummaryV2, "LineScore")?;

    let mut shaped = vec![(catalog::GAME_SUMMARY, summary)];

    match raw.take("OtherStats") {
        Some(stats) if !stats.is_empty() => {
            let stats = with_game_id(stats, game_id);
            let paired = HomeAwayJoin::new(&OTHER_STATS_KEYS, "team_id", HomeRule::FirstListed).reshape(&stats)?;
            shaped.push((catalog::OTHER_STATS, paired));
        }
        _ => debug!(game_id, "no other stats"),
    }

    for (name, table) in [
        ("Officials", catalog::OFFICIALS),
        ("InactivePlayers", catalog::INACTIVE_PLAYERS),
        ("GameInfo", catalog::GAME_INFO),
    ] {
        if let Some(fragment) = raw.take(name) {
            shaped.push((table, with_game_id(fragment, game_id)));
        }
    }

    let paired = HomeAwayJoin::new(&LINE_SCORE_KEYS, "team_id", HomeRule::FirstListed).reshape(&line_score)?;
    shaped.push((catalog::LINE_SCORE, paired));
    Ok(shaped)
}
