use chrono::{Datelike, NaiveDate};
use std::fmt;
use table_schema::Fragment;

/// Season types the game log is requested for, in request order.
pub const SEASON_TYPES: [&str; 4] = ["Regular Season", "Pre Season", "Playoffs", "All Star"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    CommonAllPlayers,
    CommonTeamYears,
    LeagueGameLog,
    CommonPlayerInfo,
    TeamDetails,
    TeamInfoCommon,
    BoxScoreSummaryV2,
    PlayByPlayV2,
    DraftCombineStats,
    DraftHistory,
}

impl Endpoint {
    /// URL path segment below the provider's base URL.
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::CommonAllPlayers => "commonallplayers",
            Endpoint::CommonTeamYears => "commonteamyears",
            Endpoint::LeagueGameLog => "leaguegamelog",
            Endpoint::CommonPlayerInfo => "commonplayerinfo",
            Endpoint::TeamDetails => "teamdetails",
            Endpoint::TeamInfoCommon => "teaminfocommon",
            Endpoint::BoxScoreSummaryV2 => "boxscoresummaryv2",
            Endpoint::PlayByPlayV2 => "playbyplayv2",
            Endpoint::DraftCombineStats => "draftcombinestats",
            Endpoint::DraftHistory => "drafthistory",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Endpoint::CommonAllPlayers => "CommonAllPlayers",
            Endpoint::CommonTeamYears => "CommonTeamYears",
            Endpoint::LeagueGameLog => "LeagueGameLog",
            Endpoint::CommonPlayerInfo => "CommonPlayerInfo",
            Endpoint::TeamDetails => "TeamDetails",
            Endpoint::TeamInfoCommon => "TeamInfoCommon",
            Endpoint::BoxScoreSummaryV2 => "BoxScoreSummaryV2",
            Endpoint::PlayByPlayV2 => "PlayByPlayV2",
            Endpoint::DraftCombineStats => "DraftCombineStats",
            Endpoint::DraftHistory => "DraftHistory",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `1999` -> `"1999-00"`.
pub fn season_label(start_year: i32) -> String {
    format!("{start_year}-{:02}", (start_year + 1).rem_euclid(100))
}

/// Seasons start in the autumn: October 2023 belongs to 2023-24, March 2024
/// still does too.
pub fn season_start_year(date: NaiveDate) -> i32 {
    if date.month() >= 9 {
        date.year()
    } else {
        date.year() - 1
    }
}

/// One unit of work: fetch `entity` from `endpoint` with `params`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTask {
    pub entity: String,
    pub endpoint: Endpoint,
    pub params: Vec<(String, String)>,
}

impl FetchTask {
    pub fn new(entity: impl Into<String>, endpoint: Endpoint, params: &[(&str, &str)]) -> Self {
        Self {
            entity: entity.into(),
            endpoint,
            params: params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn all_players(season_start: i32) -> Self {
        let season = season_label(season_start);
        Self::new(
            "all",
            Endpoint::CommonAllPlayers,
            &[("LeagueID", "00"), ("Season", season.as_str()), ("IsOnlyCurrentSeason", "0")],
        )
    }

    pub fn team_years() -> Self {
        Self::new("all", Endpoint::CommonTeamYears, &[("LeagueID", "00")])
    }

    pub fn game_log_season(season_start: i32, season_type: &str) -> Self {
        let season = season_label(season_start);
        Self::new(
            format!("{season} {season_type}"),
            Endpoint::LeagueGameLog,
            &game_log_params(&season, season_type, ""),
        )
    }

    /// Game log of one season and season type from `from` onwards. The
    /// provider filters by season before the date, so a catch-up that spans
    /// a season boundary needs one task per season.
    pub fn game_log_from(season_start: i32, from: NaiveDate, season_type: &str) -> Self {
        let season = season_label(season_start);
        let date_from = from.format("%m/%d/%Y").to_string();
        Self::new(
            format!("{season} {season_type} from {from}"),
            Endpoint::LeagueGameLog,
            &game_log_params(&season, season_type, &date_from),
        )
    }

    pub fn player_info(player_id: &str) -> Self {
        Self::new(player_id, Endpoint::CommonPlayerInfo, &[("PlayerID", player_id), ("LeagueID", "")])
    }

    pub fn team_details(team_id: &str) -> Self {
        Self::new(team_id, Endpoint::TeamDetails, &[("TeamID", team_id)])
    }

    pub fn team_info_common(team_id: &str, season_start: i32) -> Self {
        let season = season_label(season_start);
        Self::new(
            team_id,
            Endpoint::TeamInfoCommon,
            &[("LeagueID", "00"), ("TeamID", team_id), ("Season", season.as_str()), ("SeasonType", "Regular Season")],
        )
    }

    pub fn box_score_summary(game_id: &str) -> Self {
        Self::new(game_id, Endpoint::BoxScoreSummaryV2, &[("GameID", game_id)])
    }

    pub fn play_by_play(game_id: &str) -> Self {
        Self::new(
            game_id,
            Endpoint::PlayByPlayV2,
            &[("GameID", game_id), ("StartPeriod", "0"), ("EndPeriod", "0")],
        )
    }

    pub fn draft_combine_stats(season_start: i32) -> Self {
        let season = season_label(season_start);
        Self::new(season.clone(), Endpoint::DraftCombineStats, &[("LeagueID", "00"), ("SeasonYear", season.as_str())])
    }

    pub fn draft_history(year: i32) -> Self {
        let year = year.to_string();
        Self::new(year.clone(), Endpoint::DraftHistory, &[("LeagueID", "00"), ("Season", year.as_str())])
    }
}

fn game_log_params<'a>(season: &'a str, season_type: &'a str, date_from: &'a str) -> [(&'static str, &'a str); 9] {
    [
        ("Counter", "0"),
        ("DateFrom", date_from),
        ("DateTo", ""),
        ("Direction", "ASC"),
        ("LeagueID", "00"),
        ("PlayerOrTeam", "T"),
        ("Season", season),
        ("SeasonType", season_type),
        ("Sorter", "DATE"),
    ]
}

/// Named fragments from one successful fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResult {
    pub fragments: Vec<Fragment>,
}

impl RawResult {
    pub fn new(fragments: Vec<Fragment>) -> Self {
        Self { fragments }
    }

    pub fn fragment(&self, name: &str) -> Option<&Fragment> {
        self.fragments.iter().find(|f| f.name == name)
    }

    /// Removes and returns the fragment called `name`.
    pub fn take(&mut self, name: &str) -> Option<Fragment> {
        let idx = self.fragments.iter().position(|f| f.name == name)?;
        Some(self.fragments.remove(idx))
    }
}
