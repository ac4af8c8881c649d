//! Table names and the declared schema of every table the sync writes.

use table_schema::{ColumnSpec, SchemaRegistry, TableSchema};

pub const PLAYER: &str = "player";
pub const TEAM: &str = "team";
pub const GAME: &str = "game";
pub const COMMON_PLAYER_INFO: &str = "common_player_info";
pub const TEAM_DETAILS: &str = "team_details";
pub const TEAM_HISTORY: &str = "team_history";
pub const TEAM_INFO_COMMON: &str = "team_info_common";
pub const GAME_SUMMARY: &str = "game_summary";
pub const OTHER_STATS: &str = "other_stats";
pub const OFFICIALS: &str = "officials";
pub const INACTIVE_PLAYERS: &str = "inactive_players";
pub const GAME_INFO: &str = "game_info";
pub const LINE_SCORE: &str = "line_score";
pub const PLAY_BY_PLAY: &str = "play_by_play";
pub const DRAFT_COMBINE_STATS: &str = "draft_combine_stats";
pub const DRAFT_HISTORY: &str = "draft_history";

/// Tables produced by one box-score summary fetch.
pub const BOX_SCORE_TABLES: [&str; 6] = [GAME_SUMMARY, OTHER_STATS, OFFICIALS, INACTIVE_PLAYERS, GAME_INFO, LINE_SCORE];

fn text(names: &[&str]) -> Vec<ColumnSpec> {
    names.iter().map(|n| ColumnSpec::text(n)).collect()
}

fn ints(names: &[&str]) -> Vec<ColumnSpec> {
    names.iter().map(|n| ColumnSpec::int(n)).collect()
}

fn floats(names: &[&str]) -> Vec<ColumnSpec> {
    names.iter().map(|n| ColumnSpec::float(n)).collect()
}

pub fn player() -> TableSchema {
    TableSchema::new(PLAYER)
        .column(ColumnSpec::text("person_id").required().unique())
        .column(ColumnSpec::text("display_last_comma_first"))
        .column(ColumnSpec::text("display_first_last").required())
        .column(ColumnSpec::int("rosterstatus"))
        .columns(ints(&["from_year", "to_year"]))
        .columns(text(&["playercode", "player_slug", "team_id", "team_city", "team_name", "team_abbreviation"]))
        .column(ColumnSpec::text("games_played_flag"))
}

pub fn team() -> TableSchema {
    TableSchema::new(TEAM)
        .column(ColumnSpec::text("league_id"))
        .column(ColumnSpec::text("team_id").required().unique())
        .columns(ints(&["min_year", "max_year"]))
        .column(ColumnSpec::text("abbreviation"))
}

/// One row per game; each team's box line side by side.
pub fn game() -> TableSchema {
    let per_team = [
        vec![ColumnSpec::text("team_id").required()],
        text(&["team_abbreviation", "team_name", "matchup", "wl"]),
        floats(&[
            "fgm", "fga", "fg_pct", "fg3m", "fg3a", "fg3_pct", "ftm", "fta", "ft_pct", "oreb", "dreb", "reb", "ast",
            "stl", "blk", "tov", "pf",
        ]),
        ints(&["pts", "plus_minus"]),
        vec![ColumnSpec::boolean("video_available")],
    ]
    .concat();

    TableSchema::new(GAME)
        .column(ColumnSpec::text("season_id").required())
        .column(ColumnSpec::text("game_id").required())
        .column(ColumnSpec::date("game_date").required())
        .column(ColumnSpec::int("min"))
        .column(ColumnSpec::text("season_type").required())
        .paired_columns(&per_team)
}

pub fn common_player_info() -> TableSchema {
    TableSchema::new(COMMON_PLAYER_INFO)
        .column(ColumnSpec::text("person_id").required().unique())
        .columns(text(&[
            "first_name",
            "last_name",
            "display_first_last",
            "display_last_comma_first",
            "display_fi_last",
            "player_slug",
        ]))
        .column(ColumnSpec::date("birthdate"))
        .columns(text(&["school", "country", "last_affiliation", "height", "weight"]))
        .column(ColumnSpec::float("season_exp"))
        .columns(text(&[
            "jersey",
            "position",
            "rosterstatus",
            "games_played_current_season_flag",
            "team_id",
            "team_name",
            "team_abbreviation",
            "team_code",
            "team_city",
            "playercode",
        ]))
        .columns(ints(&["from_year", "to_year"]))
        .columns(text(&[
            "dleague_flag",
            "nba_flag",
            "games_played_flag",
            "draft_year",
            "draft_round",
            "draft_number",
            "greatest_75_flag",
        ]))
}

/// Background plus one column per social account. Teams without an account
/// of some kind get a null there.
pub fn team_details() -> TableSchema {
    TableSchema::new(TEAM_DETAILS)
        .add_missing_columns()
        .column(ColumnSpec::text("team_id").required().unique())
        .columns(text(&["abbreviation", "nickname"]))
        .column(ColumnSpec::int("yearfounded"))
        .columns(text(&["city", "arena"]))
        .column(ColumnSpec::int("arenacapacity"))
        .columns(text(&["owner", "generalmanager", "headcoach", "dleagueaffiliation", "facebook", "instagram", "twitter"]))
}

pub fn team_history() -> TableSchema {
    TableSchema::new(TEAM_HISTORY)
        .column(ColumnSpec::text("team_id").required())
        .columns(text(&["city", "nickname"]))
        .columns(ints(&["year_founded", "year_active_till"]))
}

pub fn team_info_common() -> TableSchema {
    TableSchema::new(TEAM_INFO_COMMON)
        .add_missing_columns()
        .column(ColumnSpec::text("team_id").required().unique())
        .columns(text(&[
            "season_year",
            "team_city",
            "team_name",
            "team_abbreviation",
            "team_conference",
            "team_division",
            "team_code",
            "team_slug",
        ]))
        .columns(ints(&["w", "l"]))
        .column(ColumnSpec::float("pct"))
        .columns(ints(&["conf_rank", "div_rank", "min_year", "max_year"]))
        .columns(text(&["league_id", "season_id"]))
        .column(ColumnSpec::int("pts_rank"))
        .column(ColumnSpec::float("pts_pg"))
        .column(ColumnSpec::int("reb_rank"))
        .column(ColumnSpec::float("reb_pg"))
        .column(ColumnSpec::int("ast_rank"))
        .column(ColumnSpec::float("ast_pg"))
        .column(ColumnSpec::int("opp_pts_rank"))
        .column(ColumnSpec::float("opp_pts_pg"))
}

pub fn game_summary() -> TableSchema {
    TableSchema::new(GAME_SUMMARY)
        .column(ColumnSpec::date("game_date_est").required())
        .column(ColumnSpec::int("game_sequence"))
        .column(ColumnSpec::text("game_id").required().unique())
        .column(ColumnSpec::int("game_status_id"))
        .columns(text(&["game_status_text", "gamecode", "home_team_id", "visitor_team_id", "season"]))
        .column(ColumnSpec::int("live_period"))
        .columns(text(&["live_pc_time", "natl_tv_broadcaster_abbreviation", "live_period_time_bcast"]))
        .column(ColumnSpec::int("wh_status"))
}

pub fn other_stats() -> TableSchema {
    let per_team = [
        vec![ColumnSpec::text("team_id").required()],
        text(&["team_abbreviation", "team_city"]),
        ints(&[
            "pts_paint",
            "pts_2nd_chance",
            "pts_fb",
            "largest_lead",
            "team_turnovers",
            "total_turnovers",
            "team_rebounds",
            "pts_off_to",
        ]),
    ]
    .concat();

    TableSchema::new(OTHER_STATS)
        .column(ColumnSpec::text("game_id").required().unique())
        .column(ColumnSpec::text("league_id"))
        .columns(ints(&["lead_changes", "times_tied"]))
        .paired_columns(&per_team)
}

pub fn officials() -> TableSchema {
    TableSchema::new(OFFICIALS)
        .column(ColumnSpec::text("game_id").required())
        .column(ColumnSpec::text("official_id").required())
        .columns(text(&["first_name", "last_name", "jersey_num"]))
}

pub fn inactive_players() -> TableSchema {
    TableSchema::new(INACTIVE_PLAYERS)
        .column(ColumnSpec::text("game_id").required())
        .column(ColumnSpec::text("player_id").required())
        .columns(text(&[
            "first_name",
            "last_name",
            "jersey_num",
            "team_id",
            "team_city",
            "team_name",
            "team_abbreviation",
        ]))
}

pub fn game_info() -> TableSchema {
    TableSchema::new(GAME_INFO)
        .column(ColumnSpec::text("game_id").required().unique())
        .column(ColumnSpec::date("game_date"))
        .column(ColumnSpec::int("attendance"))
        .column(ColumnSpec::text("game_time"))
}

pub fn line_score() -> TableSchema {
    let periods: Vec<String> = (1..=4)
        .map(|q| format!("pts_qtr{q}"))
        .chain((1..=10).map(|ot| format!("pts_ot{ot}")))
        .collect();
    let per_team = [
        vec![ColumnSpec::text("team_id").required()],
        text(&["team_abbreviation", "team_city_name", "team_nickname", "team_wins_losses"]),
        periods.iter().map(|p| ColumnSpec::int(p)).collect(),
        vec![ColumnSpec::int("pts")],
    ]
    .concat();

    TableSchema::new(LINE_SCORE)
        .column(ColumnSpec::date("game_date_est").required())
        .column(ColumnSpec::int("game_sequence"))
        .column(ColumnSpec::text("game_id").required().unique())
        .paired_columns(&per_team)
}

pub fn play_by_play() -> TableSchema {
    let mut schema = TableSchema::new(PLAY_BY_PLAY)
        .column(ColumnSpec::text("game_id").required())
        .column(ColumnSpec::int("eventnum").required())
        .columns(ints(&["eventmsgtype", "eventmsgactiontype", "period"]))
        .columns(text(&[
            "wctimestring",
            "pctimestring",
            "homedescription",
            "neutraldescription",
            "visitordescription",
            "score",
            "scoremargin",
        ]));
    for n in 1..=3 {
        schema = schema
            .column(ColumnSpec::int(&format!("person{n}type")))
            .column(ColumnSpec::text(&format!("player{n}_id")))
            .column(ColumnSpec::text(&format!("player{n}_name")))
            .column(ColumnSpec::text(&format!("player{n}_team_id")))
            .column(ColumnSpec::text(&format!("player{n}_team_city")))
            .column(ColumnSpec::text(&format!("player{n}_team_nickname")))
            .column(ColumnSpec::text(&format!("player{n}_team_abbreviation")));
    }
    schema.column(ColumnSpec::boolean("video_available_flag"))
}

/// Anthropometric and athletic measurements. Drill columns the provider
/// adds or drops between seasons are not part of the table.
pub fn draft_combine_stats() -> TableSchema {
    TableSchema::new(DRAFT_COMBINE_STATS)
        .add_missing_columns()
        .column(ColumnSpec::text("season"))
        .column(ColumnSpec::text("player_id").required())
        .columns(text(&["first_name", "last_name", "player_name", "position"]))
        .column(ColumnSpec::float("height_wo_shoes"))
        .column(ColumnSpec::text("height_wo_shoes_ft_in"))
        .column(ColumnSpec::float("height_w_shoes"))
        .column(ColumnSpec::text("height_w_shoes_ft_in"))
        .column(ColumnSpec::float("weight"))
        .column(ColumnSpec::float("wingspan"))
        .column(ColumnSpec::text("wingspan_ft_in"))
        .column(ColumnSpec::float("standing_reach"))
        .column(ColumnSpec::text("standing_reach_ft_in"))
        .columns(floats(&[
            "body_fat_pct",
            "hand_length",
            "hand_width",
            "standing_vertical_leap",
            "max_vertical_leap",
            "lane_agility_time",
            "modified_lane_agility_time",
            "three_quarter_sprint",
            "bench_press",
        ]))
}

pub fn draft_history() -> TableSchema {
    TableSchema::new(DRAFT_HISTORY)
        .column(ColumnSpec::text("person_id").required())
        .column(ColumnSpec::text("player_name"))
        .column(ColumnSpec::text("season"))
        .columns(ints(&["round_number", "round_pick", "overall_pick"]))
        .columns(text(&[
            "draft_type",
            "team_id",
            "team_city",
            "team_name",
            "team_abbreviation",
            "organization",
            "organization_type",
        ]))
        .column(ColumnSpec::boolean("player_profile_flag"))
}

pub fn registry() -> SchemaRegistry {
    SchemaRegistry::new()
        .register(player())
        .register(team())
        .register(game())
        .register(common_player_info())
        .register(team_details())
        .register(team_history())
        .register(team_info_common())
        .register(game_summary())
        .register(other_stats())
        .register(officials())
        .register(inactive_players())
        .register(game_info())
        .register(line_score())
        .register(play_by_play())
        .register(draft_combine_stats())
        .register(draft_history())
}
