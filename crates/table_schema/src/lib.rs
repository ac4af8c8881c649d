//! Typed tables for the sync pipeline: raw fragments, declarative schemas,
//! validation, and the merge helpers that aggregate fragments into tables.

pub mod fragment;
pub mod merge;
pub mod schema;
pub mod validate;
pub mod value;

pub use fragment::Fragment;
pub use merge::{concat, is_home_matchup, select_new, split_home_away, HomeAwayJoin, HomeRule, MergeError};
pub use schema::{ColumnSpec, SchemaRegistry, TableSchema};
pub use validate::{validate, SchemaViolation, ValidatedTable, Violation};
pub use value::{parse_date, ColumnType, Value};
