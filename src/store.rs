use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use table_schema::{parse_date, ColumnType, ValidatedTable, Value};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Drop whatever the table held and write the new rows.
    Replace,
    Append,
}

impl WriteMode {
    pub fn as_str(self) -> &'static str {
        match self {
            WriteMode::Replace => "replace",
            WriteMode::Append => "append",
        }
    }
}

/// Destination for validated tables.
pub trait RecordSink {
    /// Writes `table` and returns the number of rows written.
    fn write(&self, table: &ValidatedTable, mode: WriteMode) -> Result<usize>;
}

/// Read side used to decide what an incremental sync still has to fetch.
pub trait CheckpointReader {
    /// Latest date in `column`, or `None` when the table is absent or empty.
    fn max_date(&self, table: &str, column: &str) -> Result<Option<NaiveDate>>;

    fn distinct_ids(&self, table: &str, column: &str) -> Result<Vec<String>>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("open sqlite db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn row_count(&self, table: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        if !table_exists(&conn, table)? {
            return Ok(0);
        }
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", quote(table)), [], |r| r.get(0))?;
        Ok(n as usize)
    }
}

impl RecordSink for SqliteStore {
    fn write(&self, table: &ValidatedTable, mode: WriteMode) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let name = quote(table.name());
        let tx = conn.transaction().context("begin write")?;

        if mode == WriteMode::Replace {
            tx.execute_batch(&format!("DROP TABLE IF EXISTS {name}"))?;
        }
        let columns: Vec<String> = table
            .schema()
            .columns
            .iter()
            .map(|c| format!("{} {}", quote(&c.name), sql_type(c.ty)))
            .collect();
        tx.execute_batch(&format!("CREATE TABLE IF NOT EXISTS {name} ({})", columns.join(", ")))
            .with_context(|| format!("create table {}", table.name()))?;

        let names: Vec<String> = table.column_names().iter().map(|c| quote(c)).collect();
        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!("INSERT INTO {name} ({}) VALUES ({placeholders})", names.join(", "));
        {
            let mut insert = tx.prepare(&sql).with_context(|| format!("prepare insert into {}", table.name()))?;
            for row in table.rows() {
                insert.execute(params_from_iter(row.iter().map(to_sql)))?;
            }
        }
        tx.commit().context("commit write")?;

        debug!(table = table.name(), mode = mode.as_str(), rows = table.len(), "table written");
        Ok(table.len())
    }
}

impl CheckpointReader for SqliteStore {
    fn max_date(&self, table: &str, column: &str) -> Result<Option<NaiveDate>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        if !table_exists(&conn, table)? {
            return Ok(None);
        }
        let latest: Option<String> = conn
            .query_row(&format!("SELECT MAX({}) FROM {}", quote(column), quote(table)), [], |r| r.get(0))
            .with_context(|| format!("max {table}.{column}"))?;
        Ok(latest.as_deref().and_then(parse_date))
    }

    fn distinct_ids(&self, table: &str, column: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        if !table_exists(&conn, table)? {
            return Ok(Vec::new());
        }
        let sql = format!("SELECT DISTINCT {col} FROM {} WHERE {col} IS NOT NULL", quote(table), col = quote(column));
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map([], |r| r.get::<_, SqlValue>(0))?
            .filter_map(|v| v.map(sql_key).transpose())
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let found = conn
        .query_row("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1", [table], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn sql_type(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Int | ColumnType::Bool => "INTEGER",
        ColumnType::Float => "REAL",
        ColumnType::Text | ColumnType::Date => "TEXT",
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Date(d) => SqlValue::Text(d.format("%Y-%m-%d").to_string()),
    }
}

fn sql_key(value: SqlValue) -> Option<String> {
    match value {
        SqlValue::Null | SqlValue::Blob(_) => None,
        SqlValue::Integer(i) => Value::Int(i).key(),
        SqlValue::Real(f) => Value::Float(f).key(),
        SqlValue::Text(s) => Some(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use table_schema::{validate, ColumnSpec, Fragment, TableSchema};

    fn games(rows: &[(&str, &str)]) -> ValidatedTable {
        let schema = Arc::new(
            TableSchema::new("game")
                .column(ColumnSpec::text("game_id").required().unique())
                .column(ColumnSpec::date("game_date"))
                .column(ColumnSpec::boolean("video_available")),
        );
        let rows = rows.iter().map(|(id, date)| vec![Value::text(*id), Value::text(*date), Value::Int(1)]).collect();
        validate(Fragment::from_parts("LeagueGameLog", &["game_id", "game_date", "video_available"], rows), &schema)
            .unwrap()
    }

    #[test]
    fn replace_then_append() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.write(&games(&[("1", "2023-10-24"), ("2", "2023-10-25")]), WriteMode::Replace).unwrap(), 2);
        assert_eq!(store.write(&games(&[("3", "2023-10-26")]), WriteMode::Append).unwrap(), 1);
        assert_eq!(store.row_count("game").unwrap(), 3);

        store.write(&games(&[("9", "2024-01-02")]), WriteMode::Replace).unwrap();
        assert_eq!(store.row_count("game").unwrap(), 1);
    }

    #[test]
    fn checkpoints_read_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.max_date("game", "game_date").unwrap(), None);
        assert!(store.distinct_ids("game", "game_id").unwrap().is_empty());

        store.write(&games(&[("0022300061", "2023-10-24"), ("0022300062", "2023-10-26")]), WriteMode::Replace).unwrap();
        assert_eq!(store.max_date("game", "game_date").unwrap(), NaiveDate::from_ymd_opt(2023, 10, 26));
        assert_eq!(store.distinct_ids("game", "game_id").unwrap().len(), 2);
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = std::env::temp_dir().join(format!("nba-sync-store-{}", std::process::id()));
        let path = dir.join("nested").join("nba.sqlite");
        let store = SqliteStore::open(&path).unwrap();
        store.write(&games(&[("1", "2023-10-24")]), WriteMode::Append).unwrap();
        assert!(path.exists());
        std::fs::remove_dir_all(dir).ok();
    }
}
