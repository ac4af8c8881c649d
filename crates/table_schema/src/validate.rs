use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;

use crate::fragment::Fragment;
use crate::schema::TableSchema;
use crate::value::Value;

/// One defect found while validating a fragment. `row` is `None` for
/// column-level problems (missing or undeclared columns).
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub row: Option<usize>,
    pub column: String,
    pub reason: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.row {
            Some(row) => write!(f, "row {row}, column {}: {}", self.column, self.reason),
            None => write!(f, "column {}: {}", self.column, self.reason),
        }
    }
}

/// The complete defect report for one fragment or table.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{table}: {} schema violation(s), first: {}", .violations.len(), first_violation(.violations))]
pub struct SchemaViolation {
    pub table: String,
    pub violations: Vec<Violation>,
}

fn first_violation(violations: &[Violation]) -> String {
    violations.first().map(|v| v.to_string()).unwrap_or_default()
}

impl SchemaViolation {
    pub fn mentions_column(&self, column: &str) -> bool {
        self.violations.iter().any(|v| v.column == column)
    }

    /// Multi-line rendering of every violation, for logs.
    pub fn report(&self) -> String {
        self.violations.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("\n")
    }
}

/// Rows that conform to their schema, in the schema's column order.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedTable {
    schema: Arc<TableSchema>,
    rows: Vec<Vec<Value>>,
}

impl ValidatedTable {
    pub fn empty(schema: &Arc<TableSchema>) -> Self {
        Self { schema: Arc::clone(schema), rows: Vec::new() }
    }

    pub(crate) fn from_rows(schema: Arc<TableSchema>, rows: Vec<Vec<Value>>) -> Self {
        Self { schema, rows }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    pub fn column_names(&self) -> Vec<String> {
        self.schema.column_names()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.schema.columns.iter().position(|c| c.name == name)
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Distinct non-null values of `column` in first-seen order.
    pub fn distinct_keys(&self, column: &str) -> Vec<String> {
        let Some(idx) = self.column_index(column) else { return Vec::new() };
        let mut seen = std::collections::HashSet::new();
        self.rows
            .iter()
            .filter_map(|r| r.get(idx).and_then(Value::key))
            .filter(|k| seen.insert(k.clone()))
            .collect()
    }

    /// Largest date in `column`, ignoring nulls.
    pub fn max_date(&self, column: &str) -> Option<NaiveDate> {
        let idx = self.column_index(column)?;
        self.rows.iter().filter_map(|r| r.get(idx).and_then(Value::as_date)).max()
    }
}

/// Where a schema column's cells come from.
enum Source {
    Column(usize),
    Filler(Value),
    /// Already reported as a missing column.
    Missing,
}

/// Validates `fragment` against `schema`, coercing cell types first and
/// collecting every violation before failing.
pub fn validate(fragment: Fragment, schema: &Arc<TableSchema>) -> Result<ValidatedTable, SchemaViolation> {
    let mut violations = Vec::new();

    let mut positions: HashMap<&str, usize> = HashMap::new();
    for (i, name) in fragment.columns.iter().enumerate() {
        if positions.insert(name.as_str(), i).is_some() {
            violations.push(Violation {
                row: None,
                column: name.clone(),
                reason: "column appears more than once".into(),
            });
        }
    }

    for name in &fragment.columns {
        if schema.spec(name).is_none() {
            if schema.strict {
                violations.push(Violation {
                    row: None,
                    column: name.clone(),
                    reason: "column not declared in schema".into(),
                });
            } else {
                debug!(table = %schema.name, column = %name, "dropping undeclared column");
            }
        }
    }

    let mut sources = Vec::with_capacity(schema.columns.len());
    for spec in &schema.columns {
        match positions.get(spec.name.as_str()) {
            Some(&i) => sources.push(Source::Column(i)),
            None if schema.add_missing_columns && (spec.nullable || spec.default.is_some()) => {
                sources.push(Source::Filler(spec.default.clone().unwrap_or(Value::Null)));
            }
            None => {
                violations.push(Violation {
                    row: None,
                    column: spec.name.clone(),
                    reason: "missing column".into(),
                });
                sources.push(Source::Missing);
            }
        }
    }

    let width = fragment.columns.len();
    let mut rows = Vec::with_capacity(fragment.rows.len());
    for (r, raw) in fragment.rows.into_iter().enumerate() {
        if raw.len() != width {
            violations.push(Violation {
                row: Some(r),
                column: "*".into(),
                reason: format!("row has {} cells, expected {width}", raw.len()),
            });
            continue;
        }

        let mut row = Vec::with_capacity(schema.columns.len());
        for (c, spec) in schema.columns.iter().enumerate() {
            let cell = match &sources[c] {
                Source::Column(i) => raw[*i].clone(),
                Source::Filler(filler) => filler.clone(),
                Source::Missing => {
                    row.push(Value::Null);
                    continue;
                }
            };
            match spec.ty.coerce(cell) {
                Ok(v) if v.is_null() && !spec.nullable => {
                    violations.push(Violation {
                        row: Some(r),
                        column: spec.name.clone(),
                        reason: "null value in non-nullable column".into(),
                    });
                    row.push(v);
                }
                Ok(v) => row.push(v),
                Err(reason) => {
                    violations.push(Violation { row: Some(r), column: spec.name.clone(), reason });
                    row.push(Value::Null);
                }
            }
        }
        rows.push(row);
    }

    violations.extend(unique_violations(schema, &rows));

    if violations.is_empty() {
        Ok(ValidatedTable::from_rows(Arc::clone(schema), rows))
    } else {
        Err(SchemaViolation { table: schema.name.clone(), violations })
    }
}

/// Duplicate values in columns declared unique.
pub(crate) fn unique_violations(schema: &TableSchema, rows: &[Vec<Value>]) -> Vec<Violation> {
    let mut out = Vec::new();
    for (c, spec) in schema.columns.iter().enumerate().filter(|(_, s)| s.unique) {
        let mut first_seen: HashMap<String, usize> = HashMap::new();
        for (r, row) in rows.iter().enumerate() {
            let Some(key) = row.get(c).and_then(Value::key) else { continue };
            if let Some(first) = first_seen.get(&key) {
                out.push(Violation {
                    row: Some(r),
                    column: spec.name.clone(),
                    reason: format!("duplicate value {key:?} (first at row {first})"),
                });
            } else {
                first_seen.insert(key, r);
            }
        }
    }
    out
}
