use std::collections::HashMap;
use std::sync::Arc;

use crate::value::{ColumnType, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    pub unique: bool,
    /// Filler used when the column is absent and the table adds missing columns.
    pub default: Option<Value>,
}

impl ColumnSpec {
    pub fn new(name: &str, ty: ColumnType) -> Self {
        Self { name: name.to_string(), ty, nullable: true, unique: false, default: None }
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, ColumnType::Text)
    }

    pub fn int(name: &str) -> Self {
        Self::new(name, ColumnType::Int)
    }

    pub fn float(name: &str) -> Self {
        Self::new(name, ColumnType::Float)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, ColumnType::Bool)
    }

    pub fn date(name: &str) -> Self {
        Self::new(name, ColumnType::Date)
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    fn suffixed(&self, suffix: &str) -> Self {
        Self { name: format!("{}_{suffix}", self.name), ..self.clone() }
    }
}

/// Declarative description of one table kind. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    /// Undeclared columns are violations instead of being dropped.
    pub strict: bool,
    /// Absent columns are filled from their default instead of failing.
    pub add_missing_columns: bool,
}

impl TableSchema {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), columns: Vec::new(), strict: false, add_missing_columns: false }
    }

    pub fn column(mut self, spec: ColumnSpec) -> Self {
        self.columns.push(spec);
        self
    }

    pub fn columns(mut self, specs: impl IntoIterator<Item = ColumnSpec>) -> Self {
        self.columns.extend(specs);
        self
    }

    /// Declares each spec twice, first every `<name>_home`, then every
    /// `<name>_away`, the layout the home/away reshape produces.
    pub fn paired_columns(mut self, specs: &[ColumnSpec]) -> Self {
        self.columns.extend(specs.iter().map(|s| s.suffixed("home")));
        self.columns.extend(specs.iter().map(|s| s.suffixed("away")));
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn add_missing_columns(mut self) -> Self {
        self.add_missing_columns = true;
        self
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn spec(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Read-only lookup of every declared table schema.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<TableSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, schema: TableSchema) -> Self {
        self.schemas.insert(schema.name.clone(), Arc::new(schema));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<TableSchema>> {
        self.schemas.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }
}
