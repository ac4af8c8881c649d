use crate::merge::MergeError;
use crate::value::Value;

/// One named tabular result from a single endpoint call, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Fragment {
    pub fn new(name: impl Into<String>, columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { name: name.into(), columns, rows }
    }

    /// Convenience constructor for literal column lists.
    pub fn from_parts(name: &str, columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        Self::new(name, columns.iter().map(|c| c.to_string()).collect(), rows)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn lowercase_columns(mut self) -> Self {
        for c in &mut self.columns {
            *c = c.to_lowercase();
        }
        self
    }

    pub fn rename_columns(mut self, pairs: &[(&str, &str)]) -> Self {
        for c in &mut self.columns {
            if let Some((_, to)) = pairs.iter().find(|(from, _)| from == c) {
                *c = to.to_string();
            }
        }
        self
    }

    /// Prepends a constant column, e.g. the game id a box-score table omits.
    pub fn with_leading_column(mut self, name: &str, value: Value) -> Self {
        self.columns.insert(0, name.to_string());
        for row in &mut self.rows {
            row.insert(0, value.clone());
        }
        self
    }

    /// Appends a constant column.
    pub fn with_column(mut self, name: &str, value: Value) -> Self {
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(value.clone());
        }
        self
    }

    /// Inner join with `other` on `key`. Columns of `other` whose names already
    /// exist on the left side are not repeated.
    pub fn merge_on(&self, other: &Fragment, key: &str) -> Result<Fragment, MergeError> {
        let lk = self.column_index(key).ok_or_else(|| MergeError::UnknownColumn {
            fragment: self.name.clone(),
            column: key.to_string(),
        })?;
        let rk = other.column_index(key).ok_or_else(|| MergeError::UnknownColumn {
            fragment: other.name.clone(),
            column: key.to_string(),
        })?;

        let extra: Vec<usize> = other
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| !self.columns.contains(c))
            .map(|(i, _)| i)
            .collect();

        let mut columns = self.columns.clone();
        columns.extend(extra.iter().map(|&i| other.columns[i].clone()));

        let mut rows = Vec::new();
        for left in &self.rows {
            let Some(lkey) = left.get(lk).and_then(Value::key) else { continue };
            for right in &other.rows {
                if right.get(rk).and_then(Value::key).as_deref() == Some(lkey.as_str()) {
                    let mut row = left.clone();
                    row.extend(extra.iter().map(|&i| right.get(i).cloned().unwrap_or(Value::Null)));
                    rows.push(row);
                }
            }
        }

        Ok(Fragment::new(self.name.clone(), columns, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_column_is_prepended_to_every_row() {
        let f = Fragment::from_parts("Officials", &["official_id"], vec![vec![Value::Int(1)], vec![Value::Int(2)]])
            .with_leading_column("game_id", Value::text("0022300001"));
        assert_eq!(f.columns, vec!["game_id", "official_id"]);
        assert!(f.rows.iter().all(|r| r[0] == Value::text("0022300001")));
    }

    #[test]
    fn merge_on_joins_matching_keys_and_skips_repeated_columns() {
        let info = Fragment::from_parts(
            "TeamInfoCommon",
            &["team_id", "team_city"],
            vec![vec![Value::Int(1610612747), Value::text("Los Angeles")]],
        );
        let ranks = Fragment::from_parts(
            "TeamSeasonRanks",
            &["team_id", "team_city", "pts_rank"],
            vec![
                vec![Value::text("1610612747"), Value::text("LA"), Value::Int(4)],
                vec![Value::text("1610612738"), Value::text("Boston"), Value::Int(1)],
            ],
        );

        let joined = info.merge_on(&ranks, "team_id").unwrap();
        assert_eq!(joined.columns, vec!["team_id", "team_city", "pts_rank"]);
        assert_eq!(joined.rows, vec![vec![Value::Int(1610612747), Value::text("Los Angeles"), Value::Int(4)]]);
    }

    #[test]
    fn merge_on_unknown_key_fails() {
        let a = Fragment::from_parts("a", &["x"], vec![]);
        assert!(a.merge_on(&a, "team_id").is_err());
    }
}
