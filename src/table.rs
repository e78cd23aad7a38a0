// 📋 Table - string-valued columnar frame
//
// Every extract has its own column vintage, so tables are schema-less:
// ordered column names plus rows of optional text. Typed interpretation
// (dates, counts, flags) happens at the point of use.

use std::collections::HashMap;

/// One cell. `None` is null; empty strings are normalised to `None` on load.
pub type Value = Option<String>;

/// One row, positionally aligned with `Table::columns`.
pub type Row = Vec<Value>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Table {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a table from rows; short rows are null-padded, long rows truncated.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Row>) -> Self {
        let mut table = Table::new(columns);
        for row in rows {
            table.push_row(row);
        }
        table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Name → position lookup for hot loops
    pub fn index_map(&self) -> HashMap<&str, usize> {
        self.columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect()
    }

    pub fn push_row(&mut self, mut row: Row) {
        row.resize(self.columns.len(), None);
        self.rows.push(row);
    }

    pub fn value(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .and_then(|v| v.as_deref())
    }

    /// Values of a named column, or `None` if the column does not exist
    pub fn column_values(&self, name: &str) -> Option<Vec<Option<&str>>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r[idx].as_deref()).collect())
    }

    pub fn null_count(&self, name: &str) -> Option<usize> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().filter(|r| r[idx].is_none()).count())
    }

    /// Rename a column in place. Returns false if `from` does not exist.
    /// An existing column already called `to` is dropped first.
    pub fn rename_column(&mut self, from: &str, to: &str) -> bool {
        if from == to {
            return self.has_column(from);
        }
        if !self.has_column(from) {
            return false;
        }
        self.drop_column(to);
        if let Some(idx) = self.column_index(from) {
            self.columns[idx] = to.to_string();
        }
        true
    }

    /// Replace a column's values, or append it if absent
    pub fn set_column(&mut self, name: &str, values: Vec<Value>) {
        debug_assert_eq!(values.len(), self.rows.len());
        match self.column_index(name) {
            Some(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                self.columns.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
    }

    pub fn drop_column(&mut self, name: &str) -> bool {
        match self.column_index(name) {
            Some(idx) => {
                self.columns.remove(idx);
                for row in &mut self.rows {
                    row.remove(idx);
                }
                true
            }
            None => false,
        }
    }

    /// Project onto the named columns that exist, in the order given
    pub fn select(&self, names: &[&str]) -> Table {
        let picks: Vec<(usize, &str)> = names
            .iter()
            .filter_map(|n| self.column_index(n).map(|i| (i, *n)))
            .collect();

        Table {
            columns: picks.iter().map(|(_, n)| n.to_string()).collect(),
            rows: self
                .rows
                .iter()
                .map(|r| picks.iter().map(|(i, _)| r[*i].clone()).collect())
                .collect(),
        }
    }

    /// Keep only rows matching the predicate
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&Row) -> bool,
    {
        self.rows.retain(|r| keep(r));
    }
}

// ============================================================================
// VALUE HELPERS
// ============================================================================

/// Trim and turn empty strings into nulls
pub fn clean(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parse a count such as "3", "3.0" or " 2 "
pub fn parse_count(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        return Some(n);
    }
    match trimmed.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 => Some(f as i64),
        _ => None,
    }
}

pub fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|f| f.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::from_rows(
            vec!["a".to_string(), "b".to_string()],
            vec![
                vec![Some("1".to_string()), None],
                vec![Some("2".to_string()), Some("x".to_string())],
            ],
        )
    }

    #[test]
    fn test_short_rows_are_padded() {
        let t = Table::from_rows(vec!["a".into(), "b".into()], vec![vec![Some("1".into())]]);
        assert_eq!(t.rows()[0].len(), 2);
        assert_eq!(t.value(0, 1), None);
    }

    #[test]
    fn test_rename_replaces_existing_target() {
        let mut t = sample();
        assert!(t.rename_column("a", "b"));
        assert_eq!(t.columns(), &["b".to_string()]);
        assert_eq!(t.value(1, 0), Some("2"));
        assert!(!t.rename_column("missing", "c"));
    }

    #[test]
    fn test_set_column_appends_then_replaces() {
        let mut t = sample();
        t.set_column("c", vec![Some("p".into()), Some("q".into())]);
        assert_eq!(t.width(), 3);
        t.set_column("c", vec![None, Some("r".into())]);
        assert_eq!(t.width(), 3);
        assert_eq!(t.null_count("c"), Some(1));
        assert_eq!(t.value(1, 2), Some("r"));
    }

    #[test]
    fn test_select_skips_missing_columns() {
        let t = sample();
        let s = t.select(&["b", "zzz", "a"]);
        assert_eq!(s.columns(), &["b".to_string(), "a".to_string()]);
        assert_eq!(s.value(1, 0), Some("x"));
    }

    #[test]
    fn test_parse_count_accepts_float_text() {
        assert_eq!(parse_count("3"), Some(3));
        assert_eq!(parse_count(" 2.0 "), Some(2));
        assert_eq!(parse_count("2.5"), None);
        assert_eq!(parse_count("n/a"), None);
        assert_eq!(clean("  "), None);
        assert_eq!(clean(" Sedan "), Some("Sedan".to_string()));
    }
}
