//! Ordered collection of equally long named columns.

use rx_core::{Error, Result};

use crate::column::Column;

/// An in-memory table: named columns in insertion order, all of the same length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Column>,
    n_rows: usize,
}

impl Table {
    /// Empty table with zero columns and zero rows.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty table with a fixed row count (for tables built column by column
    /// from closures that need to know the row count up front).
    pub fn with_rows(n_rows: usize) -> Self {
        Self { names: Vec::new(), columns: Vec::new(), n_rows }
    }

    /// Build from `(name, column)` pairs.
    pub fn from_columns(pairs: Vec<(String, Column)>) -> Result<Self> {
        let mut t = Table::new();
        for (name, col) in pairs {
            t.insert(name, col)?;
        }
        Ok(t)
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.n_rows
    }

    /// Number of columns.
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Column names in order.
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    /// True if a column with this name exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Borrow a column by name.
    pub fn column(&self, name: &str) -> Result<&Column> {
        self.position(name)
            .map(|i| &self.columns[i])
            .ok_or_else(|| Error::Column(format!("column '{name}' not found")))
    }

    /// Iterate `(name, column)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.names.iter().map(String::as_str).zip(self.columns.iter())
    }

    /// Insert a column, replacing one of the same name in place.
    ///
    /// The first column of an empty table fixes the row count.
    pub fn insert(&mut self, name: impl Into<String>, col: Column) -> Result<()> {
        let name = name.into();
        if self.columns.is_empty() && self.n_rows == 0 {
            self.n_rows = col.len();
        } else if col.len() != self.n_rows {
            return Err(Error::Column(format!(
                "column '{name}' has {} rows, table has {}",
                col.len(),
                self.n_rows
            )));
        }
        match self.position(&name) {
            Some(i) => self.columns[i] = col,
            None => {
                self.names.push(name);
                self.columns.push(col);
            }
        }
        Ok(())
    }

    /// Remove a column and return it.
    pub fn remove(&mut self, name: &str) -> Option<Column> {
        let i = self.position(name)?;
        self.names.remove(i);
        Some(self.columns.remove(i))
    }

    /// New table with only the named columns, in the given order.
    pub fn select(&self, names: &[String]) -> Result<Table> {
        let mut out = Table::with_rows(self.n_rows);
        for name in names {
            out.insert(name.clone(), self.column(name)?.clone())?;
        }
        Ok(out)
    }

    /// Keep the rows where `mask` is true.
    pub fn filter(&self, mask: &[bool]) -> Result<Table> {
        if mask.len() != self.n_rows {
            return Err(Error::Column(format!(
                "filter mask has {} rows, table has {}",
                mask.len(),
                self.n_rows
            )));
        }
        let kept = mask.iter().filter(|&&m| m).count();
        let mut out = Table::with_rows(kept);
        for (name, col) in self.iter() {
            out.insert(name, col.filter(mask)?)?;
        }
        Ok(out)
    }

    /// Gather rows by index.
    pub fn take(&self, indices: &[usize]) -> Result<Table> {
        let mut out = Table::with_rows(indices.len());
        for (name, col) in self.iter() {
            out.insert(name, col.take(indices)?)?;
        }
        Ok(out)
    }

    /// Stack tables vertically. Every part must have the same column names
    /// in the same order as the first.
    pub fn concat(parts: &[Table]) -> Result<Table> {
        let Some(first) = parts.first() else {
            return Ok(Table::new());
        };
        if parts.len() == 1 {
            return Ok(first.clone());
        }
        for (i, p) in parts.iter().enumerate().skip(1) {
            if p.names != first.names {
                return Err(Error::Column(format!(
                    "partition {i} has columns {:?}, expected {:?}",
                    p.names, first.names
                )));
            }
        }
        let total: usize = parts.iter().map(|p| p.n_rows).sum();
        let mut out = Table::with_rows(total);
        for (j, name) in first.names.iter().enumerate() {
            let cols: Vec<&Column> = parts.iter().map(|p| &p.columns[j]).collect();
            out.insert(name.clone(), Column::concat(&cols)?)?;
        }
        Ok(out)
    }

    /// Scalar column as `f64` values.
    pub fn f64s(&self, name: &str) -> Result<Vec<f64>> {
        self.column(name)?.to_f64().map_err(|e| with_name(e, name))
    }

    /// Scalar column as `i64` values.
    pub fn i64s(&self, name: &str) -> Result<Vec<i64>> {
        self.column(name)?.to_i64().map_err(|e| with_name(e, name))
    }

    /// Scalar column as `u64` values.
    pub fn u64s(&self, name: &str) -> Result<Vec<u64>> {
        self.column(name)?.to_u64().map_err(|e| with_name(e, name))
    }

    /// Scalar column as booleans (non-zero is true).
    pub fn bools(&self, name: &str) -> Result<Vec<bool>> {
        self.column(name)?.to_bool().map_err(|e| with_name(e, name))
    }

    /// Numeric list column as `f64` sequences.
    pub fn f64_lists(&self, name: &str) -> Result<Vec<Vec<f64>>> {
        self.column(name)?.to_f64_lists().map_err(|e| with_name(e, name))
    }

    /// String column.
    pub fn strs(&self, name: &str) -> Result<&[String]> {
        self.column(name)?.as_strs().map_err(|e| with_name(e, name))
    }

    /// String-list column.
    pub fn str_lists(&self, name: &str) -> Result<&[Vec<String>]> {
        self.column(name)?.as_str_lists().map_err(|e| with_name(e, name))
    }
}

fn with_name(err: Error, name: &str) -> Error {
    match err {
        Error::Column(msg) => Error::Column(format!("{name}: {msg}")),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::from_columns(vec![
            ("a".into(), Column::I32(vec![1, 2, 3])),
            ("b".into(), Column::F64(vec![0.5, 1.5, 2.5])),
        ])
        .unwrap()
    }

    #[test]
    fn insert_checks_length() {
        let mut t = sample();
        assert!(t.insert("c", Column::Bool(vec![true])).is_err());
        t.insert("a", Column::I32(vec![9, 9, 9])).unwrap();
        assert_eq!(t.column_names(), &["a".to_string(), "b".to_string()]);
        assert_eq!(t.i64s("a").unwrap(), vec![9, 9, 9]);
    }

    #[test]
    fn filter_and_select() {
        let t = sample();
        let f = t.filter(&[false, true, true]).unwrap();
        assert_eq!(f.num_rows(), 2);
        assert_eq!(f.f64s("b").unwrap(), vec![1.5, 2.5]);
        let s = t.select(&["b".to_string()]).unwrap();
        assert_eq!(s.num_columns(), 1);
        assert!(t.select(&["zz".to_string()]).is_err());
    }

    #[test]
    fn concat_requires_same_layout() {
        let t = sample();
        let c = Table::concat(&[t.clone(), t.clone()]).unwrap();
        assert_eq!(c.num_rows(), 6);
        let other = t.select(&["b".to_string(), "a".to_string()]).unwrap();
        assert!(Table::concat(&[t, other]).is_err());
    }

    #[test]
    fn zero_row_filter_keeps_schema() {
        let t = sample().filter(&[false, false, false]).unwrap();
        assert_eq!(t.num_rows(), 0);
        assert_eq!(t.num_columns(), 2);
    }
}
