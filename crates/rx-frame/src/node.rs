//! Lazy dataframe nodes.
//!
//! A [`Node`] records column definitions and row filters against a shared
//! [`TableSource`]. Cloning a node is cheap and the clone can be extended
//! independently; the source is only read when an action runs.

use std::path::Path;
use std::sync::Arc;

use rx_core::{Error, Result};

use crate::column::Column;
use crate::expr::CompiledExpr;
use crate::io::{WriteOptions, write_table};
use crate::table::Table;

/// A table-producing input with a schema known before any data is read.
pub trait TableSource: Send + Sync {
    /// Column names the loaded table will contain.
    fn columns(&self) -> &[String];

    /// Read the full table.
    fn load(&self) -> Result<Table>;

    /// Human-readable description for logs and errors.
    fn describe(&self) -> String {
        "table".to_string()
    }
}

/// An already materialised table.
#[derive(Debug, Clone)]
pub struct MemorySource {
    table: Arc<Table>,
    names: Vec<String>,
}

impl MemorySource {
    /// Wrap a table.
    pub fn new(table: Table) -> Self {
        let names = table.column_names().to_vec();
        Self { table: Arc::new(table), names }
    }
}

impl TableSource for MemorySource {
    fn columns(&self) -> &[String] {
        &self.names
    }

    fn load(&self) -> Result<Table> {
        Ok(self.table.as_ref().clone())
    }

    fn describe(&self) -> String {
        format!("memory ({} rows)", self.table.num_rows())
    }
}

/// Vectorised column definition: receives the current table, returns one value per row.
pub type ColumnFn = Arc<dyn Fn(&Table) -> Result<Column> + Send + Sync>;

/// Vectorised row predicate.
pub type MaskFn = Arc<dyn Fn(&Table) -> Result<Vec<bool>> + Send + Sync>;

enum Op {
    Define { name: String, f: ColumnFn },
    Alias { alias: String, source: String },
    Filter { label: String, f: MaskFn },
}

/// Lazy view over a source: ordered column definitions and filters.
#[derive(Clone)]
pub struct Node {
    source: Arc<dyn TableSource>,
    ops: Vec<Arc<Op>>,
    columns: Vec<String>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("source", &self.source.describe())
            .field("ops", &self.ops.len())
            .field("columns", &self.columns.len())
            .finish()
    }
}

impl Node {
    /// Root node over a source.
    pub fn from_source(source: impl TableSource + 'static) -> Self {
        Self::from_shared(Arc::new(source))
    }

    /// Root node over a shared source.
    pub fn from_shared(source: Arc<dyn TableSource>) -> Self {
        let columns = source.columns().to_vec();
        Self { source, ops: Vec::new(), columns }
    }

    /// Root node over an in-memory table.
    pub fn from_table(table: Table) -> Self {
        Self::from_source(MemorySource::new(table))
    }

    /// Description of the underlying source.
    pub fn describe(&self) -> String {
        self.source.describe()
    }

    /// True if the column is available (from the source or defined on this node).
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Available column names: source columns then definitions, in order.
    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    fn check_inputs(&self, what: &str, inputs: &[&str]) -> Result<()> {
        match inputs.iter().find(|i| !self.has_column(i)) {
            Some(missing) => Err(Error::Column(format!(
                "{what}: input column '{missing}' is not available"
            ))),
            None => Ok(()),
        }
    }

    fn push(&self, op: Op, new_column: Option<&str>) -> Node {
        let mut next = self.clone();
        next.ops.push(Arc::new(op));
        if let Some(name) = new_column {
            if !next.has_column(name) {
                next.columns.push(name.to_string());
            }
        }
        next
    }

    /// Define a new column. Fails if the name exists or an input is missing.
    pub fn define<F>(&self, name: &str, inputs: &[&str], f: F) -> Result<Node>
    where
        F: Fn(&Table) -> Result<Column> + Send + Sync + 'static,
    {
        self.define_fn(name, inputs, Arc::new(f))
    }

    /// [`Node::define`] with a shared closure.
    pub fn define_fn(&self, name: &str, inputs: &[&str], f: ColumnFn) -> Result<Node> {
        if self.has_column(name) {
            return Err(Error::Column(format!("column '{name}' is already defined")));
        }
        self.check_inputs(&format!("define '{name}'"), inputs)?;
        Ok(self.push(Op::Define { name: name.to_string(), f }, Some(name)))
    }

    /// Replace the values of an existing column.
    pub fn redefine<F>(&self, name: &str, inputs: &[&str], f: F) -> Result<Node>
    where
        F: Fn(&Table) -> Result<Column> + Send + Sync + 'static,
    {
        if !self.has_column(name) {
            return Err(Error::Column(format!("cannot redefine unknown column '{name}'")));
        }
        self.check_inputs(&format!("redefine '{name}'"), inputs)?;
        Ok(self.push(Op::Define { name: name.to_string(), f: Arc::new(f) }, None))
    }

    /// Define a column whose values are those of an expression (as `f64`).
    pub fn define_expr(&self, name: &str, expr: &str) -> Result<Node> {
        let compiled = CompiledExpr::compile(expr)?;
        let inputs: Vec<&str> = compiled.required_branches.iter().map(String::as_str).collect();
        self.check_inputs(&format!("define '{name}'"), &inputs)?;
        self.define_fn(
            name,
            &[],
            Arc::new(move |t: &Table| Ok(Column::F64(compiled.eval_table(t)?))),
        )
    }

    /// Make `source` also available under `alias`.
    pub fn alias(&self, alias: &str, source: &str) -> Result<Node> {
        if self.has_column(alias) {
            return Err(Error::Column(format!("column '{alias}' is already defined")));
        }
        self.check_inputs(&format!("alias '{alias}'"), &[source])?;
        Ok(self.push(Op::Alias { alias: alias.to_string(), source: source.to_string() }, Some(alias)))
    }

    /// Keep rows where the predicate is true.
    pub fn filter<F>(&self, label: &str, inputs: &[&str], f: F) -> Result<Node>
    where
        F: Fn(&Table) -> Result<Vec<bool>> + Send + Sync + 'static,
    {
        self.check_inputs(&format!("filter '{label}'"), inputs)?;
        Ok(self.push(Op::Filter { label: label.to_string(), f: Arc::new(f) }, None))
    }

    /// Keep rows where a boolean expression holds.
    ///
    /// The expression is compiled now; every column it names must be available.
    pub fn filter_expr(&self, expr: &str) -> Result<Node> {
        let compiled = CompiledExpr::compile(expr)?;
        let inputs: Vec<&str> = compiled.required_branches.iter().map(String::as_str).collect();
        self.check_inputs(&format!("filter '{}'", compiled.source()), &inputs)?;
        let label = compiled.source().to_string();
        Ok(self.push(
            Op::Filter { label, f: Arc::new(move |t: &Table| compiled.eval_mask(t)) },
            None,
        ))
    }

    /// Keep rows where a boolean (or numeric, non-zero) column is true.
    pub fn filter_column(&self, name: &str) -> Result<Node> {
        self.check_inputs(&format!("filter '{name}'"), &[name])?;
        let col = name.to_string();
        Ok(self.push(
            Op::Filter { label: name.to_string(), f: Arc::new(move |t: &Table| t.bools(&col)) },
            None,
        ))
    }

    /// Load the source and apply every definition and filter.
    pub fn collect(&self) -> Result<Table> {
        let mut table = self.source.load()?;
        for op in &self.ops {
            match op.as_ref() {
                Op::Define { name, f } => {
                    let col = f(&table).map_err(|e| context(e, &format!("define '{name}'")))?;
                    if col.len() != table.num_rows() {
                        return Err(Error::Computation(format!(
                            "define '{name}' produced {} rows for a table of {}",
                            col.len(),
                            table.num_rows()
                        )));
                    }
                    table.insert(name.clone(), col)?;
                }
                Op::Alias { alias, source } => {
                    let col = table.column(source)?.clone();
                    table.insert(alias.clone(), col)?;
                }
                Op::Filter { label, f } => {
                    let mask = f(&table).map_err(|e| context(e, &format!("filter '{label}'")))?;
                    table = table.filter(&mask)?;
                }
            }
        }
        Ok(table)
    }

    /// Materialise only the named columns, in the given order.
    pub fn collect_columns(&self, columns: &[String]) -> Result<Table> {
        self.collect()?.select(columns)
    }

    /// Number of rows passing all filters.
    pub fn count(&self) -> Result<usize> {
        Ok(self.collect()?.num_rows())
    }

    /// Sum of a scalar numeric column.
    pub fn sum(&self, column: &str) -> Result<f64> {
        Ok(self.collect()?.f64s(column)?.iter().sum())
    }

    /// Minimum of a scalar numeric column, `None` when no rows pass.
    pub fn min(&self, column: &str) -> Result<Option<f64>> {
        Ok(self.collect()?.f64s(column)?.into_iter().reduce(f64::min))
    }

    /// Maximum of a scalar numeric column, `None` when no rows pass.
    pub fn max(&self, column: &str) -> Result<Option<f64>> {
        Ok(self.collect()?.f64s(column)?.into_iter().reduce(f64::max))
    }

    /// Write the named columns of the passing rows to a Parquet file.
    ///
    /// Returns the number of rows written.
    pub fn snapshot(&self, path: &Path, columns: &[String], opts: &WriteOptions) -> Result<usize> {
        let table = self.collect_columns(columns)?;
        write_table(path, &table, opts)?;
        Ok(table.num_rows())
    }
}

fn context(err: Error, what: &str) -> Error {
    match err {
        Error::Column(m) => Error::Column(format!("{what}: {m}")),
        Error::Computation(m) => Error::Computation(format!("{what}: {m}")),
        Error::Expression(m) => Error::Expression(format!("{what}: {m}")),
        other => other,
    }
}
