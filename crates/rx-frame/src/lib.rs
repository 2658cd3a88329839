//! # rx-frame
//!
//! In-memory columnar tables and a lazy dataframe over Parquet sources.
//!
//! A [`Node`] is a cheap value: a shared [`TableSource`] plus an ordered list
//! of column definitions and row filters. Nothing is read until an action
//! (`collect`, `count`, `sum`, `snapshot`, ...) runs.
//!
//! ```no_run
//! use rx_frame::{Column, Node, ParquetSource};
//!
//! let src = ParquetSource::open("events.parquet").unwrap();
//! let node = Node::from_source(src)
//!     .define("pt2", &["pt"], |t| {
//!         let pt = t.f64s("pt")?;
//!         Ok(Column::F64(pt.iter().map(|v| v * v).collect()))
//!     })
//!     .unwrap()
//!     .filter_expr("pt2 > 100 && njet >= 4")
//!     .unwrap();
//! println!("{} rows pass", node.count().unwrap());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod column;
pub mod expr;
pub mod io;
pub mod mt;
pub mod node;
pub mod table;

pub use column::{Column, DType};
pub use expr::CompiledExpr;
pub use io::{
    ParquetSource, TREE_METADATA_KEY, WriteOptions, read_schema, read_table, read_table_columns,
    read_tree_name, write_table,
};
pub use mt::{ImplicitMtGuard, disable_implicit_mt, enable_implicit_mt, is_implicit_mt_enabled};
pub use node::{ColumnFn, MaskFn, MemorySource, Node, TableSource};
pub use table::Table;
