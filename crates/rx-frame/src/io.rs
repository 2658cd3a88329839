//! Parquet read/write for [`Table`]s.
//!
//! Arrow types map onto [`DType`] as follows: `Int8`/`Int16` widen to `I32`,
//! `Float16` widens to `F32`, `LargeUtf8` and `LargeList` are read as their
//! 32-bit-offset forms. Null floats read as NaN; other nulls read as the type
//! default (0, false, "" or an empty list). Columns of any other Arrow type
//! are skipped on read.
//!
//! Every file written here carries the logical tree name in the Arrow schema
//! metadata under [`TREE_METADATA_KEY`], and is written through a sibling
//! temporary file that is renamed into place on success.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, ArrowPrimitiveType, AsArray, BooleanArray, BooleanBuilder, Float32Array,
    Float64Array, Int32Array, Int64Array, ListArray, ListBuilder, StringArray, StringBuilder,
    UInt8Array, UInt16Array, UInt32Array, UInt64Array,
};
use arrow::compute::cast;
use arrow::datatypes::{
    DataType, Field, Float32Type, Float64Type, Int32Type, Int64Type, Schema, UInt8Type,
    UInt16Type, UInt32Type, UInt64Type,
};
use arrow::record_batch::RecordBatch;
use parquet::arrow::{ArrowWriter, ProjectionMask};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use rayon::prelude::*;
use rx_core::{Error, Result};

use crate::column::{Column, DType};
use crate::mt::is_implicit_mt_enabled;
use crate::node::TableSource;
use crate::table::Table;

/// Schema metadata key holding the logical tree name of a file.
pub const TREE_METADATA_KEY: &str = "rarexsec.tree";

// ---------------------------------------------------------------------------
// Type mapping
// ---------------------------------------------------------------------------

fn dtype_of(dt: &DataType) -> Option<DType> {
    Some(match dt {
        DataType::Boolean => DType::Bool,
        DataType::Int8 | DataType::Int16 | DataType::Int32 => DType::I32,
        DataType::Int64 => DType::I64,
        DataType::UInt8 => DType::U8,
        DataType::UInt16 => DType::U16,
        DataType::UInt32 => DType::U32,
        DataType::UInt64 => DType::U64,
        DataType::Float16 | DataType::Float32 => DType::F32,
        DataType::Float64 => DType::F64,
        DataType::Utf8 | DataType::LargeUtf8 => DType::Str,
        DataType::List(f) | DataType::LargeList(f) => match dtype_of(f.data_type())? {
            DType::Bool => DType::ListBool,
            DType::I32 => DType::ListI32,
            DType::I64 => DType::ListI64,
            DType::U8 | DType::U16 | DType::U32 => DType::ListU32,
            DType::F32 => DType::ListF32,
            DType::F64 => DType::ListF64,
            DType::Str => DType::ListStr,
            _ => return None,
        },
        _ => return None,
    })
}

fn element_dtype(dt: DType) -> Option<DType> {
    Some(match dt {
        DType::ListBool => DType::Bool,
        DType::ListI32 => DType::I32,
        DType::ListI64 => DType::I64,
        DType::ListU32 => DType::U32,
        DType::ListF32 => DType::F32,
        DType::ListF64 => DType::F64,
        DType::ListStr => DType::Str,
        _ => return None,
    })
}

fn arrow_type(dt: DType) -> DataType {
    match dt {
        DType::Bool => DataType::Boolean,
        DType::I32 => DataType::Int32,
        DType::I64 => DataType::Int64,
        DType::U8 => DataType::UInt8,
        DType::U16 => DataType::UInt16,
        DType::U32 => DataType::UInt32,
        DType::U64 => DataType::UInt64,
        DType::F32 => DataType::Float32,
        DType::F64 => DataType::Float64,
        DType::Str => DataType::Utf8,
        list => {
            let inner = element_dtype(list).map(arrow_type).unwrap_or(DataType::Null);
            DataType::List(Arc::new(Field::new("item", inner, true)))
        }
    }
}

/// Supported columns of an Arrow schema, in schema order.
pub fn schema_columns(schema: &Schema) -> Vec<(String, DType)> {
    schema
        .fields()
        .iter()
        .filter_map(|f| match dtype_of(f.data_type()) {
            Some(dt) => Some((f.name().clone(), dt)),
            None => {
                tracing::debug!(column = %f.name(), dtype = ?f.data_type(), "skipping unsupported column type");
                None
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Arrow -> Column
// ---------------------------------------------------------------------------

fn primitive<T: ArrowPrimitiveType>(array: &ArrayRef) -> Result<Vec<T::Native>> {
    let a = cast(array, &T::DATA_TYPE)?;
    Ok(a.as_primitive::<T>().iter().map(|v| v.unwrap_or_default()).collect())
}

fn split_rows<T: Clone>(values: &[T], list: &ListArray) -> Vec<Vec<T>> {
    let offsets = list.value_offsets();
    (0..list.len())
        .map(|i| {
            if list.is_null(i) {
                return Vec::new();
            }
            values[offsets[i] as usize..offsets[i + 1] as usize].to_vec()
        })
        .collect()
}

fn array_to_column(array: &ArrayRef, dt: DType) -> Result<Column> {
    Ok(match dt {
        DType::Bool => {
            let a = cast(array, &DataType::Boolean)?;
            Column::Bool(a.as_boolean().iter().map(|v| v.unwrap_or(false)).collect())
        }
        DType::I32 => Column::I32(primitive::<Int32Type>(array)?),
        DType::I64 => Column::I64(primitive::<Int64Type>(array)?),
        DType::U8 => Column::U8(primitive::<UInt8Type>(array)?),
        DType::U16 => Column::U16(primitive::<UInt16Type>(array)?),
        DType::U32 => Column::U32(primitive::<UInt32Type>(array)?),
        DType::U64 => Column::U64(primitive::<UInt64Type>(array)?),
        DType::F32 => {
            let a = cast(array, &DataType::Float32)?;
            Column::F32(a.as_primitive::<Float32Type>().iter().map(|v| v.unwrap_or(f32::NAN)).collect())
        }
        DType::F64 => {
            let a = cast(array, &DataType::Float64)?;
            Column::F64(a.as_primitive::<Float64Type>().iter().map(|v| v.unwrap_or(f64::NAN)).collect())
        }
        DType::Str => {
            let a = cast(array, &DataType::Utf8)?;
            Column::Str(a.as_string::<i32>().iter().map(|v| v.unwrap_or("").to_string()).collect())
        }
        list_dt => {
            let inner = element_dtype(list_dt)
                .ok_or_else(|| Error::Column(format!("unsupported column type {list_dt:?}")))?;
            let a = cast(array, &arrow_type(list_dt))?;
            let list = a.as_list::<i32>();
            let values = array_to_column(list.values(), inner)?;
            match values {
                Column::Bool(v) => Column::ListBool(split_rows(&v, list)),
                Column::I32(v) => Column::ListI32(split_rows(&v, list)),
                Column::I64(v) => Column::ListI64(split_rows(&v, list)),
                Column::U32(v) => Column::ListU32(split_rows(&v, list)),
                Column::F32(v) => Column::ListF32(split_rows(&v, list)),
                Column::F64(v) => Column::ListF64(split_rows(&v, list)),
                Column::Str(v) => Column::ListStr(split_rows(&v, list)),
                other => {
                    return Err(Error::Column(format!(
                        "unsupported list element type {:?}",
                        other.dtype()
                    )));
                }
            }
        }
    })
}

fn batch_to_table(batch: &RecordBatch, columns: &[(String, DType)]) -> Result<Table> {
    let mut t = Table::with_rows(batch.num_rows());
    for (name, dt) in columns {
        let array = batch
            .column_by_name(name)
            .ok_or_else(|| Error::Column(format!("column '{name}' missing from record batch")))?;
        let col = array_to_column(array, *dt)
            .map_err(|e| Error::Column(format!("column '{name}': {e}")))?;
        t.insert(name.clone(), col)?;
    }
    Ok(t)
}

fn empty_column(dt: DType) -> Column {
    match dt {
        DType::Bool => Column::Bool(Vec::new()),
        DType::I32 => Column::I32(Vec::new()),
        DType::I64 => Column::I64(Vec::new()),
        DType::U8 => Column::U8(Vec::new()),
        DType::U16 => Column::U16(Vec::new()),
        DType::U32 => Column::U32(Vec::new()),
        DType::U64 => Column::U64(Vec::new()),
        DType::F32 => Column::F32(Vec::new()),
        DType::F64 => Column::F64(Vec::new()),
        DType::Str => Column::Str(Vec::new()),
        DType::ListBool => Column::ListBool(Vec::new()),
        DType::ListI32 => Column::ListI32(Vec::new()),
        DType::ListI64 => Column::ListI64(Vec::new()),
        DType::ListU32 => Column::ListU32(Vec::new()),
        DType::ListF32 => Column::ListF32(Vec::new()),
        DType::ListF64 => Column::ListF64(Vec::new()),
        DType::ListStr => Column::ListStr(Vec::new()),
    }
}

// ---------------------------------------------------------------------------
// Column -> Arrow
// ---------------------------------------------------------------------------

fn numeric_list<T: ArrowPrimitiveType>(rows: &[Vec<T::Native>]) -> ArrayRef {
    Arc::new(ListArray::from_iter_primitive::<T, _, _>(
        rows.iter().map(|r| Some(r.iter().map(|&x| Some(x)))),
    ))
}

fn column_to_array(col: &Column) -> ArrayRef {
    match col {
        Column::Bool(v) => Arc::new(BooleanArray::from(v.clone())),
        Column::I32(v) => Arc::new(Int32Array::from(v.clone())),
        Column::I64(v) => Arc::new(Int64Array::from(v.clone())),
        Column::U8(v) => Arc::new(UInt8Array::from(v.clone())),
        Column::U16(v) => Arc::new(UInt16Array::from(v.clone())),
        Column::U32(v) => Arc::new(UInt32Array::from(v.clone())),
        Column::U64(v) => Arc::new(UInt64Array::from(v.clone())),
        Column::F32(v) => Arc::new(Float32Array::from(v.clone())),
        Column::F64(v) => Arc::new(Float64Array::from(v.clone())),
        Column::Str(v) => Arc::new(StringArray::from_iter_values(v.iter())),
        Column::ListI32(v) => numeric_list::<Int32Type>(v),
        Column::ListI64(v) => numeric_list::<Int64Type>(v),
        Column::ListU32(v) => numeric_list::<UInt32Type>(v),
        Column::ListF32(v) => numeric_list::<Float32Type>(v),
        Column::ListF64(v) => numeric_list::<Float64Type>(v),
        Column::ListBool(v) => {
            let mut b = ListBuilder::new(BooleanBuilder::new());
            for row in v {
                for &x in row {
                    b.values().append_value(x);
                }
                b.append(true);
            }
            Arc::new(b.finish())
        }
        Column::ListStr(v) => {
            let mut b = ListBuilder::new(StringBuilder::new());
            for row in v {
                for x in row {
                    b.values().append_value(x);
                }
                b.append(true);
            }
            Arc::new(b.finish())
        }
    }
}

/// Convert a table into a single record batch carrying `metadata` on its schema.
pub fn table_to_batch(table: &Table, metadata: HashMap<String, String>) -> Result<RecordBatch> {
    if table.num_columns() == 0 {
        return Err(Error::Validation("cannot write a table without columns".into()));
    }
    let arrays: Vec<ArrayRef> = table.iter().map(|(_, c)| column_to_array(c)).collect();
    let fields: Vec<Field> = table
        .iter()
        .zip(&arrays)
        .map(|((name, _), a)| Field::new(name, a.data_type().clone(), false))
        .collect();
    let schema = Arc::new(Schema::new(fields).with_metadata(metadata));
    Ok(RecordBatch::try_new(schema, arrays)?)
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

fn open_file(path: &Path) -> Result<File> {
    File::open(path)
        .map_err(|e| Error::Io(std::io::Error::new(e.kind(), format!("{}: {e}", path.display()))))
}

/// Supported columns and schema metadata of a Parquet file, without reading data.
pub fn read_schema(path: &Path) -> Result<(Vec<(String, DType)>, HashMap<String, String>)> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(open_file(path)?)?;
    let schema = builder.schema();
    Ok((schema_columns(schema), schema.metadata().clone()))
}

/// Logical tree name stored in a file's metadata, if any.
pub fn read_tree_name(path: &Path) -> Result<Option<String>> {
    let (_, meta) = read_schema(path)?;
    Ok(meta.get(TREE_METADATA_KEY).cloned())
}

/// Read every supported column of a Parquet file.
pub fn read_table(path: &Path) -> Result<Table> {
    read_impl(path, None)
}

/// Read only the named columns, in the given order.
pub fn read_table_columns(path: &Path, names: &[String]) -> Result<Table> {
    read_impl(path, Some(names))
}

fn read_impl(path: &Path, names: Option<&[String]>) -> Result<Table> {
    let mut builder = ParquetRecordBatchReaderBuilder::try_new(open_file(path)?)?;
    let mut columns = schema_columns(builder.schema());
    if let Some(names) = names {
        if let Some(missing) = names.iter().find(|n| !columns.iter().any(|(c, _)| c == *n)) {
            return Err(Error::Column(format!(
                "column '{missing}' not found in {}",
                path.display()
            )));
        }
        let roots: Vec<usize> = builder
            .schema()
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, f)| names.contains(f.name()))
            .map(|(i, _)| i)
            .collect();
        let mask = ProjectionMask::roots(builder.parquet_schema(), roots);
        builder = builder.with_projection(mask);
        columns = names
            .iter()
            .filter_map(|n| columns.iter().find(|(c, _)| c == n).cloned())
            .collect();
    }
    let reader = builder.build()?;

    let mut parts = Vec::new();
    for batch in reader {
        parts.push(batch_to_table(&batch?, &columns)?);
    }
    if parts.is_empty() {
        let mut t = Table::with_rows(0);
        for (name, dt) in &columns {
            t.insert(name.clone(), empty_column(*dt))?;
        }
        return Ok(t);
    }
    Table::concat(&parts)
}

/// Options for [`write_table`].
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Logical tree name recorded under [`TREE_METADATA_KEY`].
    pub tree_name: Option<String>,
    /// ZSTD compression level.
    pub compression_level: i32,
    /// Upper bound on rows per row group.
    pub max_row_group_rows: Option<usize>,
    /// Extra schema metadata.
    pub metadata: HashMap<String, String>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self { tree_name: None, compression_level: 3, max_row_group_rows: None, metadata: HashMap::new() }
    }
}

impl WriteOptions {
    /// Defaults with a tree name.
    pub fn tree(name: impl Into<String>) -> Self {
        Self { tree_name: Some(name.into()), ..Self::default() }
    }

    /// Set the ZSTD level.
    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    /// Cap the number of rows per row group.
    pub fn with_max_row_group_rows(mut self, rows: usize) -> Self {
        self.max_row_group_rows = Some(rows);
        self
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp{}", std::process::id()))
}

/// Write a table to `path`, replacing any existing file atomically.
pub fn write_table(path: &Path, table: &Table, opts: &WriteOptions) -> Result<()> {
    let mut metadata = opts.metadata.clone();
    if let Some(tree) = &opts.tree_name {
        metadata.insert(TREE_METADATA_KEY.to_string(), tree.clone());
    }
    let batch = table_to_batch(table, metadata)?;

    let mut props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::try_new(opts.compression_level)?));
    if let Some(rows) = opts.max_row_group_rows {
        props = props.set_max_row_group_size(rows.max(1));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = temp_path(path);
    let written = (|| -> Result<()> {
        let file = File::create(&tmp)?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props.build()))?;
        if batch.num_rows() > 0 {
            writer.write(&batch)?;
        }
        writer.close()?;
        Ok(())
    })();
    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Lazy source
// ---------------------------------------------------------------------------

/// One or more Parquet files with a common schema, read as a single table.
///
/// The schema is taken from the first file; every other file must provide
/// the same columns. Loading reads the files in order and concatenates them,
/// in parallel when implicit multi-threading is on.
#[derive(Debug, Clone)]
pub struct ParquetSource {
    paths: Vec<PathBuf>,
    schema: Vec<(String, DType)>,
    names: Vec<String>,
    tree_name: Option<String>,
}

impl ParquetSource {
    /// Source over one file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_many(vec![path.as_ref().to_path_buf()])
    }

    /// Source over several files read as one chain.
    pub fn open_many(paths: Vec<PathBuf>) -> Result<Self> {
        let Some(first) = paths.first() else {
            return Err(Error::Validation("parquet source needs at least one file".into()));
        };
        let (schema, meta) = read_schema(first)?;
        for p in &paths[1..] {
            let (other, _) = read_schema(p)?;
            if let Some((name, _)) =
                schema.iter().find(|(n, _)| !other.iter().any(|(o, _)| o == n))
            {
                return Err(Error::Column(format!(
                    "{} lacks column '{name}' present in {}",
                    p.display(),
                    first.display()
                )));
            }
        }
        let names = schema.iter().map(|(n, _)| n.clone()).collect();
        Ok(Self { tree_name: meta.get(TREE_METADATA_KEY).cloned(), paths, schema, names })
    }

    /// Files in chain order.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Column names and types.
    pub fn schema(&self) -> &[(String, DType)] {
        &self.schema
    }

    /// Tree name recorded in the first file.
    pub fn tree_name(&self) -> Option<&str> {
        self.tree_name.as_deref()
    }

    fn load_one(&self, path: &Path) -> Result<Table> {
        read_table(path)?.select(&self.names)
    }
}

impl TableSource for ParquetSource {
    fn columns(&self) -> &[String] {
        &self.names
    }

    fn load(&self) -> Result<Table> {
        let parts: Vec<Table> = if is_implicit_mt_enabled() && self.paths.len() > 1 {
            self.paths.par_iter().map(|p| self.load_one(p)).collect::<Result<_>>()?
        } else {
            self.paths.iter().map(|p| self.load_one(p)).collect::<Result<_>>()?
        };
        Table::concat(&parts)
    }

    fn describe(&self) -> String {
        match self.paths.as_slice() {
            [one] => one.display().to_string(),
            many => format!("{} (+{} more)", many[0].display(), many.len() - 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("rx_frame_io_{tag}_{}_{nanos}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn sample() -> Table {
        Table::from_columns(vec![
            ("run".into(), Column::I32(vec![1, 1, 2])),
            ("evt".into(), Column::U64(vec![10, 11, 12])),
            ("w".into(), Column::F32(vec![0.5, 1.0, 2.0])),
            ("ok".into(), Column::Bool(vec![true, false, true])),
            ("label".into(), Column::Str(vec!["a".into(), "".into(), "c".into()])),
            ("hits".into(), Column::ListF32(vec![vec![1.0, 2.0], vec![], vec![3.0]])),
            ("proc".into(), Column::ListStr(vec![vec!["nCapture".into()], vec![], vec![]])),
        ])
        .unwrap()
    }

    #[test]
    fn write_then_read_preserves_types_and_tree() {
        let dir = tmp_dir("rt");
        let path = dir.join("t.parquet");
        let opts = WriteOptions::tree("events").with_max_row_group_rows(2);
        write_table(&path, &sample(), &opts).unwrap();

        assert_eq!(read_tree_name(&path).unwrap().as_deref(), Some("events"));
        let back = read_table(&path).unwrap();
        assert_eq!(back, sample());
        assert!(!temp_path(&path).exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn projected_read_orders_columns() {
        let dir = tmp_dir("proj");
        let path = dir.join("p.parquet");
        write_table(&path, &sample(), &WriteOptions::default()).unwrap();
        let t = read_table_columns(&path, &["w".to_string(), "run".to_string()]).unwrap();
        assert_eq!(t.column_names(), &["w".to_string(), "run".to_string()]);
        assert_eq!(t.i64s("run").unwrap(), vec![1, 1, 2]);
        assert!(read_table_columns(&path, &["nope".to_string()]).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn zero_row_table_keeps_schema() {
        let dir = tmp_dir("empty");
        let path = dir.join("e.parquet");
        let empty = sample().filter(&[false, false, false]).unwrap();
        write_table(&path, &empty, &WriteOptions::default()).unwrap();
        let back = read_table(&path).unwrap();
        assert_eq!(back.num_rows(), 0);
        assert_eq!(back.column_names(), sample().column_names());
        assert_eq!(read_tree_name(&path).unwrap(), None);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn source_chains_files() {
        let dir = tmp_dir("chain");
        let a = dir.join("a.parquet");
        let b = dir.join("b.parquet");
        write_table(&a, &sample(), &WriteOptions::tree("events")).unwrap();
        write_table(&b, &sample(), &WriteOptions::tree("events")).unwrap();

        let src = ParquetSource::open_many(vec![a, b]).unwrap();
        assert_eq!(src.tree_name(), Some("events"));
        assert_eq!(src.columns().len(), 7);
        let t = src.load().unwrap();
        assert_eq!(t.num_rows(), 6);
        assert_eq!(t.u64s("evt").unwrap(), vec![10, 11, 12, 10, 11, 12]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tmp_dir("missing");
        assert!(ParquetSource::open(dir.join("nope.parquet")).is_err());
        assert!(ParquetSource::open_many(Vec::new()).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn table_without_columns_is_rejected() {
        let dir = tmp_dir("nocols");
        assert!(write_table(&dir.join("x.parquet"), &Table::new(), &WriteOptions::default()).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
