//! Typed column storage.
//!
//! A [`Column`] owns the values of one table column. Scalar columns hold one
//! value per row; list columns hold a variable-length sequence per row.
//! Conversions into `f64`/`i64`/`u64`/`bool` views are provided for the
//! numeric kinds so that vectorised column closures do not need to match on
//! every storage type.

use rx_core::{Error, Result};

/// Column data type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum DType {
    Bool,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Str,
    ListBool,
    ListI32,
    ListI64,
    ListU32,
    ListF32,
    ListF64,
    ListStr,
}

impl DType {
    /// True for variable-length list types.
    pub fn is_list(&self) -> bool {
        matches!(
            self,
            DType::ListBool
                | DType::ListI32
                | DType::ListI64
                | DType::ListU32
                | DType::ListF32
                | DType::ListF64
                | DType::ListStr
        )
    }

    /// True for scalar numeric or boolean types.
    pub fn is_scalar_numeric(&self) -> bool {
        !self.is_list() && *self != DType::Str
    }

    /// True for scalar floating-point types.
    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }
}

/// Column values.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Column {
    Bool(Vec<bool>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Str(Vec<String>),
    ListBool(Vec<Vec<bool>>),
    ListI32(Vec<Vec<i32>>),
    ListI64(Vec<Vec<i64>>),
    ListU32(Vec<Vec<u32>>),
    ListF32(Vec<Vec<f32>>),
    ListF64(Vec<Vec<f64>>),
    ListStr(Vec<Vec<String>>),
}

/// Apply the same expression to the inner `Vec` of every variant.
macro_rules! each_variant {
    ($col:expr, $v:ident => $body:expr) => {
        match $col {
            Column::Bool($v) => Column::Bool($body),
            Column::I32($v) => Column::I32($body),
            Column::I64($v) => Column::I64($body),
            Column::U8($v) => Column::U8($body),
            Column::U16($v) => Column::U16($body),
            Column::U32($v) => Column::U32($body),
            Column::U64($v) => Column::U64($body),
            Column::F32($v) => Column::F32($body),
            Column::F64($v) => Column::F64($body),
            Column::Str($v) => Column::Str($body),
            Column::ListBool($v) => Column::ListBool($body),
            Column::ListI32($v) => Column::ListI32($body),
            Column::ListI64($v) => Column::ListI64($body),
            Column::ListU32($v) => Column::ListU32($body),
            Column::ListF32($v) => Column::ListF32($body),
            Column::ListF64($v) => Column::ListF64($body),
            Column::ListStr($v) => Column::ListStr($body),
        }
    };
}

fn compact<T: Clone>(values: &[T], mask: &[bool]) -> Vec<T> {
    values.iter().zip(mask).filter(|(_, keep)| **keep).map(|(v, _)| v.clone()).collect()
}

impl Column {
    /// Number of rows.
    pub fn len(&self) -> usize {
        match self {
            Column::Bool(v) => v.len(),
            Column::I32(v) => v.len(),
            Column::I64(v) => v.len(),
            Column::U8(v) => v.len(),
            Column::U16(v) => v.len(),
            Column::U32(v) => v.len(),
            Column::U64(v) => v.len(),
            Column::F32(v) => v.len(),
            Column::F64(v) => v.len(),
            Column::Str(v) => v.len(),
            Column::ListBool(v) => v.len(),
            Column::ListI32(v) => v.len(),
            Column::ListI64(v) => v.len(),
            Column::ListU32(v) => v.len(),
            Column::ListF32(v) => v.len(),
            Column::ListF64(v) => v.len(),
            Column::ListStr(v) => v.len(),
        }
    }

    /// True when the column has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Data type tag.
    pub fn dtype(&self) -> DType {
        match self {
            Column::Bool(_) => DType::Bool,
            Column::I32(_) => DType::I32,
            Column::I64(_) => DType::I64,
            Column::U8(_) => DType::U8,
            Column::U16(_) => DType::U16,
            Column::U32(_) => DType::U32,
            Column::U64(_) => DType::U64,
            Column::F32(_) => DType::F32,
            Column::F64(_) => DType::F64,
            Column::Str(_) => DType::Str,
            Column::ListBool(_) => DType::ListBool,
            Column::ListI32(_) => DType::ListI32,
            Column::ListI64(_) => DType::ListI64,
            Column::ListU32(_) => DType::ListU32,
            Column::ListF32(_) => DType::ListF32,
            Column::ListF64(_) => DType::ListF64,
            Column::ListStr(_) => DType::ListStr,
        }
    }

    /// Keep the rows where `mask` is true, preserving order.
    pub fn filter(&self, mask: &[bool]) -> Result<Column> {
        if mask.len() != self.len() {
            return Err(Error::Column(format!(
                "filter mask has {} rows, column has {}",
                mask.len(),
                self.len()
            )));
        }
        Ok(each_variant!(self, v => compact(v, mask)))
    }

    /// Gather rows by index.
    pub fn take(&self, indices: &[usize]) -> Result<Column> {
        let n = self.len();
        if let Some(bad) = indices.iter().find(|&&i| i >= n) {
            return Err(Error::Column(format!("row index {bad} out of range for {n} rows")));
        }
        Ok(each_variant!(self, v => indices.iter().map(|&i| v[i].clone()).collect()))
    }

    /// Concatenate columns of the same type.
    pub fn concat(parts: &[&Column]) -> Result<Column> {
        let Some(first) = parts.first() else {
            return Err(Error::Column("cannot concatenate zero columns".into()));
        };
        let dtype = first.dtype();
        if let Some(other) = parts.iter().find(|c| c.dtype() != dtype) {
            return Err(Error::Column(format!(
                "cannot concatenate {:?} with {:?}",
                dtype,
                other.dtype()
            )));
        }
        let mut out = (*first).clone();
        for part in &parts[1..] {
            out.extend_from(part);
        }
        Ok(out)
    }

    fn extend_from(&mut self, other: &Column) {
        match (self, other) {
            (Column::Bool(a), Column::Bool(b)) => a.extend_from_slice(b),
            (Column::I32(a), Column::I32(b)) => a.extend_from_slice(b),
            (Column::I64(a), Column::I64(b)) => a.extend_from_slice(b),
            (Column::U8(a), Column::U8(b)) => a.extend_from_slice(b),
            (Column::U16(a), Column::U16(b)) => a.extend_from_slice(b),
            (Column::U32(a), Column::U32(b)) => a.extend_from_slice(b),
            (Column::U64(a), Column::U64(b)) => a.extend_from_slice(b),
            (Column::F32(a), Column::F32(b)) => a.extend_from_slice(b),
            (Column::F64(a), Column::F64(b)) => a.extend_from_slice(b),
            (Column::Str(a), Column::Str(b)) => a.extend_from_slice(b),
            (Column::ListBool(a), Column::ListBool(b)) => a.extend_from_slice(b),
            (Column::ListI32(a), Column::ListI32(b)) => a.extend_from_slice(b),
            (Column::ListI64(a), Column::ListI64(b)) => a.extend_from_slice(b),
            (Column::ListU32(a), Column::ListU32(b)) => a.extend_from_slice(b),
            (Column::ListF32(a), Column::ListF32(b)) => a.extend_from_slice(b),
            (Column::ListF64(a), Column::ListF64(b)) => a.extend_from_slice(b),
            (Column::ListStr(a), Column::ListStr(b)) => a.extend_from_slice(b),
            // dtype equality is checked by `concat`
            _ => {}
        }
    }

    /// Scalar numeric view as `f64` (booleans map to 0/1).
    pub fn to_f64(&self) -> Result<Vec<f64>> {
        Ok(match self {
            Column::Bool(v) => v.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect(),
            Column::I32(v) => v.iter().map(|&x| x as f64).collect(),
            Column::I64(v) => v.iter().map(|&x| x as f64).collect(),
            Column::U8(v) => v.iter().map(|&x| x as f64).collect(),
            Column::U16(v) => v.iter().map(|&x| x as f64).collect(),
            Column::U32(v) => v.iter().map(|&x| x as f64).collect(),
            Column::U64(v) => v.iter().map(|&x| x as f64).collect(),
            Column::F32(v) => v.iter().map(|&x| x as f64).collect(),
            Column::F64(v) => v.clone(),
            other => return Err(self.not_scalar(other.dtype())),
        })
    }

    /// Scalar integer view as `i64` (floats truncate toward zero).
    pub fn to_i64(&self) -> Result<Vec<i64>> {
        Ok(match self {
            Column::Bool(v) => v.iter().map(|&b| b as i64).collect(),
            Column::I32(v) => v.iter().map(|&x| x as i64).collect(),
            Column::I64(v) => v.clone(),
            Column::U8(v) => v.iter().map(|&x| x as i64).collect(),
            Column::U16(v) => v.iter().map(|&x| x as i64).collect(),
            Column::U32(v) => v.iter().map(|&x| x as i64).collect(),
            Column::U64(v) => v.iter().map(|&x| x as i64).collect(),
            Column::F32(v) => v.iter().map(|&x| x as i64).collect(),
            Column::F64(v) => v.iter().map(|&x| x as i64).collect(),
            other => return Err(self.not_scalar(other.dtype())),
        })
    }

    /// Scalar integer view as `u64` (negative values wrap as in a C cast).
    pub fn to_u64(&self) -> Result<Vec<u64>> {
        Ok(match self {
            Column::U64(v) => v.clone(),
            Column::U32(v) => v.iter().map(|&x| x as u64).collect(),
            Column::U16(v) => v.iter().map(|&x| x as u64).collect(),
            Column::U8(v) => v.iter().map(|&x| x as u64).collect(),
            Column::I32(v) => v.iter().map(|&x| x as u64).collect(),
            Column::I64(v) => v.iter().map(|&x| x as u64).collect(),
            Column::Bool(v) => v.iter().map(|&b| b as u64).collect(),
            Column::F32(v) => v.iter().map(|&x| x as u64).collect(),
            Column::F64(v) => v.iter().map(|&x| x as u64).collect(),
            other => return Err(self.not_scalar(other.dtype())),
        })
    }

    /// Boolean view: numeric values are true when non-zero.
    pub fn to_bool(&self) -> Result<Vec<bool>> {
        match self {
            Column::Bool(v) => Ok(v.clone()),
            _ => Ok(self.to_f64()?.into_iter().map(|x| x != 0.0).collect()),
        }
    }

    /// Numeric list view as `f64` sequences.
    pub fn to_f64_lists(&self) -> Result<Vec<Vec<f64>>> {
        fn widen<T: Copy + Into<f64>>(rows: &[Vec<T>]) -> Vec<Vec<f64>> {
            rows.iter().map(|r| r.iter().map(|&x| x.into()).collect()).collect()
        }
        Ok(match self {
            Column::ListF64(v) => v.clone(),
            Column::ListF32(v) => widen(v),
            Column::ListI32(v) => widen(v),
            Column::ListU32(v) => widen(v),
            Column::ListI64(v) => v.iter().map(|r| r.iter().map(|&x| x as f64).collect()).collect(),
            Column::ListBool(v) => {
                v.iter().map(|r| r.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect()).collect()
            }
            other => {
                return Err(Error::Column(format!(
                    "expected a numeric list column, found {:?}",
                    other.dtype()
                )));
            }
        })
    }

    /// Borrow a string column.
    pub fn as_strs(&self) -> Result<&[String]> {
        match self {
            Column::Str(v) => Ok(v),
            other => Err(Error::Column(format!("expected a string column, found {:?}", other.dtype()))),
        }
    }

    /// Borrow a string-list column.
    pub fn as_str_lists(&self) -> Result<&[Vec<String>]> {
        match self {
            Column::ListStr(v) => Ok(v),
            other => Err(Error::Column(format!(
                "expected a string list column, found {:?}",
                other.dtype()
            ))),
        }
    }

    /// Build a constant column of `n` rows with the same type as `self`'s first value.
    ///
    /// Used to broadcast single-row results; an empty input yields an empty column.
    pub fn repeat_first(&self, n: usize) -> Column {
        if self.is_empty() {
            return each_variant!(self, v => v.clone());
        }
        each_variant!(self, v => vec![v[0].clone(); n])
    }

    fn not_scalar(&self, dtype: DType) -> Error {
        Error::Column(format!("expected a scalar numeric column, found {dtype:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_preserves_order() {
        let c = Column::I32(vec![1, 2, 3, 4]);
        let f = c.filter(&[true, false, true, true]).unwrap();
        assert_eq!(f, Column::I32(vec![1, 3, 4]));
        assert!(c.filter(&[true]).is_err());
    }

    #[test]
    fn concat_checks_types() {
        let a = Column::F64(vec![1.0]);
        let b = Column::F64(vec![2.0, 3.0]);
        assert_eq!(Column::concat(&[&a, &b]).unwrap(), Column::F64(vec![1.0, 2.0, 3.0]));
        let c = Column::F32(vec![1.0]);
        assert!(Column::concat(&[&a, &c]).is_err());
    }

    #[test]
    fn numeric_views() {
        let c = Column::U16(vec![0, 5]);
        assert_eq!(c.to_f64().unwrap(), vec![0.0, 5.0]);
        assert_eq!(c.to_bool().unwrap(), vec![false, true]);
        assert!(Column::Str(vec!["x".into()]).to_f64().is_err());
        let l = Column::ListI32(vec![vec![1, 2], vec![]]);
        assert_eq!(l.to_f64_lists().unwrap(), vec![vec![1.0, 2.0], vec![]]);
        assert!(l.dtype().is_list());
    }

    #[test]
    fn take_and_repeat() {
        let c = Column::Str(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(c.take(&[2, 0]).unwrap(), Column::Str(vec!["c".into(), "a".into()]));
        assert!(c.take(&[3]).is_err());
        assert_eq!(Column::U64(vec![7]).repeat_first(3), Column::U64(vec![7, 7, 7]));
    }
}
