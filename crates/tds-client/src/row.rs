//! Column descriptors and materialized rows.
//!
//! Column descriptors are built once per result set and shared by every row
//! of that set through an `Arc<[Column]>`.

use std::str::FromStr;
use std::sync::Arc;

use tds_protocol::{ColumnData, TypeId};

use crate::error::{Error, Result};
use crate::value::Value;

/// Declared type of a column, coarsened to what callers usually branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// 8-bit unsigned integer.
    TinyInt,
    /// 16-bit integer.
    SmallInt,
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    BigInt,
    /// 32-bit float.
    Real,
    /// 64-bit float.
    Float,
    /// Any date/time type.
    DateTime,
    /// Single-byte or Unicode character data.
    Character,
    /// Binary data.
    Binary,
    /// Everything else (bit, money, decimal, guid).
    Other,
}

impl ColumnType {
    /// Classify a wire column.
    #[must_use]
    pub fn from_metadata(column: &ColumnData) -> Self {
        match column.type_id {
            TypeId::Int1 => Self::TinyInt,
            TypeId::Int2 => Self::SmallInt,
            TypeId::Int4 => Self::Int,
            TypeId::Int8 => Self::BigInt,
            TypeId::IntN => match column.type_info.max_length {
                Some(1) => Self::TinyInt,
                Some(2) => Self::SmallInt,
                Some(8) => Self::BigInt,
                _ => Self::Int,
            },
            TypeId::Float4 => Self::Real,
            TypeId::Float8 => Self::Float,
            TypeId::FloatN if column.type_info.max_length == Some(4) => Self::Real,
            TypeId::FloatN => Self::Float,
            TypeId::Xml => Self::Character,
            TypeId::Udt => Self::Binary,
            id if id.is_datetime() => Self::DateTime,
            id if id.is_character() || id.is_unicode() => Self::Character,
            id if id.is_binary() => Self::Binary,
            _ => Self::Other,
        }
    }
}

/// Column metadata describing a result set column.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Column {
    /// Column name, empty for unnamed expressions.
    pub name: String,
    /// Column index (0-based).
    pub index: usize,
    /// Declared type.
    pub column_type: ColumnType,
    /// Wire type id.
    pub type_id: TypeId,
    /// Whether the column allows NULL values.
    pub nullable: bool,
    /// Maximum length for variable-length types.
    pub max_length: Option<u32>,
    /// Precision for numeric types.
    pub precision: Option<u8>,
    /// Scale for numeric and time types.
    pub scale: Option<u8>,
}

impl Column {
    /// Build a descriptor from COLMETADATA.
    #[must_use]
    pub fn from_metadata(index: usize, column: &ColumnData) -> Self {
        Self {
            name: column.name.clone(),
            index,
            column_type: ColumnType::from_metadata(column),
            type_id: column.type_id,
            nullable: column.is_nullable(),
            max_length: column.type_info.max_length,
            precision: column.type_info.precision,
            scale: column.type_info.scale,
        }
    }
}

/// Something that selects a column: an index or a name.
pub trait ColumnIndex {
    /// Resolve to a position within `columns`.
    fn position(&self, columns: &[Column]) -> Option<usize>;

    /// Describe the selector for error messages.
    fn describe(&self) -> String;
}

impl ColumnIndex for usize {
    fn position(&self, columns: &[Column]) -> Option<usize> {
        (*self < columns.len()).then_some(*self)
    }

    fn describe(&self) -> String {
        format!("#{self}")
    }
}

impl ColumnIndex for &str {
    fn position(&self, columns: &[Column]) -> Option<usize> {
        columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(self))
    }

    fn describe(&self) -> String {
        format!("'{self}'")
    }
}

/// One result row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    columns: Arc<[Column]>,
    values: Vec<Value>,
}

impl Row {
    /// Create a row; the value count must match the column count.
    pub fn new(columns: Arc<[Column]>, values: Vec<Value>) -> Result<Self> {
        if values.len() != columns.len() {
            return Err(Error::SchemaMismatch {
                expected: columns.len(),
                actual: values.len(),
            });
        }
        Ok(Self { columns, values })
    }

    /// Get a cell by position.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a cell by column name (ASCII case-insensitive, first match).
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        name.position(&self.columns).and_then(|i| self.values.get(i))
    }

    /// Parse a cell into `T`.
    ///
    /// Returns `Ok(None)` for NULL.
    ///
    /// ```ignore
    /// let id: Option<i32> = row.try_get(0)?;
    /// let name: Option<String> = row.try_get("name")?;
    /// ```
    pub fn try_get<T, I>(&self, column: I) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
        I: ColumnIndex,
    {
        let index = column
            .position(&self.columns)
            .ok_or_else(|| Error::ColumnNotFound(column.describe()))?;

        match &self.values[index] {
            Value::Null => Ok(None),
            Value::Text(text) => text.parse().map(Some).map_err(|e: T::Err| Error::Conversion {
                column: column.describe(),
                message: e.to_string(),
            }),
        }
    }

    /// Parse a cell that must not be NULL.
    pub fn try_get_required<T, I>(&self, column: I) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
        I: ColumnIndex,
    {
        let describe = column.describe();
        self.try_get(column)?
            .ok_or_else(|| crate::from_row::unexpected_null(describe))
    }

    /// Check whether the cell at `index` is NULL. Out-of-range is `false`.
    #[must_use]
    pub fn is_null(&self, index: usize) -> bool {
        self.values.get(index).is_some_and(Value::is_null)
    }

    /// Number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check for a zero-column row.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column descriptors shared with the rest of the result set.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// All cells in column order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Take the cells.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Iterate over the cells.
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.values.iter()
    }
}

impl<'a> IntoIterator for &'a Row {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_protocol::{ColumnFlags, TypeInfo};

    fn columns() -> Arc<[Column]> {
        let meta = |name: &str, type_id, max_length| ColumnData {
            name: name.into(),
            type_id,
            user_type: 0,
            flags: ColumnFlags::NULLABLE,
            type_info: TypeInfo {
                max_length,
                ..Default::default()
            },
        };
        [
            meta("id", TypeId::IntN, Some(4)),
            meta("Name", TypeId::NVarChar, Some(100)),
            meta("", TypeId::FloatN, Some(4)),
        ]
        .iter()
        .enumerate()
        .map(|(i, c)| Column::from_metadata(i, c))
        .collect()
    }

    fn row() -> Row {
        Row::new(
            columns(),
            vec![Value::from("7"), Value::from("ann"), Value::Null],
        )
        .unwrap()
    }

    #[test]
    fn test_column_types() {
        let cols = columns();
        assert_eq!(cols[0].column_type, ColumnType::Int);
        assert_eq!(cols[1].column_type, ColumnType::Character);
        assert_eq!(cols[2].column_type, ColumnType::Real);
        assert!(cols[2].name.is_empty());
    }

    #[test]
    fn test_schema_mismatch() {
        let err = Row::new(columns(), vec![Value::Null]).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { expected: 3, actual: 1 }));
    }

    #[test]
    fn test_access_by_index_and_name() {
        let row = row();
        assert_eq!(row.get(0).and_then(Value::as_str), Some("7"));
        assert_eq!(row.get_by_name("name").and_then(Value::as_str), Some("ann"));
        assert!(row.get_by_name("missing").is_none());
        assert!(row.is_null(2));
        assert_eq!(row.iter().count(), 3);
    }

    #[test]
    fn test_try_get() {
        let row = row();
        assert_eq!(row.try_get::<i32, _>(0).unwrap(), Some(7));
        assert_eq!(row.try_get::<String, _>("NAME").unwrap(), Some("ann".into()));
        assert_eq!(row.try_get::<f32, _>(2).unwrap(), None);
        assert!(matches!(
            row.try_get::<i32, _>("name"),
            Err(Error::Conversion { .. })
        ));
        assert!(matches!(
            row.try_get::<i32, _>(9),
            Err(Error::ColumnNotFound(_))
        ));
    }
}
