//! Mapping rows onto user types.
//!
//! Implement [`FromRow`] by hand; cells are text, so each field is parsed
//! through [`Row::try_get`] or [`Row::try_get_required`].
//!
//! ```rust,ignore
//! use tds_client::{FromRow, Row, Result};
//!
//! struct User {
//!     id: i32,
//!     name: Option<String>,
//! }
//!
//! impl FromRow for User {
//!     fn from_row(row: &Row) -> Result<Self> {
//!         Ok(Self {
//!             id: row.try_get_required("id")?,
//!             name: row.try_get("name")?,
//!         })
//!     }
//! }
//!
//! let users: Vec<User> = conn.execute("SELECT id, name FROM users")?.rows_as()?;
//! ```

use std::marker::PhantomData;

use crate::error::{Error, Result};
use crate::row::Row;

/// A type that can be built from one result row.
pub trait FromRow: Sized {
    /// Build a value from `row`.
    ///
    /// # Errors
    ///
    /// A missing column, an unexpected NULL or a cell that does not parse.
    fn from_row(row: &Row) -> Result<Self>;
}

impl FromRow for Row {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(row.clone())
    }
}

/// Typed mapping for any iterator of fallible rows, such as a `RowStream`.
pub trait RowIteratorExt: Iterator<Item = Result<Row>> + Sized {
    /// Map each row through [`FromRow`].
    fn map_rows<T: FromRow>(self) -> MapRows<Self, T>;
}

impl<I: Iterator<Item = Result<Row>>> RowIteratorExt for I {
    fn map_rows<T: FromRow>(self) -> MapRows<Self, T> {
        MapRows {
            inner: self,
            _marker: PhantomData,
        }
    }
}

/// Iterator adapter returned by [`RowIteratorExt::map_rows`].
pub struct MapRows<I, T> {
    inner: I,
    _marker: PhantomData<T>,
}

impl<I, T> Iterator for MapRows<I, T>
where
    I: Iterator<Item = Result<Row>>,
    T: FromRow,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|result| result.and_then(|row| T::from_row(&row)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<I: std::fmt::Debug, T> std::fmt::Debug for MapRows<I, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapRows").field("inner", &self.inner).finish()
    }
}

/// Error for a NULL in a column the caller required.
pub(crate) fn unexpected_null(column: String) -> Error {
    Error::Conversion {
        column,
        message: "unexpected NULL".into(),
    }
}
