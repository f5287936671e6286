//! Result materialization.
//!
//! [`Materializer`] collects the events of one response into a
//! [`ResultBatch`]: every row of every result set in arrival order, the
//! column descriptors of each set, and the affected-row counts reported by
//! DONE tokens.

use std::ops::Range;
use std::sync::Arc;

use crate::diagnostics::Diagnostic;
use crate::error::{Error, Result};
use crate::from_row::FromRow;
use crate::row::{Column, Row};
use crate::session::Event;

/// Initial row capacity of a batch.
pub const INITIAL_ROW_CAPACITY: usize = 8;

/// One result set of a batch.
#[derive(Debug, Clone, Copy)]
pub struct ResultSet<'a> {
    columns: &'a Arc<[Column]>,
    rows: &'a [Row],
}

impl<'a> ResultSet<'a> {
    /// Column descriptors.
    #[must_use]
    pub fn columns(&self) -> &'a [Column] {
        self.columns
    }

    /// Rows of this set.
    #[must_use]
    pub fn rows(&self) -> &'a [Row] {
        self.rows
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check for a zero-row set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone)]
struct SetBounds {
    columns: Arc<[Column]>,
    rows: Range<usize>,
}

/// Everything one `execute` produced.
#[derive(Debug, Clone, Default)]
pub struct ResultBatch {
    rows: Vec<Row>,
    sets: Vec<SetBounds>,
    rows_affected: Vec<u64>,
    return_status: Option<i32>,
    messages: Vec<Diagnostic>,
}

impl ResultBatch {
    /// All rows, concatenated across result sets.
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Take the rows.
    #[must_use]
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// Map every row through [`FromRow`], stopping at the first failure.
    pub fn rows_as<T: FromRow>(&self) -> Result<Vec<T>> {
        self.rows.iter().map(T::from_row).collect()
    }

    /// Number of result sets, including empty ones.
    #[must_use]
    pub fn result_set_count(&self) -> usize {
        self.sets.len()
    }

    /// Get one result set.
    #[must_use]
    pub fn result_set(&self, index: usize) -> Option<ResultSet<'_>> {
        self.sets.get(index).map(|set| ResultSet {
            columns: &set.columns,
            rows: &self.rows[set.rows.clone()],
        })
    }

    /// Iterate over the result sets in arrival order.
    pub fn result_sets(&self) -> impl Iterator<Item = ResultSet<'_>> {
        (0..self.sets.len()).filter_map(|i| self.result_set(i))
    }

    /// Columns of the first result set.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        self.sets.first().map_or(&[][..], |set| &set.columns[..])
    }

    /// Affected-row counts, one per statement that reported one.
    #[must_use]
    pub fn rows_affected(&self) -> &[u64] {
        &self.rows_affected
    }

    /// Sum of the affected-row counts.
    #[must_use]
    pub fn total_rows_affected(&self) -> u64 {
        self.rows_affected.iter().sum()
    }

    /// Return status of the last procedure, if any.
    #[must_use]
    pub fn return_status(&self) -> Option<i32> {
        self.return_status
    }

    /// Informational messages received while executing.
    #[must_use]
    pub fn messages(&self) -> &[Diagnostic] {
        &self.messages
    }

    /// Check for a batch without rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Builds a [`ResultBatch`] from session events.
#[derive(Debug)]
pub(crate) struct Materializer {
    batch: ResultBatch,
}

impl Materializer {
    pub(crate) fn new() -> Self {
        Self {
            batch: ResultBatch {
                rows: Vec::with_capacity(INITIAL_ROW_CAPACITY),
                ..Default::default()
            },
        }
    }

    pub(crate) fn apply(&mut self, event: Event) -> Result<()> {
        match event {
            Event::ResultSet(columns) => {
                let start = self.batch.rows.len();
                self.batch.sets.push(SetBounds {
                    columns,
                    rows: start..start,
                });
            }
            Event::Row(row) => self.push_row(row)?,
            Event::Done(done) => {
                if done.has_count() {
                    self.batch.rows_affected.push(done.row_count);
                }
            }
            Event::ReturnStatus(status) => self.batch.return_status = Some(status),
        }
        Ok(())
    }

    fn push_row(&mut self, row: Row) -> Result<()> {
        let capacity = self.batch.rows.capacity();
        if self.batch.rows.len() == capacity {
            let additional = capacity.max(INITIAL_ROW_CAPACITY);
            if self.batch.rows.try_reserve_exact(additional).is_err() {
                self.batch = ResultBatch::default();
                return Err(Error::OutOfMemory);
            }
        }
        self.batch.rows.push(row);

        if let Some(set) = self.batch.sets.last_mut() {
            set.rows.end = self.batch.rows.len();
        }
        Ok(())
    }

    pub(crate) fn finish(mut self, messages: Vec<Diagnostic>) -> ResultBatch {
        self.batch.messages = messages;
        self.batch
    }
}
