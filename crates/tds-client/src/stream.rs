//! Streaming row access.
//!
//! [`RowStream`] yields rows as their tokens are decoded instead of
//! collecting the whole response first. Memory use stays bounded by one
//! packet plus one row.

use std::sync::Arc;

use tds_codec::Transport;

use crate::error::Result;
use crate::row::{Column, Row};
use crate::session::{Event, Session};

/// Iterator over the rows of a running batch.
///
/// Yields `Err` at most once; the stream is finished afterwards. Dropping
/// the stream before the end drains the rest of the response so the
/// connection is ready for the next batch.
///
/// ```rust,ignore
/// for row in conn.query("SELECT id FROM big_table")? {
///     let id: Option<i64> = row?.try_get(0)?;
/// }
/// ```
pub struct RowStream<'a, T: Transport> {
    session: &'a mut Session<T>,
    columns: Option<Arc<[Column]>>,
    result_sets: usize,
    rows_affected: Vec<u64>,
    finished: bool,
}

impl<'a, T: Transport> RowStream<'a, T> {
    pub(crate) fn new(session: &'a mut Session<T>) -> Self {
        Self {
            session,
            columns: None,
            result_sets: 0,
            rows_affected: Vec::new(),
            finished: false,
        }
    }

    /// Columns of the result set currently being read.
    #[must_use]
    pub fn columns(&self) -> Option<&[Column]> {
        self.columns.as_deref()
    }

    /// Number of result sets started so far.
    #[must_use]
    pub fn result_sets(&self) -> usize {
        self.result_sets
    }

    /// Affected-row counts reported so far.
    #[must_use]
    pub fn rows_affected(&self) -> &[u64] {
        &self.rows_affected
    }

    /// Check whether the response has been fully read.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Read and discard the rest of the response.
    pub fn drain(&mut self) -> Result<()> {
        for row in self.by_ref() {
            row?;
        }
        Ok(())
    }
}

impl<T: Transport> Iterator for RowStream<'_, T> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            match self.session.next_event() {
                Ok(Some(Event::Row(row))) => return Some(Ok(row)),
                Ok(Some(Event::ResultSet(columns))) => {
                    self.result_sets += 1;
                    self.columns = Some(columns);
                }
                Ok(Some(Event::Done(done))) => {
                    if done.has_count() {
                        self.rows_affected.push(done.row_count);
                    }
                }
                Ok(Some(Event::ReturnStatus(_))) => {}
                Ok(None) => {
                    self.finished = true;
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl<T: Transport> Drop for RowStream<'_, T> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.drain() {
                tracing::debug!(error = %e, "error draining abandoned row stream");
            }
        }
    }
}

impl<T: Transport> std::fmt::Debug for RowStream<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream")
            .field("result_sets", &self.result_sets)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
