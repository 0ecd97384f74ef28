//! Result streaming.
//!
//! The protocol engine owns the [`ResultState`] of the statement in flight.
//! Notices are folded into it wherever they arrive: before the column
//! metadata, between rows or after the last fetch-done marker. Closing the
//! result turns it into a [`ResultSummary`].

use std::ops::DerefMut;
use std::sync::Arc;

use mycat_protocol::classic::ServerStatus;
use mycat_protocol::notice::Warning;

use crate::error::{Error, Result};
use crate::row::{Column, ColumnUsage, Row};
use crate::session::Session;

/// Book-keeping for the result currently being read.
#[derive(Debug)]
pub struct ResultState {
    pub(crate) columns: Arc<[Column]>,
    pub(crate) usage: Arc<ColumnUsage>,
    pub(crate) warnings: Vec<Warning>,
    pub(crate) affected_rows: u64,
    pub(crate) last_insert_id: Option<u64>,
    pub(crate) document_ids: Vec<String>,
    pub(crate) message: Option<String>,
    pub(crate) has_more_results: bool,
    pub(crate) has_data: bool,
    pub(crate) rows_read: u64,
    pub(crate) rows_skipped: u64,
    pub(crate) closed: bool,
}

impl ResultState {
    pub(crate) fn new() -> Self {
        Self {
            columns: Arc::from(Vec::new()),
            usage: Arc::new(ColumnUsage::default()),
            warnings: Vec::new(),
            affected_rows: 0,
            last_insert_id: None,
            document_ids: Vec::new(),
            message: None,
            has_more_results: false,
            has_data: false,
            rows_read: 0,
            rows_skipped: 0,
            closed: false,
        }
    }

    pub(crate) fn set_columns(&mut self, columns: Vec<Column>) {
        self.has_data = !columns.is_empty();
        self.usage = Arc::new(ColumnUsage::new(columns.len()));
        self.columns = columns.into();
    }

    /// Column metadata.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Warnings recorded so far.
    #[must_use]
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Whether a terminal marker has been seen.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn into_summary(self, status: ServerStatus) -> ResultSummary {
        let unread_columns = if self.rows_read > 0 {
            self.usage
                .unread()
                .into_iter()
                .filter_map(|i| self.columns.get(i).map(|c| c.name.clone()))
                .collect()
        } else {
            Vec::new()
        };
        ResultSummary {
            columns: self.columns.to_vec(),
            warnings: self.warnings,
            affected_rows: self.affected_rows,
            last_insert_id: self.last_insert_id,
            document_ids: self.document_ids,
            message: self.message,
            has_more_results: self.has_more_results,
            has_data: self.has_data,
            rows_read: self.rows_read,
            rows_skipped: self.rows_skipped,
            unread_columns,
            status,
        }
    }
}

/// Everything a closed result reported.
#[derive(Debug, Clone, Default)]
pub struct ResultSummary {
    /// Column metadata.
    pub columns: Vec<Column>,
    /// Warnings, including informational messages (code 0).
    pub warnings: Vec<Warning>,
    /// Rows affected by the statement.
    pub affected_rows: u64,
    /// Generated auto-increment id.
    pub last_insert_id: Option<u64>,
    /// Generated document ids.
    pub document_ids: Vec<String>,
    /// Text of the terminal OK, if any.
    pub message: Option<String>,
    /// Another result set follows.
    pub has_more_results: bool,
    /// The statement produced a result set.
    pub has_data: bool,
    /// Rows handed to the caller.
    pub rows_read: u64,
    /// Rows discarded when the result was closed early.
    pub rows_skipped: u64,
    /// Columns never read from any row.
    pub unread_columns: Vec<String>,
    /// Session status flags when the result closed.
    pub status: ServerStatus,
}

type SessionHandle<'a> = Box<dyn DerefMut<Target = Session> + Send + 'a>;

/// Row-by-row reader over the result of one statement.
///
/// Holds the session exclusively. Dropping the stream early leaves the
/// remaining rows on the wire; the session drains them before its next
/// command.
pub struct ResultStream<'a> {
    session: SessionHandle<'a>,
    finished: bool,
}

impl<'a> ResultStream<'a> {
    pub(crate) fn new(session: SessionHandle<'a>) -> Self {
        Self {
            session,
            finished: false,
        }
    }

    /// Column metadata of the current result set.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        self.session
            .protocol()
            .result()
            .map(ResultState::columns)
            .unwrap_or_default()
    }

    /// Warnings recorded so far.
    #[must_use]
    pub fn warnings(&self) -> &[Warning] {
        self.session
            .protocol()
            .result()
            .map(ResultState::warnings)
            .unwrap_or_default()
    }

    /// Read the next row, `None` once the result set is exhausted.
    pub async fn next_row(&mut self) -> Result<Option<Row>> {
        if self.finished {
            return Err(Error::InvalidState("result has already been closed".into()));
        }
        match self.session.next_row().await {
            Ok(Some(row)) => Ok(Some(row)),
            Ok(None) => Ok(None),
            Err(e) => {
                self.session.hooks().on_fetch_error(self.session.driver_id(), &e);
                Err(e)
            }
        }
    }

    /// Move to the next result set. Unread rows of the current one are
    /// skipped. Returns `false` when there is none.
    pub async fn next_result(&mut self) -> Result<bool> {
        if self.finished {
            return Err(Error::InvalidState("result has already been closed".into()));
        }
        self.session.next_result().await
    }

    /// Read every remaining row of the current result set.
    pub async fn collect_rows(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Skip whatever is left and return the summary of the last result set.
    pub async fn close(&mut self) -> Result<ResultSummary> {
        if self.finished {
            return Err(Error::InvalidState("result has already been closed".into()));
        }
        self.finished = true;
        self.session.finish_result().await
    }
}

impl std::fmt::Debug for ResultStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStream")
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
