//! Forward-only result cursor.

use crate::models::{DataField, Row};
use std::collections::VecDeque;
use tracing::trace;

/// Materialised result of a row-returning statement.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub fields: Vec<DataField>,
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn new(fields: Vec<DataField>, rows: Vec<Row>) -> Self {
        Self { fields, rows }
    }

    /// First column of the first row, if any.
    pub fn scalar(&self) -> Option<&serde_json::Value> {
        self.rows.first().and_then(|row| row.values().next())
    }
}

/// Forward-only cursor over the rows of one query window.
///
/// The engine-side result is released as soon as the rows are fetched; the
/// reader only owns its buffer, which is dropped on [`close`](Self::close) or
/// when the reader goes out of scope. After `close` every `read` returns
/// `None`.
#[derive(Debug)]
pub struct DataReader {
    fields: Vec<DataField>,
    rows: VecDeque<Row>,
    count: usize,
    affected: Option<u64>,
    query: String,
    closed: bool,
}

impl DataReader {
    pub fn new(result: ResultSet, query: impl Into<String>) -> Self {
        Self {
            count: result.rows.len(),
            fields: result.fields,
            rows: result.rows.into(),
            affected: None,
            query: query.into(),
            closed: false,
        }
    }

    /// Attach the total row count obtained by the count query.
    pub fn with_affected(mut self, total: u64) -> Self {
        self.affected = Some(total);
        self
    }

    /// Next row, or `None` at the end or once closed.
    pub fn read(&mut self) -> Option<Row> {
        if self.closed {
            return None;
        }
        self.rows.pop_front()
    }

    /// Remaining rows, consuming them.
    pub fn read_all(&mut self) -> Vec<Row> {
        if self.closed {
            return Vec::new();
        }
        self.rows.drain(..).collect()
    }

    /// Iterate the remaining rows through [`read`](Self::read).
    pub fn rows(&mut self) -> impl Iterator<Item = Row> + '_ {
        std::iter::from_fn(move || self.read())
    }

    pub fn fields(&self) -> &[DataField] {
        &self.fields
    }

    /// Field metadata by column name.
    pub fn field(&self, name: &str) -> Option<&DataField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Release the buffer. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.rows = VecDeque::new();
        trace!(query = %self.query, "Reader closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether the window returned any rows.
    pub fn has_rows(&self) -> bool {
        self.count > 0
    }

    /// Rows in the current window.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Total rows reported by the count query, when one ran.
    pub fn affected(&self) -> Option<u64> {
        self.affected
    }

    /// Query text that produced this reader.
    pub fn query(&self) -> &str {
        &self.query
    }
}

impl Drop for DataReader {
    fn drop(&mut self) {
        if !self.closed && !self.rows.is_empty() {
            trace!(
                query = %self.query,
                unread = self.rows.len(),
                "Reader dropped with unread rows"
            );
        }
    }
}
