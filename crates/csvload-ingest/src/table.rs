//! Parsed tables and the destination model they are handed to

use crate::feeder::RecordConsumer;
use crate::parser::Record;
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;

/// Headers plus data rows; rows may be ragged until [`normalize`](Self::normalize)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParsedTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ParsedTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Widest of the header row and every data row
    pub fn column_count(&self) -> usize {
        self.rows
            .iter()
            .map(Vec::len)
            .fold(self.headers.len(), usize::max)
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.rows.is_empty()
    }

    /// Pad every row with empty cells and name missing headers `Column N`
    pub fn normalize(&mut self) {
        let width = self.column_count();
        for index in self.headers.len()..width {
            self.headers.push(format!("Column {}", index + 1));
        }
        for row in &mut self.rows {
            row.resize(width, String::new());
        }
    }
}

/// Builds a [`ParsedTable`] from a record stream
///
/// A record is blank when every field is the empty string; whitespace is data.
/// The first non-blank record becomes the header row. Blank records before it
/// are skipped. Blank records after it are held back and only kept once a
/// non-blank record follows, so trailing blank rows never reach the table.
#[derive(Debug, Default)]
pub struct TableBuilder {
    headers: Option<Vec<String>>,
    rows: Vec<Vec<String>>,
    held_blank: Vec<Vec<String>>,
    limit: Option<usize>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop accepting once `rows` data rows are collected
    pub fn with_row_limit(rows: usize) -> Self {
        Self {
            limit: Some(rows),
            ..Self::default()
        }
    }

    /// Data rows retained so far
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn has_headers(&self) -> bool {
        self.headers.is_some()
    }

    fn limit_reached(&self) -> bool {
        self.limit.is_some_and(|limit| self.rows.len() >= limit)
    }

    /// Finished table; held-back trailing blank rows are dropped
    pub fn finish(self) -> ParsedTable {
        ParsedTable {
            headers: self.headers.unwrap_or_default(),
            rows: self.rows,
        }
    }
}

impl RecordConsumer for TableBuilder {
    fn accept(&mut self, record: &Record) -> ControlFlow<()> {
        if self.limit_reached() {
            return ControlFlow::Break(());
        }

        let blank = record.is_all_empty();
        if self.headers.is_none() {
            if !blank {
                self.headers = Some(record.to_row());
            }
            return ControlFlow::Continue(());
        }

        if blank {
            self.held_blank.push(record.to_row());
            return ControlFlow::Continue(());
        }

        self.rows.append(&mut self.held_blank);
        self.rows.push(record.to_row());

        if let Some(limit) = self.limit {
            if self.rows.len() >= limit {
                self.rows.truncate(limit);
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }
}

/// Destination a finished table is handed to
///
/// Implementations are only ever touched from the caller's thread.
pub trait TableModel {
    fn clear(&mut self);
    fn set_headers(&mut self, headers: Vec<String>);
    fn set_data(&mut self, rows: Vec<Vec<String>>);
    /// Pad ragged rows to a common width
    fn normalize(&mut self);
    fn row_count(&self) -> usize;
    fn column_count(&self) -> usize;

    /// Replace the whole model content in one handoff
    fn replace_with(&mut self, table: ParsedTable) {
        self.clear();
        self.set_headers(table.headers);
        self.set_data(table.rows);
        self.normalize();
    }
}

/// In-memory [`TableModel`]
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    table: ParsedTable,
    revision: u64,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn headers(&self) -> &[String] {
        &self.table.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.table.rows
    }

    pub fn as_table(&self) -> &ParsedTable {
        &self.table
    }

    pub fn into_table(self) -> ParsedTable {
        self.table
    }

    /// Number of mutating calls seen so far
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

impl TableModel for MemoryTable {
    fn clear(&mut self) {
        self.table = ParsedTable::default();
        self.revision += 1;
    }

    fn set_headers(&mut self, headers: Vec<String>) {
        self.table.headers = headers;
        self.revision += 1;
    }

    fn set_data(&mut self, rows: Vec<Vec<String>>) {
        self.table.rows = rows;
        self.revision += 1;
    }

    fn normalize(&mut self) {
        self.table.normalize();
        self.revision += 1;
    }

    fn row_count(&self) -> usize {
        self.table.row_count()
    }

    fn column_count(&self) -> usize {
        self.table.column_count()
    }
}
