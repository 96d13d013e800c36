//! Terminal helpers for the `csvload` binary

use crate::controller::IngestObserver;
use crate::progress::ProgressEvent;
use crate::table::ParsedTable;
use csvload_common::LoadError;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner counting loaded rows
pub fn create_row_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg} {human_pos} rows")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// [`IngestObserver`] that drives a progress bar
pub struct SpinnerObserver {
    bar: ProgressBar,
    error: Option<String>,
    cancelled: bool,
}

impl SpinnerObserver {
    pub fn new(bar: ProgressBar) -> Self {
        Self {
            bar,
            error: None,
            cancelled: false,
        }
    }

    /// Message of the error that ended the session, if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

impl IngestObserver for SpinnerObserver {
    fn on_progress(&mut self, event: ProgressEvent) {
        self.bar.set_position(event.rows_loaded as u64);
        if event.is_complete {
            self.bar.finish_with_message("loaded");
        }
    }

    fn on_error(&mut self, error: &LoadError) {
        self.bar.abandon_with_message("failed");
        self.error = Some(error.to_string());
    }

    fn on_cancelled(&mut self) {
        self.bar.abandon_with_message("cancelled");
        self.cancelled = true;
    }
}

/// Headers and up to `limit` rows, one line each, cells separated by ` | `
pub fn render_table(table: &ParsedTable, limit: usize) -> String {
    let mut out = table.headers.join(" | ");
    out.push('\n');
    for row in table.rows.iter().take(limit) {
        out.push_str(&row.join(" | "));
        out.push('\n');
    }
    if table.row_count() > limit {
        out.push_str(&format!("... {} more rows\n", table.row_count() - limit));
    }
    out
}

/// Human-readable byte count using binary units
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
