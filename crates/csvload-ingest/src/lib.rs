//! csvload Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Chunked, bounded-memory loading of delimited text files, optionally
//! gzip-compressed.
//!
//! # Pipeline
//!
//! - **[`source`]**: fixed-size byte chunks, decompressing `.gz` on the fly
//! - **[`boundary`]**: safe split points so no record straddles a chunk
//! - **[`feeder`]**: carry buffer, record parser and per-record consumer
//! - **[`heuristic`]**: whole-file or streaming, by file size
//! - **[`controller`]**: preview, background full load, progress and cancellation
//!
//! Small files are parsed in one pass by [`loader::read_table`]; large ones go
//! through an [`IngestionController`].
//!
//! # Example
//!
//! ```no_run
//! use csvload_ingest::{load_file, LoadPlan, LoaderConfig, MemoryTable};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let config = LoaderConfig::from_env()?;
//!     let mut model = MemoryTable::new();
//!
//!     if let LoadPlan::Streaming(mut controller) = load_file("big.csv.gz", &mut model, &config)? {
//!         let preview = controller.load_preview()?;
//!         println!("{} preview rows", preview.row_count());
//!         controller.start_full_load()?;
//!         controller.run(&mut model, &mut ()).await;
//!     }
//!     println!("{} rows loaded", model.rows().len());
//!     Ok(())
//! }
//! ```

pub mod boundary;
pub mod config;
pub mod controller;
pub mod export;
pub mod feeder;
pub mod heuristic;
pub mod interchange;
pub mod loader;
pub mod parser;
pub mod progress;
pub mod source;
pub mod table;
pub mod ui;

pub use config::{BoundaryPolicy, CsvConfig, Encoding, LoaderConfig};
pub use controller::{CancelHandle, IngestObserver, IngestionController, LoadState, WorkerEvent};
pub use feeder::{FeedOutcome, RecordConsumer, StreamingRecordFeeder};
pub use loader::{load_file, read_preview, read_table, LoadPlan};
pub use parser::{CsvRecordParser, Record, RecordParser};
pub use progress::ProgressEvent;
pub use table::{MemoryTable, ParsedTable, TableBuilder, TableModel};
