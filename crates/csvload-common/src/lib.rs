//! csvload Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the csvload workspace.
//!
//! - **Error Handling**: [`LoadError`] and the [`Result`] alias used by every
//!   ingestion stage
//! - **Logging**: [`logging::init_logging`] and its [`logging::LogConfig`]
//!
//! # Example
//!
//! ```no_run
//! use csvload_common::{LoadError, Result};
//!
//! fn require_chunk_size(size: usize) -> Result<usize> {
//!     if size == 0 {
//!         return Err(LoadError::InvalidChunkSize(size));
//!     }
//!     Ok(size)
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{ErrorKind, LoadError, Result};
