//! Streaming-or-whole-file decision

use std::path::Path;
use tracing::{debug, warn};

/// Whether a file of `len` bytes takes the streaming path
pub fn should_stream_len(len: u64, threshold: u64) -> bool {
    len >= threshold
}

/// Whether the file at `path` takes the streaming path
///
/// A file whose size cannot be read falls back to the whole-file path; the
/// open that follows reports the real problem.
pub fn should_stream(path: &Path, threshold: u64) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => {
            let stream = should_stream_len(meta.len(), threshold);
            debug!(
                path = %path.display(),
                size = meta.len(),
                threshold,
                stream,
                "Sized input file"
            );
            stream
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot stat file, using whole-file path");
            false
        },
    }
}
