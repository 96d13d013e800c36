//! Chunked byte source
//!
//! [`ChunkSource`] hands out a file's bytes one buffer at a time, wrapping the
//! file in a [`GzDecoder`] when its name carries the gzip suffix. The handle is
//! owned by the source, so it is released when the source is dropped on any
//! exit path.

use crate::config::LoaderConfig;
use csvload_common::{LoadError, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Whether `path` names a gzip file, comparing `suffix` case-insensitively
pub fn is_gzip_path(path: &Path, suffix: &str) -> bool {
    if suffix.is_empty() {
        return false;
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    name.ends_with(&suffix.to_lowercase())
}

/// Sequential reader of fixed-size byte chunks
pub struct ChunkSource {
    reader: Box<dyn Read + Send>,
    label: PathBuf,
    compressed: bool,
    bytes_read: u64,
}

impl ChunkSource {
    /// Open `path`, decompressing if its name ends with the gzip suffix
    pub fn open(path: impl AsRef<Path>, config: &LoaderConfig) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| LoadError::from_open(path, e))?;
        let compressed = is_gzip_path(path, &config.gzip_suffix);

        let reader: Box<dyn Read + Send> = if compressed {
            Box::new(GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(file)
        };

        debug!(path = %path.display(), compressed, "Opened chunk source");

        Ok(Self {
            reader,
            label: path.to_path_buf(),
            compressed,
            bytes_read: 0,
        })
    }

    /// Wrap an arbitrary reader; `label` only appears in errors and logs
    pub fn from_reader(reader: impl Read + Send + 'static, label: impl Into<PathBuf>) -> Self {
        Self {
            reader: Box::new(reader),
            label: label.into(),
            compressed: false,
            bytes_read: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.label
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Decompressed bytes delivered so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Fill `buf` as far as the stream allows
    ///
    /// Returns the number of bytes written; `0` means end of stream. Only the
    /// last chunk of a stream is shorter than `buf`.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.map_read_error(e)),
            }
        }
        self.bytes_read += filled as u64;
        Ok(filled)
    }

    /// Drain the rest of the stream into memory
    pub fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.reader
            .read_to_end(&mut data)
            .map_err(|e| self.map_read_error(e))?;
        self.bytes_read += data.len() as u64;
        debug!(
            path = %self.label.display(),
            bytes = data.len(),
            "Read whole source"
        );
        Ok(data)
    }

    fn map_read_error(&self, err: io::Error) -> LoadError {
        // flate2 reports corrupt streams as InvalidInput/InvalidData
        if self.compressed
            && matches!(
                err.kind(),
                io::ErrorKind::InvalidInput
                    | io::ErrorKind::InvalidData
                    | io::ErrorKind::UnexpectedEof
            )
        {
            LoadError::Decompression {
                path: self.label.clone(),
                message: err.to_string(),
            }
        } else {
            LoadError::Io(err)
        }
    }
}

impl std::fmt::Debug for ChunkSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkSource")
            .field("path", &self.label)
            .field("compressed", &self.compressed)
            .field("bytes_read", &self.bytes_read)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{Cursor, Write};

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_is_gzip_path() {
        assert!(is_gzip_path(Path::new("data.csv.gz"), ".gz"));
        assert!(is_gzip_path(Path::new("/tmp/DATA.CSV.GZ"), ".gz"));
        assert!(!is_gzip_path(Path::new("data.csv"), ".gz"));
        assert!(!is_gzip_path(Path::new("gz"), ".gz"));
        assert!(!is_gzip_path(Path::new("data.csv.gz"), ""));
    }

    #[test]
    fn test_read_chunk_fills_buffer() {
        let mut source = ChunkSource::from_reader(Cursor::new(b"abcdefghij".to_vec()), "mem");
        let mut buf = [0u8; 4];

        assert_eq!(source.read_chunk(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(source.read_chunk(&mut buf).unwrap(), 4);
        assert_eq!(source.read_chunk(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ij");
        assert_eq!(source.read_chunk(&mut buf).unwrap(), 0);
        assert_eq!(source.bytes_read(), 10);
    }

    #[test]
    fn test_open_missing_file() {
        let err = ChunkSource::open("/no/such/file.csv", &LoaderConfig::default()).unwrap_err();
        assert!(matches!(err, LoadError::NotFound(_)));
    }

    #[test]
    fn test_open_gzip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv.gz");
        std::fs::write(&path, gzip(b"A,B\n1,2\n")).unwrap();

        let mut source = ChunkSource::open(&path, &LoaderConfig::default()).unwrap();
        assert!(source.is_compressed());
        assert_eq!(source.read_to_end().unwrap(), b"A,B\n1,2\n");
    }

    #[test]
    fn test_corrupt_gzip_is_decompression_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.csv.gz");
        std::fs::write(&path, b"this is not gzip at all").unwrap();

        let mut source = ChunkSource::open(&path, &LoaderConfig::default()).unwrap();
        let mut buf = vec![0u8; 64];
        let err = source.read_chunk(&mut buf).unwrap_err();
        assert!(matches!(err, LoadError::Decompression { .. }));
    }
}
