//! Loader configuration
//!
//! Defaults live in `DEFAULT_*` constants; [`LoaderConfig::from_env`] overlays
//! `CSVLOAD_*` variables and [`LoaderConfig::from_file`] reads a JSON document.
//! Both finish with [`LoaderConfig::validate`].

use csvload_common::{LoadError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

// ============================================================================
// Loader Configuration Constants
// ============================================================================

const MIB: usize = 1024 * 1024;

/// Files at or above this size take the streaming path (10 MiB).
pub const DEFAULT_LARGE_FILE_THRESHOLD: u64 = 10 * 1024 * 1024;

/// Rows shown in the preview table.
pub const DEFAULT_PREVIEW_ROWS: usize = 100;

/// Rows between two throttled progress events.
pub const DEFAULT_PROGRESS_INTERVAL: usize = 1000;

/// Bytes requested from the source per read.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * MIB;

/// Upper bound on the carry buffer before a record is declared too large.
pub const DEFAULT_MAX_CARRY: usize = 256 * MIB;

/// Upper bound on a single field under strict parsing.
pub const DEFAULT_MAX_FIELD_SIZE: usize = MIB;

/// File name suffix that selects gzip decompression.
pub const DEFAULT_GZIP_SUFFIX: &str = ".gz";

/// How chunk split points are chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryPolicy {
    /// Split after the last `\n` or `\r` regardless of quoting
    LastTerminator,
    /// Only split on terminators outside quoted fields
    #[default]
    QuoteAware,
}

impl FromStr for BoundaryPolicy {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "last_terminator" | "legacy" => Ok(BoundaryPolicy::LastTerminator),
            "quote_aware" => Ok(BoundaryPolicy::QuoteAware),
            _ => Err(LoadError::config(format!("unknown boundary policy: {}", s))),
        }
    }
}

/// Character encoding of the input bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Utf8,
    /// ISO-8859-1, every byte maps to the code point of the same value
    Latin1,
}

impl FromStr for Encoding {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "utf8" => Ok(Encoding::Utf8),
            "latin1" | "iso88591" => Ok(Encoding::Latin1),
            _ => Err(LoadError::config(format!("unsupported encoding: {}", s))),
        }
    }
}

/// Record parser settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvConfig {
    pub delimiter: u8,
    pub quote: u8,
    /// Equal to `quote` means quotes are escaped by doubling them
    pub escape: u8,
    pub trim_whitespace: bool,
    /// Strip a leading UTF-8 byte order mark
    pub detect_bom: bool,
    pub encoding: Encoding,
    /// Drop records whose fields are all blank
    pub skip_blank_lines: bool,
    /// Fields equal to this marker are read as empty
    pub null_value: Option<String>,
    /// Fail on ragged rows, invalid UTF-8 and oversized fields
    pub strict: bool,
    pub max_field_size: usize,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            escape: b'"',
            trim_whitespace: false,
            detect_bom: true,
            encoding: Encoding::Utf8,
            skip_blank_lines: false,
            null_value: None,
            strict: false,
            max_field_size: DEFAULT_MAX_FIELD_SIZE,
        }
    }
}

impl CsvConfig {
    /// Whether quotes inside quoted fields are escaped by doubling
    pub fn doubled_quotes(&self) -> bool {
        self.escape == self.quote
    }
}

/// Everything the ingestion core reads from settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub large_file_threshold_bytes: u64,
    pub preview_rows: usize,
    pub progress_interval_rows: usize,
    pub chunk_size_bytes: usize,
    pub max_carry_bytes: usize,
    pub gzip_suffix: String,
    pub boundary: BoundaryPolicy,
    pub csv: CsvConfig,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            large_file_threshold_bytes: DEFAULT_LARGE_FILE_THRESHOLD,
            preview_rows: DEFAULT_PREVIEW_ROWS,
            progress_interval_rows: DEFAULT_PROGRESS_INTERVAL,
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
            max_carry_bytes: DEFAULT_MAX_CARRY,
            gzip_suffix: DEFAULT_GZIP_SUFFIX.to_string(),
            boundary: BoundaryPolicy::default(),
            csv: CsvConfig::default(),
        }
    }
}

impl LoaderConfig {
    /// Defaults overlaid with `CSVLOAD_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::default().merge_env()
    }

    /// Overlay `CSVLOAD_*` environment variables on `self`
    pub fn merge_env(mut self) -> Result<Self> {
        if let Some(v) = env_parse("CSVLOAD_LARGE_FILE_THRESHOLD")? {
            self.large_file_threshold_bytes = v;
        }
        if let Some(v) = env_parse("CSVLOAD_PREVIEW_ROWS")? {
            self.preview_rows = v;
        }
        if let Some(v) = env_parse("CSVLOAD_PROGRESS_INTERVAL")? {
            self.progress_interval_rows = v;
        }
        if let Some(v) = env_parse("CSVLOAD_CHUNK_SIZE")? {
            self.chunk_size_bytes = v;
        }
        if let Some(v) = env_parse("CSVLOAD_MAX_CARRY")? {
            self.max_carry_bytes = v;
        }
        if let Some(v) = env_parse("CSVLOAD_STRICT")? {
            self.csv.strict = v;
        }
        if let Some(v) = env_parse("CSVLOAD_BOUNDARY")? {
            self.boundary = v;
        }
        if let Some(v) = env_parse("CSVLOAD_ENCODING")? {
            self.csv.encoding = v;
        }
        if let Ok(delimiter) = std::env::var("CSVLOAD_DELIMITER") {
            self.csv.delimiter = parse_delimiter(&delimiter)?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Read a JSON configuration file; missing keys keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|e| LoadError::from_open(path, e))?;
        let config: LoaderConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size_bytes == 0 {
            return Err(LoadError::InvalidChunkSize(0));
        }
        if self.preview_rows == 0 {
            return Err(LoadError::config("preview_rows must be at least 1"));
        }
        if self.progress_interval_rows == 0 {
            return Err(LoadError::config("progress_interval_rows must be at least 1"));
        }
        if self.max_carry_bytes < self.chunk_size_bytes {
            return Err(LoadError::config(format!(
                "max_carry_bytes ({}) must not be smaller than chunk_size_bytes ({})",
                self.max_carry_bytes, self.chunk_size_bytes
            )));
        }
        if self.csv.delimiter == self.csv.quote {
            return Err(LoadError::config("delimiter and quote must differ"));
        }
        if matches!(self.csv.delimiter, b'\n' | b'\r') {
            return Err(LoadError::config("delimiter cannot be a line terminator"));
        }
        Ok(())
    }

    /// Smaller chunk size for reading only the first `preview_rows` rows
    pub fn preview_chunk_size(&self) -> usize {
        self.preview_rows
            .saturating_add(1)
            .saturating_mul(100)
            .min(self.chunk_size_bytes)
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| LoadError::config(format!("{}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

/// Accepts a single byte or the names `tab`, `comma`, `semicolon`, `pipe`
pub fn parse_delimiter(raw: &str) -> Result<u8> {
    match raw {
        "tab" | "\\t" => Ok(b'\t'),
        "comma" => Ok(b','),
        "semicolon" => Ok(b';'),
        "pipe" => Ok(b'|'),
        s if s.len() == 1 => Ok(s.as_bytes()[0]),
        s => Err(LoadError::config(format!(
            "delimiter must be a single byte, got {:?}",
            s
        ))),
    }
}
