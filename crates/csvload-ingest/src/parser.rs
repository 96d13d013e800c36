//! Record parser capability
//!
//! The feeder only ever hands a [`RecordParser`] byte buffers that end on a
//! record boundary. Parsers may keep state between buffers; the CSV parser
//! uses it to number records and to check row widths across chunks.

use crate::config::{CsvConfig, Encoding};
use csv::{ByteRecord, ReaderBuilder, Trim};
use csvload_common::{LoadError, Result};

/// Lazy, ordered sequence of records parsed from one buffer
pub type Records<'a> = Box<dyn Iterator<Item = Result<Record>> + 'a>;

/// Turns complete-record byte buffers into records
pub trait RecordParser: Send {
    /// Parse every record in `bytes`
    ///
    /// `bytes` never ends in the middle of a record. The first error ends the
    /// session; callers stop pulling from the iterator after it.
    fn parse<'a>(&'a mut self, bytes: &'a [u8]) -> Records<'a>;

    /// Drop cross-buffer state before reusing the parser on another input
    fn reset(&mut self) {}
}

/// One logical row
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    fields: Vec<String>,
}

impl Record {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }

    /// True when every field is empty after trimming
    pub fn is_blank(&self) -> bool {
        self.fields.iter().all(|f| f.trim().is_empty())
    }

    /// True when every field is the empty string; whitespace counts as content
    pub fn is_all_empty(&self) -> bool {
        self.fields.iter().all(String::is_empty)
    }

    pub fn to_row(&self) -> Vec<String> {
        self.fields.clone()
    }

    pub fn into_row(self) -> Vec<String> {
        self.fields
    }
}

impl From<Vec<String>> for Record {
    fn from(fields: Vec<String>) -> Self {
        Self::new(fields)
    }
}

impl<'a> FromIterator<&'a str> for Record {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(str::to_owned).collect())
    }
}

/// [`RecordParser`] backed by the `csv` crate
#[derive(Debug, Clone)]
pub struct CsvRecordParser {
    config: CsvConfig,
    expected_width: Option<usize>,
    records_parsed: u64,
}

impl CsvRecordParser {
    pub fn new(config: CsvConfig) -> Self {
        Self {
            config,
            expected_width: None,
            records_parsed: 0,
        }
    }

    pub fn config(&self) -> &CsvConfig {
        &self.config
    }

    /// Records produced since construction or the last reset
    pub fn records_parsed(&self) -> u64 {
        self.records_parsed
    }

    fn reader<'a>(&self, bytes: &'a [u8]) -> csv::Reader<&'a [u8]> {
        let mut builder = ReaderBuilder::new();
        builder
            .has_headers(false)
            .flexible(true)
            .delimiter(self.config.delimiter)
            .quote(self.config.quote)
            .trim(if self.config.trim_whitespace {
                Trim::All
            } else {
                Trim::None
            });

        if self.config.doubled_quotes() {
            builder.double_quote(true);
        } else {
            builder.double_quote(false).escape(Some(self.config.escape));
        }

        builder.from_reader(bytes)
    }

    fn convert(&mut self, item: csv::Result<ByteRecord>) -> Result<Option<Record>> {
        let raw = item.map_err(|e| LoadError::parse(e.to_string()))?;
        let number = self.records_parsed + 1;

        let mut fields = Vec::with_capacity(raw.len());
        for (column, bytes) in raw.iter().enumerate() {
            if self.config.strict && bytes.len() > self.config.max_field_size {
                return Err(LoadError::parse(format!(
                    "field {} of record {} is {} bytes, limit is {}",
                    column + 1,
                    number,
                    bytes.len(),
                    self.config.max_field_size
                )));
            }
            let text = self.decode(bytes, number)?;
            let is_null = self.config.null_value.as_deref() == Some(text.as_str());
            fields.push(if is_null { String::new() } else { text });
        }

        let record = Record::new(fields);
        if self.config.skip_blank_lines && record.is_blank() {
            return Ok(None);
        }

        if self.config.strict {
            match self.expected_width {
                Some(width) if width != record.len() => {
                    return Err(LoadError::parse(format!(
                        "record {} has {} fields, expected {}",
                        number,
                        record.len(),
                        width
                    )));
                },
                Some(_) => {},
                None => self.expected_width = Some(record.len()),
            }
        }

        self.records_parsed = number;
        Ok(Some(record))
    }

    fn decode(&self, bytes: &[u8], number: u64) -> Result<String> {
        match self.config.encoding {
            Encoding::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
            Encoding::Utf8 if self.config.strict => std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|e| LoadError::parse(format!("invalid UTF-8 in record {}: {}", number, e))),
            Encoding::Utf8 => Ok(String::from_utf8_lossy(bytes).into_owned()),
        }
    }
}

impl RecordParser for CsvRecordParser {
    fn parse<'a>(&'a mut self, bytes: &'a [u8]) -> Records<'a> {
        let reader = self.reader(bytes);
        Box::new(
            reader
                .into_byte_records()
                .filter_map(move |item| self.convert(item).transpose()),
        )
    }

    fn reset(&mut self) {
        self.expected_width = None;
        self.records_parsed = 0;
    }
}
