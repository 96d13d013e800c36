//! Writing tables back out as delimited text

use crate::config::{CsvConfig, Encoding, LoaderConfig};
use crate::source::is_gzip_path;
use crate::table::ParsedTable;
use csv::{ByteRecord, QuoteStyle, WriterBuilder};
use csvload_common::{LoadError, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Write `table` to `path`, gzip-compressed when the name has the gzip suffix
///
/// Rows shorter than the widest row are padded with empty cells and missing
/// headers are named `Column N`.
pub fn write_csv(
    path: impl AsRef<Path>,
    table: &ParsedTable,
    config: &LoaderConfig,
) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)?;
    let compressed = is_gzip_path(path, &config.gzip_suffix);

    if compressed {
        let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        let encoder = write_records(encoder, table, &config.csv)?;
        encoder.finish()?.flush()?;
    } else {
        write_records(BufWriter::new(file), table, &config.csv)?.flush()?;
    }

    info!(path = %path.display(), rows = table.row_count(), compressed, "Exported table");
    Ok(())
}

/// Write headers and rows to `out` and hand the writer back
pub fn write_records<W: Write>(out: W, table: &ParsedTable, csv: &CsvConfig) -> Result<W> {
    let mut builder = WriterBuilder::new();
    builder
        .delimiter(csv.delimiter)
        .quote(csv.quote)
        .quote_style(QuoteStyle::Necessary)
        .flexible(false);
    if csv.doubled_quotes() {
        builder.double_quote(true);
    } else {
        builder.double_quote(false).escape(csv.escape);
    }

    let mut writer = builder.from_writer(out);
    let width = table.column_count();
    if width > 0 {
        let mut record = ByteRecord::with_capacity(0, width);
        for i in 0..width {
            let header = match table.headers.get(i) {
                Some(h) => Cow::Borrowed(h.as_str()),
                None => Cow::Owned(format!("Column {}", i + 1)),
            };
            record.push_field(&encode_cell(&header, csv.encoding, 0)?);
        }
        writer.write_byte_record(&record).map_err(csv_error)?;

        for (index, row) in table.rows.iter().enumerate() {
            record.clear();
            for cell in row {
                record.push_field(&encode_cell(cell, csv.encoding, index + 1)?);
            }
            for _ in row.len()..width {
                record.push_field(b"");
            }
            writer.write_byte_record(&record).map_err(csv_error)?;
        }
    }

    writer.into_inner().map_err(|e| LoadError::Io(e.into_error()))
}

/// Bytes of `cell` in the output encoding; `line` is 0 for the header row
fn encode_cell(cell: &str, encoding: Encoding, line: usize) -> Result<Cow<'_, [u8]>> {
    match encoding {
        Encoding::Utf8 => Ok(Cow::Borrowed(cell.as_bytes())),
        Encoding::Latin1 if cell.is_ascii() => Ok(Cow::Borrowed(cell.as_bytes())),
        Encoding::Latin1 => cell
            .chars()
            .map(|c| {
                u8::try_from(u32::from(c)).map_err(|_| {
                    LoadError::config(format!(
                        "character {:?} in row {} cannot be written as Latin-1",
                        c, line
                    ))
                })
            })
            .collect::<Result<Vec<u8>>>()
            .map(Cow::Owned),
    }
}

fn csv_error(err: csv::Error) -> LoadError {
    LoadError::Io(err.into())
}
