//! `{"headers": [...], "rows": [[...]]}` documents

use crate::table::ParsedTable;
use csvload_common::{LoadError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    headers: Vec<Value>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

/// Cells may be any JSON scalar; `null` reads as an empty string
fn cell_text(value: Value) -> Result<String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(LoadError::parse(format!(
            "expected a scalar cell, found {}",
            other
        ))),
    }
}

fn into_table(raw: RawDocument) -> Result<ParsedTable> {
    let headers = raw
        .headers
        .into_iter()
        .map(cell_text)
        .collect::<Result<Vec<_>>>()?;
    let rows = raw
        .rows
        .into_iter()
        .map(|row| row.into_iter().map(cell_text).collect())
        .collect::<Result<Vec<_>>>()?;
    Ok(ParsedTable::new(headers, rows))
}

pub fn parse_json(text: &str) -> Result<ParsedTable> {
    into_table(serde_json::from_str(text)?)
}

pub fn read_json(path: impl AsRef<Path>) -> Result<ParsedTable> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| LoadError::from_open(path, e))?;
    into_table(serde_json::from_reader(BufReader::new(file))?)
}

/// Parse a document already held in memory, e.g. after decompression
pub fn from_slice(bytes: &[u8]) -> Result<ParsedTable> {
    into_table(serde_json::from_slice(bytes)?)
}

/// Serialize `table` into any writer and hand the writer back
pub fn write_to<W: Write>(mut out: W, table: &ParsedTable) -> Result<W> {
    serde_json::to_writer_pretty(&mut out, table)?;
    out.write_all(b"\n")?;
    Ok(out)
}

pub fn write_json(path: impl AsRef<Path>, table: &ParsedTable) -> Result<()> {
    let out = BufWriter::new(File::create(path.as_ref())?);
    write_to(out, table)?.flush()?;
    Ok(())
}
