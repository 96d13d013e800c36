//! Table documents other than delimited text
//!
//! JSON and XML files hold a whole table at once; they are read and written
//! in one go and never go through the streaming pipeline. Either may carry
//! the gzip suffix, in which case it is compressed like a `.csv.gz`.

pub mod json;
pub mod xml;

use crate::config::LoaderConfig;
use crate::export::write_csv;
use crate::loader::read_table;
use crate::source::{is_gzip_path, ChunkSource};
use crate::table::ParsedTable;
use csvload_common::Result;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// File format picked from a file name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Csv,
    Json,
    Xml,
}

impl Format {
    /// Look at the extension left after removing the gzip suffix
    ///
    /// Anything that is not `.json` or `.xml` is treated as delimited text.
    pub fn from_path(path: &Path, gzip_suffix: &str) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let suffix = gzip_suffix.to_lowercase();
        let name = match name.strip_suffix(suffix.as_str()) {
            Some(stem) if !suffix.is_empty() => stem,
            _ => name.as_str(),
        };

        if name.ends_with(".json") {
            Format::Json
        } else if name.ends_with(".xml") {
            Format::Xml
        } else {
            Format::Csv
        }
    }
}

/// Read a table in whichever format the file name says
pub fn read_any(path: impl AsRef<Path>, config: &LoaderConfig) -> Result<ParsedTable> {
    let path = path.as_ref();
    match Format::from_path(path, &config.gzip_suffix) {
        Format::Csv => read_table(path, config),
        Format::Json => json::from_slice(&ChunkSource::open(path, config)?.read_to_end()?),
        Format::Xml => xml::from_slice(&ChunkSource::open(path, config)?.read_to_end()?),
    }
}

/// Write a table in whichever format the file name says
pub fn write_any(
    path: impl AsRef<Path>,
    table: &ParsedTable,
    config: &LoaderConfig,
) -> Result<()> {
    let path = path.as_ref();
    let format = Format::from_path(path, &config.gzip_suffix);
    if format == Format::Csv {
        return write_csv(path, table, config);
    }

    let out = BufWriter::new(File::create(path)?);
    if is_gzip_path(path, &config.gzip_suffix) {
        let encoder = write_document(format, GzEncoder::new(out, Compression::default()), table)?;
        encoder.finish()?.flush()?;
    } else {
        write_document(format, out, table)?.flush()?;
    }
    Ok(())
}

fn write_document<W: Write>(format: Format, out: W, table: &ParsedTable) -> Result<W> {
    match format {
        Format::Xml => xml::write_to(out, table),
        Format::Json | Format::Csv => json::write_to(out, table),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_path() {
        let f = |p: &str| Format::from_path(Path::new(p), ".gz");
        assert_eq!(f("a.csv"), Format::Csv);
        assert_eq!(f("a.csv.gz"), Format::Csv);
        assert_eq!(f("A.JSON"), Format::Json);
        assert_eq!(f("dir/b.xml"), Format::Xml);
        assert_eq!(f("notes.txt"), Format::Csv);
    }

    #[test]
    fn test_gzip_json_and_xml() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoaderConfig::default();
        let table = ParsedTable::new(
            vec!["k".into(), "v".into()],
            vec![vec!["1".into(), "caf\u{e9}".into()]],
        );

        for name in ["t.json.gz", "t.XML.GZ"] {
            let path = dir.path().join(name);
            write_any(&path, &table, &config).unwrap();

            let bytes = std::fs::read(&path).unwrap();
            assert_eq!(&bytes[..2], &[0x1f, 0x8b], "{} is not gzip", name);
            assert_eq!(read_any(&path, &config).unwrap(), table, "{}", name);
        }
    }

    #[test]
    fn test_corrupt_gzip_json_is_decompression_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json.gz");
        std::fs::write(&path, b"{\"headers\": []}").unwrap();

        let err = read_any(&path, &LoaderConfig::default()).unwrap_err();
        assert!(
            matches!(err, csvload_common::LoadError::Decompression { .. }),
            "{:?}",
            err
        );
    }

    #[test]
    fn test_convert_csv_to_xml_to_json() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoaderConfig::default();
        let csv = dir.path().join("in.csv");
        std::fs::write(&csv, "h1,h2\nx,\"y,z\"\n").unwrap();

        let table = read_any(&csv, &config).unwrap();
        let xml = dir.path().join("mid.xml");
        write_any(&xml, &table, &config).unwrap();
        let json = dir.path().join("out.json");
        write_any(&json, &read_any(&xml, &config).unwrap(), &config).unwrap();

        let back = read_any(&json, &config).unwrap();
        assert_eq!(back.headers, vec!["h1", "h2"]);
        assert_eq!(back.rows, vec![vec!["x", "y,z"]]);
    }
}
