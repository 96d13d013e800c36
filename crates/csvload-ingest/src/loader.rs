//! Entry points: whole-file reads, previews and the size-based dispatcher

use crate::config::{CsvConfig, LoaderConfig};
use crate::controller::IngestionController;
use crate::feeder::{RecordConsumer, StreamingRecordFeeder, UTF8_BOM};
use crate::heuristic::should_stream;
use crate::parser::{CsvRecordParser, RecordParser};
use crate::source::ChunkSource;
use crate::table::{ParsedTable, TableBuilder, TableModel};
use csvload_common::Result;
use std::path::Path;
use tracing::{info, instrument};

/// What [`load_file`] did with a file
#[derive(Debug)]
pub enum LoadPlan {
    /// Small file, already handed to the model
    Loaded { rows: usize },
    /// Large file; drive the returned controller to load it
    Streaming(IngestionController),
}

/// Parse a complete in-memory document into `consumer`
///
/// A missing final terminator is added before parsing. Returns the number of
/// records delivered.
pub fn parse_bytes<C>(mut bytes: Vec<u8>, csv: &CsvConfig, consumer: &mut C) -> Result<u64>
where
    C: RecordConsumer + ?Sized,
{
    if csv.detect_bom && bytes.starts_with(UTF8_BOM) {
        bytes.drain(..UTF8_BOM.len());
    }
    if !bytes.is_empty() && !matches!(bytes.last(), Some(b'\n' | b'\r')) {
        bytes.push(b'\n');
    }

    let mut parser = CsvRecordParser::new(csv.clone());
    let mut delivered = 0;
    for record in parser.parse(&bytes) {
        let record = record?;
        delivered += 1;
        if consumer.accept(&record).is_break() {
            break;
        }
    }
    Ok(delivered)
}

/// Read, decompress and parse a whole file in one pass
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn read_table(path: impl AsRef<Path>, config: &LoaderConfig) -> Result<ParsedTable> {
    let bytes = ChunkSource::open(path.as_ref(), config)?.read_to_end()?;
    let mut builder = TableBuilder::new();
    parse_bytes(bytes, &config.csv, &mut builder)?;

    let table = builder.finish();
    info!(rows = table.row_count(), columns = table.column_count(), "Loaded whole file");
    Ok(table)
}

/// Read only the first `preview_rows` data rows
///
/// Reads in small chunks sized for roughly that many rows and stops as soon as
/// enough rows are collected.
pub fn read_preview(path: impl AsRef<Path>, config: &LoaderConfig) -> Result<ParsedTable> {
    let mut source = ChunkSource::open(path.as_ref(), config)?;
    let mut feeder = StreamingRecordFeeder::from_config(config);
    let mut builder = TableBuilder::with_row_limit(config.preview_rows);

    feeder.run(&mut source, config.preview_chunk_size(), &mut builder)?;
    Ok(builder.finish())
}

/// Load `path` into `model`, or hand back a controller when it is large
pub fn load_file<M>(
    path: impl AsRef<Path>,
    model: &mut M,
    config: &LoaderConfig,
) -> Result<LoadPlan>
where
    M: TableModel + ?Sized,
{
    let path = path.as_ref();
    config.validate()?;

    if should_stream(path, config.large_file_threshold_bytes) {
        info!(path = %path.display(), "Large file, using streaming load");
        return Ok(LoadPlan::Streaming(IngestionController::new(path, config.clone())));
    }

    let table = read_table(path, config)?;
    let rows = table.row_count();
    model.replace_with(table);
    Ok(LoadPlan::Loaded { rows })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::table::MemoryTable;

    #[test]
    fn test_parse_bytes_adds_terminator_and_strips_bom() {
        let mut builder = TableBuilder::new();
        let bytes = b"\xEF\xBB\xBFa,b\n1,2".to_vec();
        let n = parse_bytes(bytes, &CsvConfig::default(), &mut builder).unwrap();
        assert_eq!(n, 2);
        let table = builder.finish();
        assert_eq!(table.headers, vec!["a", "b"]);
        assert_eq!(table.rows, vec![vec!["1", "2"]]);
    }

    #[test]
    fn test_read_preview_limits_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("many.csv");
        let body: String = (0..1000).map(|i| format!("{},{}\n", i, i * 2)).collect();
        std::fs::write(&path, format!("n,double\n{}", body)).unwrap();

        let config = LoaderConfig {
            preview_rows: 10,
            ..Default::default()
        };
        let preview = read_preview(&path, &config).unwrap();
        assert_eq!(preview.headers, vec!["n", "double"]);
        assert_eq!(preview.row_count(), 10);
        assert_eq!(preview.rows[9], vec!["9", "18"]);
    }

    #[test]
    fn test_load_file_small_and_large() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.csv");
        std::fs::write(&path, "x,y\n1\n").unwrap();

        let mut model = MemoryTable::new();
        let plan = load_file(&path, &mut model, &LoaderConfig::default()).unwrap();
        assert!(matches!(plan, LoadPlan::Loaded { rows: 1 }));
        assert_eq!(model.rows()[0], vec!["1", ""]);

        let config = LoaderConfig {
            large_file_threshold_bytes: 1,
            ..Default::default()
        };
        let mut untouched = MemoryTable::new();
        match load_file(&path, &mut untouched, &config).unwrap() {
            LoadPlan::Streaming(controller) => assert_eq!(controller.path(), path.as_path()),
            other => panic!("expected streaming plan, got {:?}", other),
        }
        assert_eq!(untouched.revision(), 0);
    }

    #[test]
    fn test_load_file_missing() {
        let mut model = MemoryTable::new();
        let err = load_file("/no/such/file.csv", &mut model, &LoaderConfig::default()).unwrap_err();
        assert!(matches!(err, csvload_common::LoadError::NotFound(_)));
        assert_eq!(model.revision(), 0);
    }
}
