//! Integration tests for background full loads
//!
//! These tests drive `IngestionController::run` on a tokio runtime and
//! validate:
//! - Cancellation from inside a progress callback
//! - Progress ordering and the single completion event
//! - Gzip full loads
//! - Error reporting that leaves the destination untouched
//! - Errors after cancellation never reaching the observer
//! - The size-based dispatcher handing back a controller

#![allow(clippy::unwrap_used, clippy::expect_used)]

use csvload_common::{ErrorKind, LoadError};
use csvload_ingest::{
    load_file, CancelHandle, IngestObserver, IngestionController, LoadPlan, LoadState,
    LoaderConfig, MemoryTable, ProgressEvent,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::path::{Path, PathBuf};

fn streaming_config() -> LoaderConfig {
    LoaderConfig {
        large_file_threshold_bytes: 1,
        chunk_size_bytes: 4096,
        max_carry_bytes: 1 << 20,
        preview_rows: 5,
        progress_interval_rows: 1000,
        ..Default::default()
    }
}

fn csv_body(rows: usize) -> String {
    let mut body = String::from("id,name,score\n");
    for i in 0..rows {
        body.push_str(&format!("{},\"row {}\",{}\n", i, i, i % 97));
    }
    body
}

fn write_csv(dir: &Path, name: &str, rows: usize) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, csv_body(rows)).unwrap();
    path
}

#[derive(Default)]
struct Recorder {
    progress: Vec<ProgressEvent>,
    errors: Vec<(ErrorKind, String)>,
    cancelled: usize,
    cancel_on_progress: Option<CancelHandle>,
}

impl IngestObserver for Recorder {
    fn on_progress(&mut self, event: ProgressEvent) {
        self.progress.push(event);
        if let Some(handle) = &self.cancel_on_progress {
            handle.cancel();
        }
    }

    fn on_error(&mut self, error: &LoadError) {
        self.errors.push((error.kind(), error.to_string()));
    }

    fn on_cancelled(&mut self) {
        self.cancelled += 1;
    }
}

#[tokio::test]
async fn test_cancel_from_first_progress_callback() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_csv(dir.path(), "big.csv", 100_000);

    let mut controller = IngestionController::new(&path, streaming_config());
    let mut model = MemoryTable::new();
    let mut observer = Recorder {
        cancel_on_progress: Some(controller.cancel_handle()),
        ..Default::default()
    };

    controller.start_full_load().unwrap();
    let state = controller.run(&mut model, &mut observer).await;

    assert_eq!(state, LoadState::Cancelled);
    assert_eq!(observer.progress.len(), 1);
    assert!(!observer.progress[0].is_complete);
    assert_eq!(observer.cancelled, 1);
    assert!(observer.errors.is_empty());
    assert_eq!(model.rows().len(), 0);
    assert_eq!(model.revision(), 0);
    assert!(!controller.worker_running());

    // Nothing else arrives afterwards
    assert_eq!(controller.dispatch(&mut model, &mut observer), LoadState::Cancelled);
    assert_eq!(observer.cancelled, 1);
}

#[tokio::test]
async fn test_progress_is_monotonic_and_completes_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_csv(dir.path(), "steady.csv", 12_345);

    let mut controller = IngestionController::new(&path, streaming_config());
    let mut model = MemoryTable::new();
    let mut observer = Recorder::default();

    let preview = controller.load_preview().unwrap();
    assert_eq!(preview.row_count(), 5);
    assert_eq!(model.revision(), 0);

    controller.start_full_load().unwrap();
    let state = controller.run(&mut model, &mut observer).await;
    assert_eq!(state, LoadState::Completed);

    let rows: Vec<usize> = observer.progress.iter().map(|p| p.rows_loaded).collect();
    assert!(rows.windows(2).all(|w| w[0] <= w[1]), "{:?}", rows);
    assert_eq!(observer.progress.iter().filter(|p| p.is_complete).count(), 1);

    let last = observer.progress.last().unwrap();
    assert!(last.is_complete);
    assert_eq!(last.rows_loaded, 12_345);
    assert_eq!(last.total_rows, Some(12_345));

    assert_eq!(model.headers(), ["id", "name", "score"]);
    assert_eq!(model.rows().len(), 12_345);
    assert_eq!(model.rows()[12_344], vec!["12344", "row 12344", "25"]);
    assert_eq!(controller.rows_reported(), 12_345);
}

#[tokio::test]
async fn test_gzip_full_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.CSV.GZ");
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(csv_body(3_000).as_bytes()).unwrap();
    std::fs::write(&path, encoder.finish().unwrap()).unwrap();

    let mut controller = IngestionController::new(&path, streaming_config());
    let mut model = MemoryTable::new();

    let preview = controller.load_preview().unwrap();
    assert_eq!(preview.rows[0], vec!["0", "row 0", "0"]);

    controller.start_full_load().unwrap();
    assert_eq!(
        controller.run(&mut model, &mut ()).await,
        LoadState::Completed
    );
    assert_eq!(model.rows().len(), 3_000);
}

#[tokio::test]
async fn test_strict_parse_failure_reported_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ragged.csv");
    let mut body = csv_body(5_000);
    body.push_str("oops,too,many,fields\n");
    body.push_str(&csv_body(10));
    std::fs::write(&path, body).unwrap();

    let mut config = streaming_config();
    config.csv.strict = true;
    let mut controller = IngestionController::new(&path, config);
    let mut model = MemoryTable::new();
    let mut observer = Recorder::default();

    controller.start_full_load().unwrap();
    let state = controller.run(&mut model, &mut observer).await;

    assert_eq!(state, LoadState::Failed);
    assert_eq!(observer.errors.len(), 1);
    let (kind, message) = &observer.errors[0];
    assert_eq!(*kind, ErrorKind::Parse);
    assert!(
        message.contains("Failed to parse CSV content: "),
        "unexpected message {}",
        message
    );
    assert!(observer.progress.iter().all(|p| !p.is_complete));
    assert_eq!(observer.cancelled, 0);
    assert_eq!(model.revision(), 0);
}

#[tokio::test]
async fn test_parse_failure_after_cancel_is_suppressed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("late_error.csv");
    let mut body = csv_body(1_500);
    body.push_str("oops,too,many,fields\n");
    std::fs::write(&path, body).unwrap();

    let mut config = streaming_config();
    config.csv.strict = true;
    let mut controller = IngestionController::new(&path, config);
    let mut model = MemoryTable::new();
    let mut observer = Recorder {
        cancel_on_progress: Some(controller.cancel_handle()),
        ..Default::default()
    };

    controller.start_full_load().unwrap();
    let state = controller.run(&mut model, &mut observer).await;

    assert_eq!(state, LoadState::Cancelled);
    assert!(observer.errors.is_empty(), "{:?}", observer.errors);
    assert_eq!(observer.cancelled, 1);
    assert_eq!(model.revision(), 0);

    // Give the loader time to reach the bad record, then drain again
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(controller.dispatch(&mut model, &mut observer), LoadState::Cancelled);
    assert!(observer.errors.is_empty());
    assert_eq!(observer.cancelled, 1);
}

#[tokio::test]
async fn test_corrupt_gzip_reports_decompression_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.csv.gz");
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(csv_body(2_000).as_bytes()).unwrap();
    let mut bytes = encoder.finish().unwrap();
    bytes.truncate(bytes.len() / 2);
    std::fs::write(&path, bytes).unwrap();

    let mut controller = IngestionController::new(&path, streaming_config());
    let mut model = MemoryTable::new();
    let mut observer = Recorder::default();

    controller.start_full_load().unwrap();
    assert_eq!(
        controller.run(&mut model, &mut observer).await,
        LoadState::Failed
    );
    assert_eq!(observer.errors.len(), 1);
    assert_eq!(observer.errors[0].0, ErrorKind::Decompression);
    assert_eq!(model.revision(), 0);
}

#[tokio::test]
async fn test_load_file_streaming_plan() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_csv(dir.path(), "plan.csv", 2_500);
    let mut model = MemoryTable::new();

    let plan = load_file(&path, &mut model, &streaming_config()).unwrap();
    let LoadPlan::Streaming(mut controller) = plan else {
        panic!("expected a streaming plan");
    };
    assert_eq!(controller.state(), LoadState::Idle);
    assert_eq!(model.revision(), 0);

    controller.start_full_load().unwrap();
    assert_eq!(
        controller.run(&mut model, &mut ()).await,
        LoadState::Completed
    );
    assert_eq!(model.rows().len(), 2_500);

    let small = LoaderConfig::default();
    let mut direct = MemoryTable::new();
    match load_file(&path, &mut direct, &small).unwrap() {
        LoadPlan::Loaded { rows } => assert_eq!(rows, 2_500),
        LoadPlan::Streaming(_) => panic!("small file should load directly"),
    }
    assert_eq!(direct.as_table(), model.as_table());
}

#[tokio::test]
async fn test_dropping_controller_stops_worker() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_csv(dir.path(), "dropped.csv", 50_000);

    let mut controller = IngestionController::new(&path, streaming_config());
    let handle = controller.cancel_handle();
    controller.start_full_load().unwrap();
    drop(controller);

    assert!(handle.is_cancelled());
}
