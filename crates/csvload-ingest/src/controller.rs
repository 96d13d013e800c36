//! Two-phase ingestion sessions for large files
//!
//! An [`IngestionController`] first reads a bounded preview on the caller's
//! thread, then runs the full load on one dedicated OS thread. The worker
//! never touches caller state: it owns a [`LoadSession`], accumulates rows
//! privately and reports through a channel of [`WorkerEvent`]s. The caller
//! drains that channel with [`IngestionController::dispatch`] (non-blocking,
//! for event loops) or [`IngestionController::run`] (async), and only then
//! are the observer and the destination model touched.
//!
//! Cancellation is a set-once [`CancellationToken`]. The worker polls it
//! before every chunk read and after every record. Once the caller sees it,
//! queued events are discarded, the destination is left as it was and
//! `on_cancelled` fires instead of any error.

use crate::config::LoaderConfig;
use crate::feeder::{FeedOutcome, RecordConsumer, StreamingRecordFeeder};
use crate::loader::read_preview;
use crate::parser::Record;
use crate::progress::{ProgressEvent, ProgressThrottle};
use crate::source::ChunkSource;
use crate::table::{ParsedTable, TableBuilder, TableModel};
use csvload_common::{LoadError, Result};
use std::any::Any;
use std::fmt;
use std::ops::ControlFlow;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Lifecycle of one ingestion session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    PreviewLoading,
    PreviewReady,
    FullLoading,
    Completed,
    Cancelled,
    Failed,
}

impl LoadState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LoadState::Completed | LoadState::Cancelled | LoadState::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoadState::Idle => "idle",
            LoadState::PreviewLoading => "loading preview",
            LoadState::PreviewReady => "preview ready",
            LoadState::FullLoading => "loading",
            LoadState::Completed => "completed",
            LoadState::Cancelled => "cancelled",
            LoadState::Failed => "failed",
        }
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-side callbacks, always invoked on the thread calling `dispatch`/`run`
pub trait IngestObserver {
    fn on_progress(&mut self, _event: ProgressEvent) {}

    /// Fires at most once per session and never after cancellation
    fn on_error(&mut self, _error: &LoadError) {}

    fn on_cancelled(&mut self) {}
}

impl IngestObserver for () {}

/// Messages from the loader thread to the caller
#[derive(Debug)]
pub enum WorkerEvent {
    Progress(ProgressEvent),
    Finished(ParsedTable),
    Failed(LoadError),
    Cancelled,
}

/// Clonable handle that cancels one session
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// State owned by the loader thread for the lifetime of a full load
pub struct LoadSession {
    path: PathBuf,
    token: CancellationToken,
    builder: TableBuilder,
    throttle: ProgressThrottle,
    events: UnboundedSender<WorkerEvent>,
}

impl LoadSession {
    fn new(
        path: PathBuf,
        token: CancellationToken,
        progress_interval: usize,
        events: UnboundedSender<WorkerEvent>,
    ) -> Self {
        Self {
            path,
            token,
            builder: TableBuilder::new(),
            throttle: ProgressThrottle::new(progress_interval),
            events,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Immutable progress snapshot
    pub fn snapshot(&self) -> ProgressEvent {
        ProgressEvent::loading(self.builder.row_count())
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    fn run(mut self, config: &LoaderConfig) -> WorkerEvent {
        info!("Full load started");
        let started = Instant::now();

        match self.feed_all(config) {
            Ok(FeedOutcome::Completed) if !self.token.is_cancelled() => {
                let table = self.builder.finish();
                info!(
                    rows = table.row_count(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Full load finished"
                );
                WorkerEvent::Finished(table)
            },
            Ok(_) => {
                info!(rows = self.snapshot().rows_loaded, "Full load cancelled");
                WorkerEvent::Cancelled
            },
            Err(e) if self.token.is_cancelled() => {
                debug!(error = %e, "Ignoring error raised after cancellation");
                WorkerEvent::Cancelled
            },
            Err(e) => {
                error!(error = %e, "Full load failed");
                WorkerEvent::Failed(e)
            },
        }
    }

    fn feed_all(&mut self, config: &LoaderConfig) -> Result<FeedOutcome> {
        // Dropped on return, whichever way the feed ends
        let mut source = ChunkSource::open(&self.path, config)?;
        let mut feeder = StreamingRecordFeeder::from_config(config);
        feeder.run(&mut source, config.chunk_size_bytes, self)
    }
}

impl RecordConsumer for LoadSession {
    fn accept(&mut self, record: &Record) -> ControlFlow<()> {
        if self.token.is_cancelled() {
            return ControlFlow::Break(());
        }
        let flow = self.builder.accept(record);
        if let Some(event) = self.throttle.observe(self.builder.row_count()) {
            if self.events.send(WorkerEvent::Progress(event)).is_err() {
                // Nobody is listening any more
                self.token.cancel();
                return ControlFlow::Break(());
            }
        }
        flow
    }

    fn should_stop(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Preview-then-full-load coordinator for one file
pub struct IngestionController {
    path: PathBuf,
    config: LoaderConfig,
    state: LoadState,
    token: CancellationToken,
    events: Option<UnboundedReceiver<WorkerEvent>>,
    worker: Option<JoinHandle<()>>,
    rows_reported: usize,
}

impl IngestionController {
    pub fn new(path: impl Into<PathBuf>, config: LoaderConfig) -> Self {
        Self {
            path: path.into(),
            config,
            state: LoadState::Idle,
            token: CancellationToken::new(),
            events: None,
            worker: None,
            rows_reported: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Highest row count delivered to the observer so far
    pub fn rows_reported(&self) -> usize {
        self.rows_reported
    }

    /// Whether a loader thread is attached and still running
    pub fn worker_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.token.clone(),
        }
    }

    /// Read the first `preview_rows` rows on the calling thread
    ///
    /// The preview goes back to the caller; the destination is not touched.
    pub fn load_preview(&mut self) -> Result<ParsedTable> {
        self.require(&[LoadState::Idle], "load preview")?;
        self.transition(LoadState::PreviewLoading);

        match self.config.validate().and_then(|_| read_preview(&self.path, &self.config)) {
            Ok(table) => {
                info!(rows = table.row_count(), "Preview ready");
                self.transition(LoadState::PreviewReady);
                Ok(table)
            },
            Err(e) => {
                warn!(error = %e, "Preview failed");
                self.transition(LoadState::Failed);
                Err(e)
            },
        }
    }

    /// Spawn the loader thread for this session
    pub fn start_full_load(&mut self) -> Result<()> {
        self.require(&[LoadState::Idle, LoadState::PreviewReady], "start full load")?;
        if let Err(e) = self.config.validate() {
            self.transition(LoadState::Failed);
            return Err(e);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let session = LoadSession::new(
            self.path.clone(),
            self.token.clone(),
            self.config.progress_interval_rows,
            tx,
        );
        let config = self.config.clone();

        let spawned = std::thread::Builder::new()
            .name("csvload-loader".to_string())
            .spawn(move || run_worker(session, config));

        match spawned {
            Ok(handle) => {
                self.events = Some(rx);
                self.worker = Some(handle);
                self.transition(LoadState::FullLoading);
                Ok(())
            },
            Err(e) => {
                self.transition(LoadState::Failed);
                Err(LoadError::Io(e))
            },
        }
    }

    /// Request cancellation; a session that never started ends right away
    pub fn cancel(&mut self) {
        self.token.cancel();
        if matches!(self.state, LoadState::Idle | LoadState::PreviewReady) {
            self.transition(LoadState::Cancelled);
        }
    }

    /// Deliver every queued worker event without blocking
    pub fn dispatch<M, O>(&mut self, model: &mut M, observer: &mut O) -> LoadState
    where
        M: TableModel + ?Sized,
        O: IngestObserver + ?Sized,
    {
        while self.state == LoadState::FullLoading {
            if self.token.is_cancelled() {
                self.finish_cancelled(observer);
                break;
            }
            let Some(rx) = self.events.as_mut() else {
                break;
            };
            match rx.try_recv() {
                Ok(event) => self.handle(event, model, observer),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.worker_vanished(observer),
            }
        }
        self.state
    }

    /// Await worker events until the session reaches a terminal state
    pub async fn run<M, O>(&mut self, model: &mut M, observer: &mut O) -> LoadState
    where
        M: TableModel + ?Sized,
        O: IngestObserver + ?Sized,
    {
        while self.state == LoadState::FullLoading {
            if self.token.is_cancelled() {
                self.finish_cancelled(observer);
                break;
            }
            let Some(rx) = self.events.as_mut() else {
                break;
            };
            let token = self.token.clone();
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => continue,
                event = rx.recv() => event,
            };
            match next {
                Some(event) => self.handle(event, model, observer),
                None => self.worker_vanished(observer),
            }
        }
        self.state
    }

    fn handle<M, O>(&mut self, event: WorkerEvent, model: &mut M, observer: &mut O)
    where
        M: TableModel + ?Sized,
        O: IngestObserver + ?Sized,
    {
        match event {
            WorkerEvent::Progress(progress) => {
                if progress.rows_loaded >= self.rows_reported {
                    self.rows_reported = progress.rows_loaded;
                    observer.on_progress(progress);
                }
            },
            WorkerEvent::Finished(table) => {
                let rows = table.row_count();
                model.replace_with(table);
                self.rows_reported = rows;
                self.release();
                self.transition(LoadState::Completed);
                observer.on_progress(ProgressEvent::complete(rows));
            },
            WorkerEvent::Failed(e) => {
                self.release();
                self.transition(LoadState::Failed);
                observer.on_error(&e);
            },
            WorkerEvent::Cancelled => self.finish_cancelled(observer),
        }
    }

    fn worker_vanished<O: IngestObserver + ?Sized>(&mut self, observer: &mut O) {
        if self.token.is_cancelled() {
            self.finish_cancelled(observer);
            return;
        }
        let err = LoadError::Worker("loader thread exited without a result".to_string());
        error!(error = %err, "Lost loader thread");
        self.release();
        self.transition(LoadState::Failed);
        observer.on_error(&err);
    }

    fn finish_cancelled<O: IngestObserver + ?Sized>(&mut self, observer: &mut O) {
        self.release();
        self.transition(LoadState::Cancelled);
        observer.on_cancelled();
    }

    /// Drop the channel and detach the worker
    fn release(&mut self) {
        self.events = None;
        self.worker = None;
    }

    fn require(&self, allowed: &[LoadState], operation: &'static str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(LoadError::InvalidState {
                state: self.state.as_str(),
                operation,
            })
        }
    }

    fn transition(&mut self, next: LoadState) {
        debug!(path = %self.path.display(), from = %self.state, to = %next, "Load state change");
        self.state = next;
    }
}

impl Drop for IngestionController {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl fmt::Debug for IngestionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionController")
            .field("path", &self.path)
            .field("state", &self.state)
            .field("rows_reported", &self.rows_reported)
            .finish()
    }
}

fn run_worker(session: LoadSession, config: LoaderConfig) {
    let events = session.events.clone();
    let token = session.token.clone();

    let event = match std::panic::catch_unwind(AssertUnwindSafe(move || session.run(&config))) {
        Ok(event) => event,
        Err(payload) if token.is_cancelled() => {
            debug!(panic = %panic_message(&*payload), "Loader panicked after cancellation");
            WorkerEvent::Cancelled
        },
        Err(payload) => {
            let message = panic_message(&*payload);
            error!(panic = %message, "Loader thread panicked");
            WorkerEvent::Failed(LoadError::Worker(message))
        },
    };

    // The receiver is gone once the caller has cancelled or dropped the controller
    let _ = events.send(event);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::table::MemoryTable;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        progress: Vec<ProgressEvent>,
        errors: Vec<String>,
        cancelled: usize,
    }

    impl IngestObserver for Recorder {
        fn on_progress(&mut self, event: ProgressEvent) {
            self.progress.push(event);
        }

        fn on_error(&mut self, error: &LoadError) {
            self.errors.push(error.to_string());
        }

        fn on_cancelled(&mut self) {
            self.cancelled += 1;
        }
    }

    fn write_rows(dir: &Path, rows: usize) -> PathBuf {
        let path = dir.join("rows.csv");
        let mut text = String::from("id,value\n");
        for i in 0..rows {
            text.push_str(&format!("{},v{}\n", i, i));
        }
        std::fs::write(&path, text).unwrap();
        path
    }

    fn small_chunks() -> LoaderConfig {
        LoaderConfig {
            chunk_size_bytes: 64,
            max_carry_bytes: 4096,
            progress_interval_rows: 10,
            preview_rows: 5,
            ..Default::default()
        }
    }

    fn drive(controller: &mut IngestionController, model: &mut MemoryTable, obs: &mut Recorder) {
        for _ in 0..500 {
            if controller.dispatch(model, obs).is_terminal() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("session did not finish");
    }

    #[test]
    fn test_preview_then_full_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_rows(dir.path(), 50);
        let mut controller = IngestionController::new(&path, small_chunks());
        let mut model = MemoryTable::new();
        let mut obs = Recorder::default();

        let preview = controller.load_preview().unwrap();
        assert_eq!(controller.state(), LoadState::PreviewReady);
        assert_eq!(preview.row_count(), 5);
        assert_eq!(model.revision(), 0);

        controller.start_full_load().unwrap();
        assert_eq!(controller.state(), LoadState::FullLoading);
        drive(&mut controller, &mut model, &mut obs);

        assert_eq!(controller.state(), LoadState::Completed);
        assert_eq!(model.row_count(), 50);
        assert_eq!(model.headers(), ["id", "value"]);
        assert!(obs.errors.is_empty());

        let last = obs.progress.last().unwrap();
        assert!(last.is_complete);
        assert_eq!(last.total_rows, Some(50));
        assert_eq!(obs.progress.iter().filter(|e| e.is_complete).count(), 1);
        assert_eq!(controller.rows_reported(), 50);
        assert!(!controller.worker_running());
    }

    #[test]
    fn test_invalid_transitions() {
        let mut controller = IngestionController::new("/unused.csv", small_chunks());
        controller.state = LoadState::FullLoading;

        let err = controller.load_preview().unwrap_err();
        assert!(matches!(err, LoadError::InvalidState { operation: "load preview", .. }));
        assert!(controller.start_full_load().is_err());
    }

    #[test]
    fn test_missing_file_reports_one_error() {
        let mut controller = IngestionController::new("/no/such/big.csv", small_chunks());
        let mut model = MemoryTable::new();
        let mut obs = Recorder::default();

        controller.start_full_load().unwrap();
        drive(&mut controller, &mut model, &mut obs);

        assert_eq!(controller.state(), LoadState::Failed);
        assert_eq!(obs.errors.len(), 1);
        assert!(obs.errors[0].contains("File not found"));
        assert_eq!(model.revision(), 0);

        // Nothing more is delivered after a terminal state
        controller.dispatch(&mut model, &mut obs);
        assert_eq!(obs.errors.len(), 1);
    }

    #[test]
    fn test_preview_failure_moves_to_failed() {
        let mut controller = IngestionController::new("/no/such/big.csv", small_chunks());
        assert!(controller.load_preview().is_err());
        assert_eq!(controller.state(), LoadState::Failed);
    }

    #[test]
    fn test_cancel_discards_finished_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_rows(dir.path(), 20);
        let mut controller = IngestionController::new(&path, small_chunks());
        let mut model = MemoryTable::new();
        let mut obs = Recorder::default();

        controller.start_full_load().unwrap();
        // Let the worker finish so a Finished event is already queued
        std::thread::sleep(Duration::from_millis(200));
        controller.cancel_handle().cancel();

        assert_eq!(controller.dispatch(&mut model, &mut obs), LoadState::Cancelled);
        assert_eq!(model.row_count(), 0);
        assert_eq!(model.revision(), 0);
        assert_eq!(obs.cancelled, 1);
        assert!(obs.errors.is_empty());

        controller.dispatch(&mut model, &mut obs);
        assert_eq!(obs.cancelled, 1);
    }

    #[test]
    fn test_session_error_after_cancel_is_cancellation() {
        let config = small_chunks();
        let missing = PathBuf::from("/no/such/big.csv");
        let cancelled = CancellationToken::new();
        cancelled.cancel();

        let (tx, _rx) = mpsc::unbounded_channel();
        let session = LoadSession::new(missing.clone(), cancelled.clone(), 10, tx.clone());
        assert!(matches!(session.run(&config), WorkerEvent::Cancelled));

        // The same failure without cancellation is reported
        let session = LoadSession::new(missing.clone(), CancellationToken::new(), 10, tx);
        assert!(matches!(
            session.run(&config),
            WorkerEvent::Failed(LoadError::NotFound(_))
        ));

        // run_worker sends exactly one event, and it is not an error
        let (tx, mut rx) = mpsc::unbounded_channel();
        run_worker(LoadSession::new(missing, cancelled, 10, tx), config);
        assert!(matches!(rx.try_recv(), Ok(WorkerEvent::Cancelled)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_failure_queued_before_cancel_is_not_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ragged.csv");
        std::fs::write(&path, "a,b\n1,2\n3,4,5\n6,7\n").unwrap();

        let mut config = small_chunks();
        config.csv.strict = true;
        let mut controller = IngestionController::new(&path, config);
        let mut model = MemoryTable::new();
        let mut obs = Recorder::default();

        controller.start_full_load().unwrap();
        for _ in 0..500 {
            if !controller.worker_running() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        // The worker has already queued its parse failure
        assert!(!controller.worker_running());
        controller.cancel();

        assert_eq!(controller.dispatch(&mut model, &mut obs), LoadState::Cancelled);
        assert!(obs.errors.is_empty());
        assert_eq!(obs.cancelled, 1);
        assert_eq!(model.revision(), 0);

        controller.dispatch(&mut model, &mut obs);
        assert!(obs.errors.is_empty());
        assert_eq!(obs.cancelled, 1);
    }

    #[test]
    fn test_cancel_before_start() {
        let mut controller = IngestionController::new("/unused.csv", small_chunks());
        controller.cancel();
        assert_eq!(controller.state(), LoadState::Cancelled);
        assert!(controller.start_full_load().is_err());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*payload), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*payload), "unknown panic");
    }
}
