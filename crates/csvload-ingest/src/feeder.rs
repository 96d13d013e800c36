//! Chunk-by-chunk record feeding
//!
//! [`StreamingRecordFeeder`] owns the carry buffer. Each chunk is appended to
//! it, the resolver picks a split point, the prefix goes through the record
//! parser and every record is handed to a [`RecordConsumer`] before the next
//! one is parsed. Only the carry and one chunk are ever held in memory.

use crate::boundary::BoundaryResolver;
use crate::config::LoaderConfig;
use crate::parser::{CsvRecordParser, Record, RecordParser};
use crate::source::ChunkSource;
use csvload_common::{LoadError, Result};
use std::ops::ControlFlow;
use tracing::{debug, warn};

pub(crate) const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Receives records one at a time, in file order
pub trait RecordConsumer {
    /// Take one record; `Break` stops the feed
    fn accept(&mut self, record: &Record) -> ControlFlow<()>;

    /// Polled before every chunk read and after every record
    fn should_stop(&self) -> bool {
        false
    }
}

impl<F> RecordConsumer for F
where
    F: FnMut(&Record) -> ControlFlow<()>,
{
    fn accept(&mut self, record: &Record) -> ControlFlow<()> {
        self(record)
    }
}

/// How a [`StreamingRecordFeeder::run`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// The source was exhausted and the trailing carry flushed
    Completed,
    /// The consumer asked to stop; the rest of the source was not read
    Stopped,
}

/// Drives a [`RecordParser`] over a chunked byte stream
pub struct StreamingRecordFeeder<P = CsvRecordParser> {
    parser: P,
    resolver: BoundaryResolver,
    carry: Vec<u8>,
    max_carry: usize,
    bom_pending: bool,
    finished: bool,
    stopped: bool,
    bytes_fed: u64,
    records_emitted: u64,
}

impl StreamingRecordFeeder<CsvRecordParser> {
    /// CSV feeder wired from loader settings
    pub fn from_config(config: &LoaderConfig) -> Self {
        Self::new(
            CsvRecordParser::new(config.csv.clone()),
            BoundaryResolver::new(config.boundary, &config.csv),
            config.max_carry_bytes,
        )
        .with_bom_detection(config.csv.detect_bom)
    }
}

impl<P: RecordParser> StreamingRecordFeeder<P> {
    pub fn new(parser: P, resolver: BoundaryResolver, max_carry_bytes: usize) -> Self {
        Self {
            parser,
            resolver,
            carry: Vec::new(),
            max_carry: max_carry_bytes,
            bom_pending: true,
            finished: false,
            stopped: false,
            bytes_fed: 0,
            records_emitted: 0,
        }
    }

    /// Strip a UTF-8 byte order mark from the first bytes (on by default)
    pub fn with_bom_detection(mut self, enabled: bool) -> Self {
        self.bom_pending = enabled;
        self
    }

    pub fn parser(&self) -> &P {
        &self.parser
    }

    /// Raw bytes passed to [`feed`](Self::feed) so far
    pub fn bytes_fed(&self) -> u64 {
        self.bytes_fed
    }

    pub fn records_emitted(&self) -> u64 {
        self.records_emitted
    }

    pub fn carry_len(&self) -> usize {
        self.carry.len()
    }

    /// Append a chunk and emit every record that is now complete
    pub fn feed<C>(&mut self, chunk: &[u8], consumer: &mut C) -> Result<ControlFlow<()>>
    where
        C: RecordConsumer + ?Sized,
    {
        if self.finished {
            return Err(LoadError::InvalidState {
                state: "finished",
                operation: "feed",
            });
        }
        if self.stopped {
            return Ok(ControlFlow::Break(()));
        }

        self.bytes_fed += chunk.len() as u64;
        self.carry.extend_from_slice(chunk);

        if self.bom_pending {
            if self.carry.len() < UTF8_BOM.len() && UTF8_BOM.starts_with(&self.carry) {
                return Ok(ControlFlow::Continue(()));
            }
            self.strip_bom();
        }

        let mut flow = ControlFlow::Continue(());
        if let Some(split) = self.resolver.resolve(&self.carry) {
            flow = deliver(
                &mut self.parser,
                &self.carry[..split],
                consumer,
                &mut self.records_emitted,
            )?;
            self.carry.drain(..split);
        }

        if flow.is_break() {
            self.stop();
            return Ok(flow);
        }
        if self.carry.len() > self.max_carry {
            return Err(LoadError::RecordTooLarge {
                limit: self.max_carry,
            });
        }
        Ok(flow)
    }

    /// Flush the trailing carry, adding a `\n` when the input lacked one
    ///
    /// Only the first call does anything.
    pub fn finish<C>(&mut self, consumer: &mut C) -> Result<ControlFlow<()>>
    where
        C: RecordConsumer + ?Sized,
    {
        if self.finished {
            return Ok(ControlFlow::Continue(()));
        }
        self.finished = true;
        if self.stopped {
            return Ok(ControlFlow::Break(()));
        }
        if self.bom_pending {
            self.strip_bom();
        }
        if self.carry.is_empty() {
            return Ok(ControlFlow::Continue(()));
        }

        if self.resolver.in_quoted_field() {
            warn!(bytes = self.carry.len(), "Input ends inside a quoted field");
        }
        let mut tail = std::mem::take(&mut self.carry);
        if !matches!(tail.last(), Some(b'\n' | b'\r')) {
            tail.push(b'\n');
        }
        self.resolver.reset();

        let flow = deliver(&mut self.parser, &tail, consumer, &mut self.records_emitted)?;
        if flow.is_break() {
            self.stopped = true;
        }
        Ok(flow)
    }

    /// Pull every chunk from `source` through the parser into `consumer`
    pub fn run<C>(
        &mut self,
        source: &mut ChunkSource,
        chunk_size: usize,
        consumer: &mut C,
    ) -> Result<FeedOutcome>
    where
        C: RecordConsumer + ?Sized,
    {
        if chunk_size == 0 {
            return Err(LoadError::InvalidChunkSize(chunk_size));
        }

        let mut buf = vec![0u8; chunk_size];
        loop {
            if consumer.should_stop() {
                self.stop();
                debug!(path = %source.path().display(), "Feed stopped before next chunk");
                return Ok(FeedOutcome::Stopped);
            }

            let read = source.read_chunk(&mut buf)?;
            if read == 0 {
                break;
            }
            debug!(
                bytes = read,
                carry = self.carry.len(),
                records = self.records_emitted,
                "Feeding chunk"
            );
            if self.feed(&buf[..read], consumer)?.is_break() {
                return Ok(FeedOutcome::Stopped);
            }
        }

        match self.finish(consumer)? {
            ControlFlow::Continue(()) => Ok(FeedOutcome::Completed),
            ControlFlow::Break(()) => Ok(FeedOutcome::Stopped),
        }
    }

    fn strip_bom(&mut self) {
        self.bom_pending = false;
        if self.carry.starts_with(UTF8_BOM) {
            self.carry.drain(..UTF8_BOM.len());
        }
    }

    fn stop(&mut self) {
        self.stopped = true;
        self.carry.clear();
        self.resolver.reset();
    }
}

/// Parse `bytes` and hand each record to `consumer` as soon as it is parsed
fn deliver<P, C>(
    parser: &mut P,
    bytes: &[u8],
    consumer: &mut C,
    emitted: &mut u64,
) -> Result<ControlFlow<()>>
where
    P: RecordParser + ?Sized,
    C: RecordConsumer + ?Sized,
{
    for record in parser.parse(bytes) {
        let record = record?;
        *emitted += 1;
        if consumer.accept(&record).is_break() || consumer.should_stop() {
            return Ok(ControlFlow::Break(()));
        }
    }
    Ok(ControlFlow::Continue(()))
}
