//! Safe split points inside an accumulated byte buffer
//!
//! The feeder hands the resolver `carry ++ new bytes` and gets back an index
//! `k` such that `buf[..k]` holds only complete records. Whatever follows `k`
//! stays in the carry for the next round.
//!
//! Two policies exist. [`BoundaryPolicy::LastTerminator`] splits after the
//! last `\n`/`\r` in the buffer and can cut a quoted field that contains a
//! line break. [`BoundaryPolicy::QuoteAware`] follows the quoting grammar of
//! the record parser byte by byte and only accepts terminators outside quoted
//! fields. Its scan state survives between calls, so every byte is examined
//! once no matter how long a record keeps the buffer growing.

use crate::config::{BoundaryPolicy, CsvConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// At the first byte of a field
    FieldStart,
    /// Inside an unquoted field; quotes here are literal
    InField,
    InQuoted,
    /// Saw a quote inside a quoted field: either its end or half of `""`
    QuoteInQuoted,
    /// Saw the escape byte inside a quoted field; the next byte is literal
    Escaped,
}

/// Finds the last record boundary in a growing buffer
#[derive(Debug, Clone)]
pub struct BoundaryResolver {
    policy: BoundaryPolicy,
    delimiter: u8,
    quote: u8,
    escape: Option<u8>,
    state: ScanState,
    /// Length of the buffer prefix already examined
    scanned: usize,
    /// Split point found in the examined prefix but not yet handed out
    pending_split: Option<usize>,
}

impl BoundaryResolver {
    pub fn new(policy: BoundaryPolicy, csv: &CsvConfig) -> Self {
        Self {
            policy,
            delimiter: csv.delimiter,
            quote: csv.quote,
            escape: (!csv.doubled_quotes()).then_some(csv.escape),
            state: ScanState::FieldStart,
            scanned: 0,
            pending_split: None,
        }
    }

    pub fn policy(&self) -> BoundaryPolicy {
        self.policy
    }

    /// Forget all scan state; the next buffer is treated as fresh input
    pub fn reset(&mut self) {
        self.state = ScanState::FieldStart;
        self.scanned = 0;
        self.pending_split = None;
    }

    /// Whether the examined bytes end inside a quoted field
    pub fn in_quoted_field(&self) -> bool {
        matches!(self.state, ScanState::InQuoted | ScanState::Escaped)
    }

    /// Exclusive split index for `buf`, or `None` when no boundary exists yet
    ///
    /// With the quote-aware policy the caller must split exactly at the
    /// returned index and pass the remainder (plus any new bytes) on the next
    /// call.
    pub fn resolve(&mut self, buf: &[u8]) -> Option<usize> {
        match self.policy {
            BoundaryPolicy::LastTerminator => buf
                .iter()
                .rposition(|&b| is_terminator(b))
                .map(|i| i + 1),
            BoundaryPolicy::QuoteAware => self.resolve_quote_aware(buf),
        }
    }

    fn resolve_quote_aware(&mut self, buf: &[u8]) -> Option<usize> {
        if buf.len() < self.scanned {
            // Caller handed us something other than the old carry
            self.reset();
        }

        for (offset, &byte) in buf[self.scanned..].iter().enumerate() {
            if self.step(byte) {
                self.pending_split = Some(self.scanned + offset + 1);
            }
        }
        self.scanned = buf.len();

        let split = self.pending_split.take()?;
        self.scanned -= split;
        Some(split)
    }

    /// Advance over one byte; true when the byte ends a record
    fn step(&mut self, byte: u8) -> bool {
        use ScanState::*;

        match self.state {
            FieldStart | InField | QuoteInQuoted => {
                if is_terminator(byte) {
                    self.state = FieldStart;
                    return true;
                }
                self.state = if byte == self.delimiter {
                    FieldStart
                } else if byte == self.quote && self.state == FieldStart {
                    InQuoted
                } else if byte == self.quote
                    && self.state == QuoteInQuoted
                    && self.escape.is_none()
                {
                    InQuoted
                } else {
                    InField
                };
            },
            InQuoted => {
                if Some(byte) == self.escape {
                    self.state = Escaped;
                } else if byte == self.quote {
                    self.state = QuoteInQuoted;
                }
            },
            Escaped => self.state = InQuoted,
        }
        false
    }
}

fn is_terminator(byte: u8) -> bool {
    byte == b'\n' || byte == b'\r'
}
