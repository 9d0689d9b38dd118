//! NMEA sentence framing
//!
//! Locates `$...\n` sentence spans inside an accumulating receive buffer.
//! Scanning runs newest-first so the most recent data is decoded before
//! older, possibly stale sentences. Checksums are not looked at here.

use bytes::{Buf, BytesMut};
use std::ops::Range;

use super::checksum::SENTENCE_START;

/// Default receive buffer capacity
pub const BUFFER_CAPACITY: usize = 2048;

/// Maximum sentence length, excluding the line terminator.
/// NMEA allows 82 characters; receivers in the wild overshoot.
pub const MAX_SENTENCE_LENGTH: usize = 128;

/// Below this many buffered bytes a pass is not worth running
pub const MIN_PROCESS_LENGTH: usize = 40;

/// Sentence terminator
pub const SENTENCE_END: u8 = b'\n';

/// Field separator
pub const DELIMITER: u8 = b',';

/// Bounded accumulator for not-yet-parsed transport bytes
#[derive(Debug)]
pub struct RawBuffer {
    data: BytesMut,
    capacity: usize,
    resets: u64,
}

impl RawBuffer {
    /// Create a buffer holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_PROCESS_LENGTH);
        Self {
            data: BytesMut::with_capacity(capacity),
            capacity,
            resets: 0,
        }
    }

    /// Append a chunk.
    ///
    /// When the chunk would overflow the buffer the unparsed contents are
    /// discarded first. A chunk larger than the whole buffer keeps only its
    /// newest bytes. Returns `true` if a reset happened.
    pub fn append(&mut self, chunk: &[u8]) -> bool {
        let mut reset = false;

        if self.data.len() + chunk.len() >= self.capacity {
            self.data.clear();
            self.resets += 1;
            reset = true;
        }

        let chunk = if chunk.len() >= self.capacity {
            &chunk[chunk.len() - (self.capacity - 1)..]
        } else {
            chunk
        };

        self.data.extend_from_slice(chunk);
        reset
    }

    /// Drop everything before `offset`, shifting the remainder to the front
    pub fn retain_from(&mut self, offset: usize) {
        if offset >= self.data.len() {
            self.data.clear();
        } else {
            self.data.advance(offset);
        }
    }

    /// Discard all buffered bytes
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Buffered bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Maximum number of buffered bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// How many times an overflow discarded unparsed data
    pub fn resets(&self) -> u64 {
        self.resets
    }
}

impl Default for RawBuffer {
    fn default() -> Self {
        Self::new(BUFFER_CAPACITY)
    }
}

/// Stateless sentence scanner
#[derive(Debug, Clone, Copy, Default)]
pub struct SentenceFramer;

impl SentenceFramer {
    /// Whether `buf` is large enough to hold a sentence worth decoding
    pub fn worth_scanning(buf: &[u8]) -> bool {
        buf.len() >= MIN_PROCESS_LENGTH
    }

    /// Scan `buf` newest-first.
    ///
    /// The returned iterator yields candidate sentence spans, each starting
    /// at `$` and ending just past its line feed. [`Frames::tail`] reports
    /// the start of the trailing unterminated sentence, if any.
    pub fn scan(buf: &[u8]) -> Frames<'_> {
        Frames {
            buf,
            cursor: buf.len(),
            tail: trailing_sentence(buf),
        }
    }
}

/// Start of the newest sentence when it has not been terminated yet and
/// could still become a valid sentence.
fn trailing_sentence(buf: &[u8]) -> Option<usize> {
    let start = buf.iter().rposition(|&b| b == SENTENCE_START)?;
    let rest = &buf[start..];

    if rest.contains(&SENTENCE_END) || rest.len() > MAX_SENTENCE_LENGTH {
        None
    } else {
        Some(start)
    }
}

/// Newest-first iterator over candidate sentence spans
#[derive(Debug)]
pub struct Frames<'a> {
    buf: &'a [u8],
    /// Exclusive upper bound for the next `$` search; a sentence's line feed
    /// must also come before it.
    cursor: usize,
    tail: Option<usize>,
}

impl Frames<'_> {
    /// Offset of the unterminated trailing sentence to keep for the next pass
    pub fn tail(&self) -> Option<usize> {
        self.tail
    }
}

impl Iterator for Frames<'_> {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.cursor > 0 {
            let start = self.buf[..self.cursor]
                .iter()
                .rposition(|&b| b == SENTENCE_START)?;
            let limit = self.cursor;
            self.cursor = start;

            let Some(newline) = self.buf[start..limit]
                .iter()
                .position(|&b| b == SENTENCE_END)
                .map(|i| start + i)
            else {
                // Unterminated, or its line feed belongs to a later sentence
                continue;
            };

            if newline - start > MAX_SENTENCE_LENGTH {
                continue;
            }

            if !self.buf[start..newline].contains(&DELIMITER) {
                continue;
            }

            return Some(start..newline + 1);
        }

        None
    }
}
