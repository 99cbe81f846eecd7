use std::io;
use std::mem;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

/// Longest line, terminator included, that is ever dispatched as a command.
pub const MAX_LINE_LENGTH: usize = 1024;

#[derive(Debug, PartialEq, Eq)]
pub enum Line {
    /// A line of at most the configured length, ending in `\n`.
    Complete(Vec<u8>),
    /// Part of a line that overran the limit, or a trailing fragment cut off
    /// by EOF. Kept for the transcript, never interpreted.
    Overflow(Vec<u8>),
}

impl Line {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Line::Complete(bytes) | Line::Overflow(bytes) => bytes,
        }
    }
}

/// Splits a byte stream into lines without ever buffering more than
/// `max_len` bytes per call.
///
/// Bytes of an unfinished line live in the reader, not in the future, so
/// `next_line` can be dropped by a timeout and resumed later without loss.
pub struct LineReader<R> {
    inner: BufReader<R>,
    max_len: usize,
    pending: Vec<u8>,
    continuing: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R, max_len: usize) -> Self {
        Self {
            inner: BufReader::new(inner),
            max_len: max_len.max(1),
            pending: Vec::new(),
            continuing: false,
        }
    }

    /// `Ok(None)` on a clean EOF.
    pub async fn next_line(&mut self) -> io::Result<Option<Line>> {
        let limit = self.max_len.saturating_sub(self.pending.len()) as u64;
        let n = if limit == 0 {
            0
        } else {
            (&mut self.inner)
                .take(limit)
                .read_until(b'\n', &mut self.pending)
                .await?
        };
        if n == 0 && self.pending.is_empty() {
            return Ok(None);
        }

        let buf = mem::take(&mut self.pending);
        let terminated = buf.last() == Some(&b'\n');
        let tail_of_long_line = self.continuing;
        self.continuing = !terminated;

        if terminated && !tail_of_long_line {
            Ok(Some(Line::Complete(buf)))
        } else {
            Ok(Some(Line::Overflow(buf)))
        }
    }

    /// Hands out the unterminated bytes of an interrupted read. Whatever
    /// arrives afterwards is treated as the tail of that line.
    pub fn take_pending(&mut self) -> Option<Line> {
        if self.pending.is_empty() {
            return None;
        }
        self.continuing = true;
        Some(Line::Overflow(mem::take(&mut self.pending)))
    }
}
