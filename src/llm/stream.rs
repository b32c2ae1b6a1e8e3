//! NDJSON de-framing of the `/api/generate` stream.

use bytes::BytesMut;
use tracing::trace;

use super::{GenerateChunk, PromptError};
use crate::transport::Connection;

/// Longest partial line buffered while waiting for its newline (1 MiB).
pub const MAX_LINE_LEN: usize = 1024 * 1024;

/// Splits a byte stream into `\n`-terminated lines.
///
/// Bytes are buffered until a newline arrives, so multi-byte UTF-8 sequences
/// split across reads are reassembled before anything is decoded.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: BytesMut,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Number of bytes buffered that do not yet form a complete line.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Returns the next complete line without its terminator (`\n` or `\r\n`).
    pub fn next_line(&mut self) -> Option<BytesMut> {
        let pos = self.pending.iter().position(|b| *b == b'\n')?;
        let mut line = self.pending.split_to(pos + 1);
        line.truncate(pos);
        if line.last() == Some(&b'\r') {
            line.truncate(pos - 1);
        }
        Some(line)
    }

    /// Returns whatever is left once the input has ended, if it is not blank.
    pub fn finish(&mut self) -> Option<BytesMut> {
        let rest = self.pending.split();
        if rest.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(rest)
        }
    }
}

/// A lazy, single-use sequence of [`GenerateChunk`]s read off one connection.
pub struct GenerateStream {
    conn: Connection,
    lines: LineSplitter,
    body_done: bool,
}

impl GenerateStream {
    /// Wraps a connection whose successful response head has already been read.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            lines: LineSplitter::new(),
            body_done: false,
        }
    }

    /// Reads until the next chunk is available.
    ///
    /// Returns `Ok(None)` once the body has ended and every line is consumed.
    pub async fn next_chunk(&mut self) -> Result<Option<GenerateChunk>, PromptError> {
        loop {
            if let Some(line) = self.lines.next_line() {
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                return parse_chunk(&line).map(Some);
            }

            if self.lines.pending_len() > MAX_LINE_LEN {
                return Err(PromptError::LineTooLong { max: MAX_LINE_LEN });
            }

            if self.body_done {
                return match self.lines.finish() {
                    Some(tail) => parse_chunk(&tail).map(Some),
                    None => Ok(None),
                };
            }

            match self.conn.next_body_bytes().await? {
                Some(bytes) => self.lines.push(&bytes),
                None => self.body_done = true,
            }
        }
    }
}

/// Longest slice of an offending line quoted back in a decode error.
const MAX_QUOTED_LINE: usize = 200;

fn parse_chunk(line: &[u8]) -> Result<GenerateChunk, PromptError> {
    trace!(len = line.len(), "stream line");
    serde_json::from_slice(line).map_err(|source| {
        let shown = &line[..line.len().min(MAX_QUOTED_LINE)];
        PromptError::Decode {
            line: String::from_utf8_lossy(shown).into_owned(),
            source,
        }
    })
}
