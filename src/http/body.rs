//! Incremental HTTP/1.1 response body framing.
//!
//! Bodies arrive in arbitrary TCP-sized pieces. [`BodyDecoder`] consumes
//! whatever has been buffered so far and hands back payload bytes as soon as
//! they are available, which is what lets streamed tokens reach the caller
//! before the server has finished generating.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

use super::ResponseHead;

/// Longest chunk-size or trailer line we are willing to buffer.
const MAX_LINE_LEN: usize = 4096;

/// Errors produced while de-framing a response body.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("invalid chunk size line: {0:?}")]
    InvalidChunkSize(String),

    #[error("chunk size {0:#x} does not fit in memory")]
    ChunkTooLarge(u64),

    #[error("chunk data not followed by CRLF")]
    MissingChunkTerminator,

    #[error("chunk framing line exceeds {max} bytes")]
    LineTooLong { max: usize },

    #[error("connection closed before the response body was complete")]
    UnexpectedEof,
}

/// Position of a chunked decoder within the framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Size,
    Data { remaining: usize },
    DataEnd,
    Trailers,
    Done,
}

/// Body framing selected from a response head.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use ollama_prompt::http::BodyDecoder;
///
/// let mut decoder = BodyDecoder::chunked();
/// let mut buf = BytesMut::from(&b"5\r\nhello\r\n0\r\n\r\n"[..]);
///
/// assert_eq!(decoder.decode(&mut buf).unwrap().as_deref(), Some(&b"hello"[..]));
/// assert_eq!(decoder.decode(&mut buf).unwrap(), None);
/// assert!(decoder.is_complete());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyDecoder {
    /// `Content-Length` framing; counts down the bytes still expected.
    Length { remaining: usize },
    /// `Transfer-Encoding: chunked` framing.
    Chunked(ChunkState),
    /// No framing header: the body runs until the server closes the connection.
    UntilClose,
}

impl BodyDecoder {
    /// Picks the framing for `head` following RFC 9112 §6.3.
    ///
    /// `chunked` wins over `Content-Length`; 204 and 304 responses never carry
    /// a body.
    pub fn for_head(head: &ResponseHead) -> Self {
        let status = head.status().as_u16();
        if status == 204 || status == 304 || (100..200).contains(&status) {
            return Self::Length { remaining: 0 };
        }
        if head.headers().is_chunked() {
            return Self::chunked();
        }
        match head.headers().content_length() {
            Some(remaining) => Self::Length { remaining },
            None => Self::UntilClose,
        }
    }

    /// A decoder positioned at the first chunk-size line.
    pub fn chunked() -> Self {
        Self::Chunked(ChunkState::Size)
    }

    /// Returns `true` once the framing says no more body bytes follow.
    ///
    /// A close-delimited body is never complete until EOF; see
    /// [`finish`](Self::finish).
    pub fn is_complete(&self) -> bool {
        match self {
            Self::Length { remaining } => *remaining == 0,
            Self::Chunked(state) => *state == ChunkState::Done,
            Self::UntilClose => false,
        }
    }

    /// Validates that reaching EOF is acceptable in the current state.
    ///
    /// # Errors
    ///
    /// [`BodyError::UnexpectedEof`] if the framing still expects bytes.
    pub fn finish(&self) -> Result<(), BodyError> {
        if matches!(self, Self::UntilClose) || self.is_complete() {
            Ok(())
        } else {
            Err(BodyError::UnexpectedEof)
        }
    }

    /// Consumes framing from `buf` and returns the next run of payload bytes.
    ///
    /// Returns `Ok(None)` when `buf` holds no further payload yet (read more
    /// from the socket) or when the body is complete. Payload bytes are
    /// split off `buf`; bytes past the end of the body are left in place.
    ///
    /// # Errors
    ///
    /// Any [`BodyError`] other than `UnexpectedEof` for malformed chunk framing.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, BodyError> {
        match self {
            Self::Length { remaining } => {
                let n = (*remaining).min(buf.len());
                if n == 0 {
                    return Ok(None);
                }
                *remaining -= n;
                Ok(Some(buf.split_to(n).freeze()))
            }
            Self::UntilClose => {
                if buf.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(buf.split().freeze()))
                }
            }
            Self::Chunked(state) => decode_chunked(state, buf),
        }
    }
}

fn decode_chunked(state: &mut ChunkState, buf: &mut BytesMut) -> Result<Option<Bytes>, BodyError> {
    loop {
        match *state {
            ChunkState::Size => {
                let Some(size) = take_chunk_size(buf)? else {
                    return Ok(None);
                };
                *state = if size == 0 {
                    ChunkState::Trailers
                } else {
                    ChunkState::Data { remaining: size }
                };
            }
            ChunkState::Data { remaining } => {
                let n = remaining.min(buf.len());
                if n == 0 {
                    return Ok(None);
                }
                *state = if n == remaining {
                    ChunkState::DataEnd
                } else {
                    ChunkState::Data {
                        remaining: remaining - n,
                    }
                };
                return Ok(Some(buf.split_to(n).freeze()));
            }
            ChunkState::DataEnd => {
                if buf.len() < 2 {
                    return Ok(None);
                }
                if &buf[..2] != b"\r\n" {
                    return Err(BodyError::MissingChunkTerminator);
                }
                buf.advance(2);
                *state = ChunkState::Size;
            }
            ChunkState::Trailers => {
                let Some(line) = take_line(buf)? else {
                    return Ok(None);
                };
                // Trailer fields are ignored; an empty line ends the message.
                if line.is_empty() {
                    *state = ChunkState::Done;
                }
            }
            ChunkState::Done => return Ok(None),
        }
    }
}

/// Splits one CRLF-terminated trailer line off `buf`, without the terminator.
fn take_line(buf: &mut BytesMut) -> Result<Option<BytesMut>, BodyError> {
    match buf.windows(2).position(|w| w == b"\r\n") {
        Some(pos) => {
            let mut line = buf.split_to(pos + 2);
            line.truncate(pos);
            Ok(Some(line))
        }
        None if buf.len() > MAX_LINE_LEN => Err(BodyError::LineTooLong { max: MAX_LINE_LEN }),
        None => Ok(None),
    }
}

/// Consumes one chunk-size line (extensions included) off `buf`.
fn take_chunk_size(buf: &mut BytesMut) -> Result<Option<usize>, BodyError> {
    match httparse::parse_chunk_size(&buf[..]) {
        Ok(httparse::Status::Complete((consumed, size))) => {
            buf.advance(consumed);
            usize::try_from(size)
                .map(Some)
                .map_err(|_| BodyError::ChunkTooLarge(size))
        }
        Ok(httparse::Status::Partial) if buf.len() > MAX_LINE_LEN => {
            Err(BodyError::LineTooLong { max: MAX_LINE_LEN })
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(httparse::InvalidChunkSize) => {
            let end = buf.len().min(32);
            Err(BodyError::InvalidChunkSize(
                String::from_utf8_lossy(&buf[..end]).into_owned(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(decoder: &mut BodyDecoder, buf: &mut BytesMut) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(piece) = decoder.decode(buf).unwrap() {
            out.extend_from_slice(&piece);
        }
        out
    }

    fn drain_once(decoder: &mut BodyDecoder, buf: &mut BytesMut) -> Vec<u8> {
        decoder.decode(buf).unwrap().unwrap().to_vec()
    }

    #[test]
    fn chunked_across_split_reads() {
        let wire = b"7\r\n{\"a\":1}\r\n3;ext=1\r\n\n{}\r\n0\r\nX-Trailer: y\r\n\r\n";
        let mut decoder = BodyDecoder::chunked();
        let mut buf = BytesMut::new();
        let mut out = Vec::new();

        for byte in wire {
            buf.extend_from_slice(&[*byte]);
            out.extend(drain(&mut decoder, &mut buf));
        }

        assert_eq!(out, b"{\"a\":1}\n{}");
        assert!(decoder.is_complete());
        assert!(decoder.finish().is_ok());
        assert!(buf.is_empty());
    }

    #[test]
    fn chunked_leaves_trailing_bytes() {
        let mut decoder = BodyDecoder::chunked();
        let mut buf = BytesMut::from(&b"2\r\nok\r\n0\r\n\r\nHTTP/1.1"[..]);
        assert_eq!(drain(&mut decoder, &mut buf), b"ok");
        assert!(decoder.is_complete());
        assert_eq!(&buf[..], b"HTTP/1.1");
    }

    #[test]
    fn chunked_bad_size() {
        let mut decoder = BodyDecoder::chunked();
        let mut buf = BytesMut::from(&b"zz\r\n"[..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(BodyError::InvalidChunkSize(_))
        ));
    }

    #[test]
    fn chunked_missing_crlf_after_data() {
        let mut decoder = BodyDecoder::chunked();
        let mut buf = BytesMut::from(&b"2\r\nokXX"[..]);
        assert_eq!(drain_once(&mut decoder, &mut buf), b"ok");
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(BodyError::MissingChunkTerminator)
        ));
    }

    #[test]
    fn chunked_eof_mid_body() {
        let mut decoder = BodyDecoder::chunked();
        let mut buf = BytesMut::from(&b"a\r\nhalf"[..]);
        assert_eq!(drain(&mut decoder, &mut buf), b"half");
        assert!(matches!(decoder.finish(), Err(BodyError::UnexpectedEof)));
    }

    #[test]
    fn chunk_size_with_extension_and_uppercase_hex() {
        let mut decoder = BodyDecoder::chunked();
        let mut buf = BytesMut::from(&b"A;name=\"v\"\r\n0123456789\r\n0\r\n\r\n"[..]);
        assert_eq!(drain(&mut decoder, &mut buf), b"0123456789");
        assert!(decoder.is_complete());
    }

    #[test]
    fn chunk_size_overflowing_hex_is_invalid() {
        let mut decoder = BodyDecoder::chunked();
        let mut buf = BytesMut::from(&b"fffffffffffffffff\r\n"[..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(BodyError::InvalidChunkSize(_))
        ));
    }

    #[test]
    fn oversized_size_line() {
        let mut decoder = BodyDecoder::chunked();
        let mut line = b"1;".to_vec();
        line.extend(std::iter::repeat_n(b'x', MAX_LINE_LEN));
        let mut buf = BytesMut::from(line.as_slice());
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(BodyError::LineTooLong { .. })
        ));
    }

    #[test]
    fn content_length_stops_at_boundary() {
        let mut decoder = BodyDecoder::Length { remaining: 5 };
        let mut buf = BytesMut::from(&b"hello world"[..]);
        assert_eq!(drain(&mut decoder, &mut buf), b"hello");
        assert!(decoder.is_complete());
        assert_eq!(&buf[..], b" world");
    }

    #[test]
    fn until_close_is_only_finished_by_eof() {
        let mut decoder = BodyDecoder::UntilClose;
        let mut buf = BytesMut::from(&b"{\"done\":true}\n"[..]);
        assert_eq!(drain(&mut decoder, &mut buf), b"{\"done\":true}\n");
        assert!(!decoder.is_complete());
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn framing_from_head() {
        let (head, _) =
            ResponseHead::parse(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n").unwrap();
        assert_eq!(BodyDecoder::for_head(&head), BodyDecoder::chunked());

        let (head, _) =
            ResponseHead::parse(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 12\r\n\r\n").unwrap();
        assert_eq!(
            BodyDecoder::for_head(&head),
            BodyDecoder::Length { remaining: 12 }
        );

        let (head, _) = ResponseHead::parse(b"HTTP/1.0 200 OK\r\n\r\n").unwrap();
        assert_eq!(BodyDecoder::for_head(&head), BodyDecoder::UntilClose);

        let (head, _) = ResponseHead::parse(b"HTTP/1.1 204 No Content\r\n\r\n").unwrap();
        assert!(BodyDecoder::for_head(&head).is_complete());
    }
}
