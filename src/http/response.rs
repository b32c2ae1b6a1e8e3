//! HTTP/1.1 response head parsing using the [`httparse`] crate.

use thiserror::Error;

use super::{Headers, StatusCode};

/// Errors that can occur while parsing an HTTP/1.1 response head.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response head is incomplete; more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// The status line and headers of an HTTP/1.1 response.
///
/// Created by [`ResponseHead::parse`] from a raw byte buffer. The body is
/// not part of the head; it is framed separately by a
/// [`BodyDecoder`](super::BodyDecoder).
///
/// # Examples
///
/// ```
/// use ollama_prompt::http::ResponseHead;
///
/// let raw = b"HTTP/1.1 200 OK\r\nContent-Type: application/x-ndjson\r\n\r\n{}";
/// let (head, offset) = ResponseHead::parse(raw).unwrap();
///
/// assert!(head.status().is_success());
/// assert_eq!(&raw[offset..], b"{}");
/// ```
#[derive(Debug)]
pub struct ResponseHead {
    status: StatusCode,
    headers: Headers,
}

impl ResponseHead {
    /// Maximum number of headers we accept per response.
    const MAX_HEADERS: usize = 64;

    /// Parse a raw HTTP/1.1 response head from a byte slice.
    ///
    /// Returns the parsed head and the byte offset at which the body begins
    /// in `buf` (i.e. immediately after the `\r\n\r\n` header terminator).
    ///
    /// # Errors
    ///
    /// - [`ResponseError::Incomplete`]: more data is needed to complete the head.
    /// - [`ResponseError::Parse`]: the data is malformed and cannot be parsed.
    /// - [`ResponseError::MissingField`]: the status code is absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), ResponseError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_res = httparse::Response::new(&mut headers);

        let body_offset = match raw_res.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(ResponseError::Incomplete),
        };

        let status = raw_res
            .code
            .map(StatusCode::new)
            .ok_or(ResponseError::MissingField { field: "status" })?;

        let mut header_map = Headers::with_capacity(raw_res.headers.len());
        for header in raw_res.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        Ok((
            Self {
                status,
                headers: header_map,
            },
            body_offset,
        ))
    }

    /// Returns the response status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }
}
