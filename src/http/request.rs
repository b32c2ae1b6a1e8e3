//! Outgoing HTTP/1.1 request builder.
//!
//! Provides a fluent builder API for constructing requests and serializing
//! them to a byte buffer for transmission over TCP.

use bytes::{BufMut, BytesMut};
use serde::Serialize;

use super::{Headers, Method};

/// An HTTP/1.1 request, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use ollama_prompt::http::{Method, Request};
///
/// let request = Request::new(Method::Post, "/api/generate")
///     .header("Host", "127.0.0.1:11434")
///     .body(r#"{"model":"llama3.1"}"#);
///
/// let bytes = request.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("POST /api/generate HTTP/1.1\r\n"));
/// assert!(text.contains("Content-Length: 20\r\n"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    headers: Headers,
    body: Vec<u8>,
}

impl Request {
    /// Creates a new request for `path` with an empty body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Appends a request header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the request body from a string.
    ///
    /// The `Content-Length` header is written automatically by [`into_bytes`](Self::into_bytes).
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self
    }

    /// Serializes `value` as the JSON body and sets `Content-Type: application/json`.
    ///
    /// # Errors
    ///
    /// Returns the [`serde_json::Error`] if `value` cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, serde_json::Error> {
        self.body = serde_json::to_vec(value)?;
        if !self.headers.contains("content-type") {
            self.headers.insert("Content-Type", "application/json");
        }
        Ok(self)
    }

    /// Returns the request method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Returns the request target path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Serializes the request into a `BytesMut` buffer using HTTP/1.1 wire format.
    ///
    /// Automatically adds:
    /// - `Connection: close`, since a connection carries exactly one request.
    /// - `Content-Length: <n>` (always written, even for an empty body).
    pub fn into_bytes(mut self) -> BytesMut {
        let content_length = self.body.len();
        self.headers.insert("Connection", "close");

        let estimated_size = 64 + self.path.len() + self.headers.len() * 48 + content_length;
        let mut buf = BytesMut::with_capacity(estimated_size);

        // Request line
        buf.put(format!("{} {} HTTP/1.1\r\n", self.method, self.path).as_bytes());

        buf.put(self.headers.to_string().as_bytes());

        // Content-Length is always the last header before the blank line
        buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());

        buf.put(&b"\r\n"[..]);

        if !self.body.is_empty() {
            buf.put(self.body.as_slice());
        }

        buf
    }
}
