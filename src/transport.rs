//! One-shot HTTP/1.1 client connection over Tokio TCP.
//!
//! A [`Connection`] carries exactly one request/response exchange: connect,
//! write the request, read the response head, then pull decoded body bytes
//! until the body ends. Nothing is pooled or reused.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::config::Endpoint;
use crate::http::{BodyDecoder, BodyError, Request, ResponseError, ResponseHead};

/// Largest response head we will buffer before giving up (64 KiB).
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// Errors produced while talking to the server at the HTTP level.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed response head: {0}")]
    Head(#[from] ResponseError),

    #[error("malformed response body: {0}")]
    Body(#[from] BodyError),

    #[error("response head exceeds {max} bytes")]
    HeadTooLarge { max: usize },

    #[error("connection closed before a response was received")]
    ClosedBeforeHead,

    #[error("response body requested before the head was read")]
    HeadNotRead,
}

/// A single client-side HTTP exchange.
pub struct Connection {
    stream: TcpStream,
    peer: String,
    buf: BytesMut,
    decoder: Option<BodyDecoder>,
    eof: bool,
}

impl Connection {
    /// Opens a fresh TCP connection to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] if the address cannot be resolved
    /// or the server refuses the connection.
    pub async fn open(endpoint: &Endpoint) -> Result<Self, TransportError> {
        let peer = endpoint.to_string();
        let stream = TcpStream::connect((endpoint.host(), endpoint.port()))
            .await
            .map_err(|e| TransportError::Connect {
                addr: peer.clone(),
                source: e,
            })?;

        debug!(peer = %peer, "connection established");
        Ok(Self {
            stream,
            peer,
            buf: BytesMut::with_capacity(INITIAL_BUF_SIZE),
            decoder: None,
            eof: false,
        })
    }

    /// Writes `request` in full and flushes it.
    pub async fn send(&mut self, request: Request) -> Result<(), TransportError> {
        debug!(
            peer = %self.peer,
            method = %request.method(),
            path = %request.path(),
            "sending request"
        );
        self.stream.write_all(&request.into_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads until a complete response head has been received.
    ///
    /// Any body bytes that arrived with the head stay buffered for
    /// [`next_body_bytes`](Self::next_body_bytes).
    pub async fn read_head(&mut self) -> Result<ResponseHead, TransportError> {
        loop {
            match ResponseHead::parse(&self.buf) {
                Ok((head, body_offset)) => {
                    self.buf.advance(body_offset);
                    self.decoder = Some(BodyDecoder::for_head(&head));
                    debug!(peer = %self.peer, status = %head.status(), "response head received");
                    return Ok(head);
                }
                Err(ResponseError::Incomplete) => {}
                Err(e) => return Err(e.into()),
            }

            if self.buf.len() > MAX_HEAD_SIZE {
                return Err(TransportError::HeadTooLarge { max: MAX_HEAD_SIZE });
            }

            if self.stream.read_buf(&mut self.buf).await? == 0 {
                return Err(TransportError::ClosedBeforeHead);
            }
        }
    }

    /// Returns the next run of decoded body bytes, or `None` at end of body.
    ///
    /// Bytes are handed out as soon as they are framed; this never waits for
    /// more of the body than it has to.
    ///
    /// # Errors
    ///
    /// [`TransportError::Body`] wrapping [`BodyError::UnexpectedEof`] when the
    /// server closes the connection while the framing still expects bytes.
    pub async fn next_body_bytes(&mut self) -> Result<Option<Bytes>, TransportError> {
        let decoder = self.decoder.as_mut().ok_or(TransportError::HeadNotRead)?;

        loop {
            if let Some(bytes) = decoder.decode(&mut self.buf)? {
                trace!(peer = %self.peer, len = bytes.len(), "body bytes");
                return Ok(Some(bytes));
            }
            if decoder.is_complete() {
                return Ok(None);
            }
            if self.eof {
                decoder.finish()?;
                return Ok(None);
            }
            if self.stream.read_buf(&mut self.buf).await? == 0 {
                debug!(peer = %self.peer, "connection closed by server");
                self.eof = true;
            }
        }
    }

    /// Collects the remaining body, keeping at most `limit` bytes.
    ///
    /// Used for error responses, whose bodies are short diagnostic messages.
    pub async fn read_body(&mut self, limit: usize) -> Result<Bytes, TransportError> {
        let mut body = BytesMut::new();
        while let Some(bytes) = self.next_body_bytes().await? {
            let room = limit.saturating_sub(body.len());
            body.extend_from_slice(&bytes[..bytes.len().min(room)]);
        }
        Ok(body.freeze())
    }
}
