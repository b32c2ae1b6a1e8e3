use thiserror::Error;

use crate::http::{BodyError, StatusCode};
use crate::transport::TransportError;

/// Prefix of the text form of every failed generation.
pub const ERROR_PREFIX: &str = "Error communicating with Ollama: ";

/// Everything that can go wrong between sending a prompt and receiving the
/// final `done` chunk.
#[derive(Debug, Error)]
pub enum PromptError {
    #[error(transparent)]
    Transport(TransportError),

    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("server returned {status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error("malformed stream line {line:?}: {source}")]
    Decode {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("model reported an error: {0}")]
    Model(String),

    #[error("stream line exceeds {max} bytes without a newline")]
    LineTooLong { max: usize },

    #[error("stream ended before the model finished responding")]
    Interrupted,

    #[error("failed to write fragment to output: {0}")]
    Sink(#[source] std::io::Error),
}

impl PromptError {
    /// Renders the error the way callers that only deal in text expect it.
    ///
    /// ```
    /// use ollama_prompt::llm::PromptError;
    ///
    /// let reply = PromptError::Interrupted.into_reply();
    /// assert!(reply.starts_with("Error communicating with Ollama: "));
    /// ```
    pub fn into_reply(self) -> String {
        format!("{ERROR_PREFIX}{self}")
    }
}

impl From<TransportError> for PromptError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Body(BodyError::UnexpectedEof) => Self::Interrupted,
            other => Self::Transport(other),
        }
    }
}
