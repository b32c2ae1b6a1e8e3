//! Streaming completions from a local Ollama server.
//!
//! [`PromptClient`] sends one prompt to `POST /api/generate`, forwards every
//! streamed fragment to a [`FragmentSink`] the moment it is decoded, and
//! returns the concatenated text once the server reports `done`.
//!
//! ```rust,no_run
//! use ollama_prompt::llm::{PromptClient, StdoutSink};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = PromptClient::default();
//!     let mut sink = StdoutSink::stdout();
//!     // Always text: either the answer or "Error communicating with Ollama: ...".
//!     let reply = client.query("Why is the sky blue?", "llama3.1", &mut sink).await;
//!     println!("\n{reply}");
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::http::{Method, Request};
use crate::transport::Connection;

pub mod error;
pub mod sink;
pub mod stream;

pub use error::{ERROR_PREFIX, PromptError};
pub use sink::{BufferSink, FragmentSink, StdoutSink, WriterSink};
pub use stream::{GenerateStream, LineSplitter, MAX_LINE_LEN};

/// Path of the completion endpoint.
pub const GENERATE_PATH: &str = "/api/generate";

/// Cap on how much of an error response body is kept for the message.
const MAX_ERROR_BODY: usize = 16 * 1024;

/// Sampling parameters forwarded in the request's `options` object.
///
/// Unset fields are left out so the server's model defaults apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
}

impl GenerateOptions {
    #[must_use]
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    #[must_use]
    pub fn num_ctx(mut self, num_ctx: u32) -> Self {
        self.num_ctx = Some(num_ctx);
        self
    }

    /// `true` when no option is set and the object can be omitted.
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.top_p.is_none() && self.num_ctx.is_none()
    }
}

/// Body of `POST /api/generate`.
#[derive(Debug, Serialize)]
pub struct GenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<&'a GenerateOptions>,
}

/// One NDJSON line of the streamed response.
///
/// Only the fields this client acts on are modelled; the rest are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateChunk {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
    pub error: Option<String>,
    pub done_reason: Option<String>,
    pub total_duration: Option<u64>,
    pub load_duration: Option<u64>,
    pub prompt_eval_count: Option<u64>,
    pub eval_count: Option<u64>,
    pub eval_duration: Option<u64>,
}

/// Counters reported on the final chunk of a generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationStats {
    pub done_reason: Option<String>,
    pub total_duration: Option<Duration>,
    pub load_duration: Option<Duration>,
    pub prompt_eval_count: Option<u64>,
    pub eval_count: Option<u64>,
    pub eval_duration: Option<Duration>,
}

impl GenerationStats {
    fn from_final_chunk(chunk: &GenerateChunk) -> Self {
        Self {
            done_reason: chunk.done_reason.clone(),
            total_duration: chunk.total_duration.map(Duration::from_nanos),
            load_duration: chunk.load_duration.map(Duration::from_nanos),
            prompt_eval_count: chunk.prompt_eval_count,
            eval_count: chunk.eval_count,
            eval_duration: chunk.eval_duration.map(Duration::from_nanos),
        }
    }

    /// Generation throughput, when the server reported both count and duration.
    pub fn tokens_per_second(&self) -> Option<f64> {
        let count = self.eval_count?;
        let secs = self.eval_duration?.as_secs_f64();
        (secs > 0.0).then(|| count as f64 / secs)
    }
}

/// The result of a finished generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Every fragment, concatenated in arrival order.
    pub text: String,
    pub stats: GenerationStats,
}

/// Client for a local Ollama server.
///
/// Holds only configuration; every call opens its own connection, so a
/// client can be shared freely between independent calls.
#[derive(Debug, Clone, Default)]
pub struct PromptClient {
    config: ClientConfig,
}

impl PromptClient {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Streams a completion and returns the full text.
    ///
    /// Each fragment reaches `sink` before the next one is read. An empty or
    /// whitespace-only `model` is replaced by the configured default; the
    /// prompt is sent as given, even when empty.
    ///
    /// # Errors
    ///
    /// Any [`PromptError`]: unreachable server, HTTP or framing failure,
    /// non-2xx status, malformed stream line, an `error` reported by the
    /// model, the stream ending before `done`, or the sink failing.
    pub async fn send<S>(&self, prompt: &str, model: &str, sink: &mut S) -> Result<String, PromptError>
    where
        S: FragmentSink + ?Sized,
    {
        self.generate(prompt, model, sink).await.map(|c| c.text)
    }

    /// Like [`send`](Self::send) but folds failures into text prefixed with
    /// [`ERROR_PREFIX`], so the caller always gets a string back.
    pub async fn query<S>(&self, prompt: &str, model: &str, sink: &mut S) -> String
    where
        S: FragmentSink + ?Sized,
    {
        match self.send(prompt, model, sink).await {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "generation failed");
                err.into_reply()
            }
        }
    }

    /// Streams a completion and returns the text along with the server's
    /// final statistics.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn generate<S>(
        &self,
        prompt: &str,
        model: &str,
        sink: &mut S,
    ) -> Result<Completion, PromptError>
    where
        S: FragmentSink + ?Sized,
    {
        let model = self.resolve_model(model);
        let options = self.config.options();
        let body = GenerateRequest {
            model,
            prompt,
            stream: true,
            options: (!options.is_empty()).then_some(options),
        };

        let mut stream = self.open_stream(&body).await?;
        let mut text = String::new();
        let mut fragments = 0usize;

        while let Some(chunk) = stream.next_chunk().await? {
            if let Some(message) = &chunk.error {
                return Err(PromptError::Model(message.clone()));
            }

            if !chunk.response.is_empty() {
                sink.on_fragment(&chunk.response).map_err(PromptError::Sink)?;
                text.push_str(&chunk.response);
                fragments += 1;
            }

            if chunk.done {
                let stats = GenerationStats::from_final_chunk(&chunk);
                info!(
                    model = %model,
                    fragments,
                    chars = text.len(),
                    done_reason = stats.done_reason.as_deref().unwrap_or("unknown"),
                    eval_count = stats.eval_count.unwrap_or_default(),
                    "generation complete"
                );
                return Ok(Completion { text, stats });
            }
        }

        Err(PromptError::Interrupted)
    }

    /// The model a call with `model` will actually request.
    pub fn resolve_model<'a>(&'a self, model: &'a str) -> &'a str {
        if model.trim().is_empty() {
            self.config.default_model()
        } else {
            model
        }
    }

    /// Connects, submits `body`, and checks the response status.
    async fn open_stream(&self, body: &GenerateRequest<'_>) -> Result<GenerateStream, PromptError> {
        let endpoint = self.config.endpoint();
        let request = Request::new(Method::Post, GENERATE_PATH)
            .header("Host", endpoint.authority())
            .header("Accept", "application/x-ndjson")
            .header("User-Agent", concat!("ollama-prompt/", env!("CARGO_PKG_VERSION")))
            .json(body)
            .map_err(PromptError::Encode)?;

        debug!(endpoint = %endpoint, model = %body.model, "submitting prompt");

        let mut conn = Connection::open(endpoint).await?;
        conn.send(request).await?;
        let head = conn.read_head().await?;

        if !head.status().is_success() {
            let raw = conn.read_body(MAX_ERROR_BODY).await?;
            return Err(PromptError::Status {
                status: head.status(),
                message: error_message(&raw),
            });
        }

        Ok(GenerateStream::new(conn))
    }
}

/// Pulls the server's `{"error": "..."}` message out of an error body,
/// falling back to the raw text.
fn error_message(body: &[u8]) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }

    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(parsed) => parsed.error,
        Err(_) => {
            let text = String::from_utf8_lossy(body).trim().to_owned();
            if text.is_empty() {
                "empty response body".to_owned()
            } else {
                text
            }
        }
    }
}
