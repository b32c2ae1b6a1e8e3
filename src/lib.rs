//! # ollama-prompt
//!
//! Send a prompt to a locally running Ollama server and stream the answer
//! back as it is generated, over a from-scratch async HTTP/1.1 client.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ollama_prompt::{BufferSink, PromptClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = PromptClient::default();
//!     let mut sink = BufferSink::new();
//!     let text = client.send("2+2=", "llama3.1", &mut sink).await?;
//!     assert_eq!(text, sink.concat());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod http;
pub mod llm;
pub mod transport;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::{ClientConfig, DEFAULT_MODEL, Endpoint};
pub use llm::{
    BufferSink, Completion, ERROR_PREFIX, FragmentSink, GenerateOptions, PromptClient,
    PromptError, StdoutSink, WriterSink,
};
