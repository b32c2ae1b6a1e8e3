//! `ollama-prompt`: stream a completion from a local Ollama server.

use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::{Result, anyhow};
use clap::Parser;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use ollama_prompt::{
    ClientConfig, DEFAULT_MODEL, Endpoint, FragmentSink, GenerateOptions, PromptClient, PromptError,
    WriterSink,
};

/// Prompt used when none is given on the command line.
const EXAMPLE_PROMPT: &str =
    "Explain what is quantum computing in simple terms like I'm 5 years old.";

/// CLI arguments for ollama-prompt
#[derive(Parser, Debug)]
#[command(name = "ollama-prompt")]
#[command(author, version, about = "Stream a completion from a local Ollama server")]
#[command(long_about = r#"
Sends a prompt to a locally running Ollama server and prints the answer as it
is generated, followed by the complete response.

Example:
  ollama-prompt "Why is the sky blue?"
  ollama-prompt -m mistral --temperature 0.2 "Summarise RFC 9112 in one line"
  OLLAMA_HOST=http://gpu-box:11434 ollama-prompt "2+2="
"#)]
struct Cli {
    /// The prompt to send (a built-in example prompt is used when omitted)
    prompt: Option<String>,

    /// Model to generate with
    #[arg(short, long, value_name = "MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Ollama server address
    #[arg(long, value_name = "HOST[:PORT]", env = "OLLAMA_HOST", default_value = "127.0.0.1:11434")]
    host: Endpoint,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Nucleus sampling threshold
    #[arg(long)]
    top_p: Option<f32>,

    /// Context window size in tokens
    #[arg(long)]
    num_ctx: Option<u32>,

    /// Only print the streamed answer
    #[arg(short, long)]
    quiet: bool,

    /// Verbosity level (-v = info, -vv = debug, -vvv = trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn prompt(&self) -> &str {
        self.prompt.as_deref().unwrap_or(EXAMPLE_PROMPT)
    }

    fn options(&self) -> GenerateOptions {
        GenerateOptions {
            temperature: self.temperature,
            top_p: self.top_p,
            num_ctx: self.num_ctx,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let config = ClientConfig::default()
        .with_endpoint(cli.host.clone())
        .with_options(cli.options());
    let client = PromptClient::new(config);

    debug!(endpoint = %cli.host, model = %cli.model, "starting");

    match run(&cli, &client, &mut io::stdout()).await {
        Ok(code) => Ok(code),
        Err(err) => {
            error!(error = %err, "failed to write to stdout");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Streams fragments to the console and remembers whether any were shown.
struct Console<W> {
    sink: WriterSink<W>,
    streamed: bool,
}

impl<W: Write> FragmentSink for Console<W> {
    fn on_fragment(&mut self, fragment: &str) -> io::Result<()> {
        self.streamed = true;
        self.sink.on_fragment(fragment)
    }
}

/// Sends the prompt and renders the exchange to `out`.
///
/// Only failures to write to `out` itself come back as `Err`.
async fn run<W: Write>(cli: &Cli, client: &PromptClient, out: &mut W) -> io::Result<ExitCode> {
    let prompt = cli.prompt();

    if !cli.quiet {
        let model = client.resolve_model(&cli.model);
        writeln!(out, "\nSending prompt to {model}: {prompt}\n")?;
        writeln!(out, "Response:")?;
    }

    let mut console = Console {
        sink: WriterSink::new(&mut *out),
        streamed: false,
    };
    let outcome = client.send(prompt, &cli.model, &mut console).await;
    let streamed = console.streamed;

    match outcome {
        Ok(text) => {
            writeln!(out)?;
            if !cli.quiet {
                writeln!(out, "\nComplete response:\n{text}")?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(PromptError::Sink(err)) => {
            error!(error = %err, "failed to write response to stdout");
            Ok(ExitCode::FAILURE)
        }
        Err(err) => {
            if streamed {
                writeln!(out)?;
            }
            writeln!(out, "{}", err.into_reply())?;
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Logs go to stderr so stdout carries only the response.
fn init_tracing(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Stdout after the reading end of the pipe has gone away.
    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::ErrorKind::BrokenPipe.into())
        }
    }

    fn client_for(cli: &Cli) -> PromptClient {
        PromptClient::new(ClientConfig::default().with_endpoint(cli.host.clone()))
    }

    /// An address nothing is listening on.
    async fn dead_endpoint() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        addr
    }

    /// Serves one streamed fragment, then drops the connection mid-stream.
    async fn truncating_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            // The JSON body is the last thing on the wire.
            while !request.ends_with(b"}") {
                let mut buf = [0u8; 1024];
                let n = stream.read(&mut buf).await.unwrap();
                assert!(n > 0);
                request.extend_from_slice(&buf[..n]);
            }
            let line = "{\"response\":\"Hel\",\"done\":false}\n";
            let wire = format!(
                "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n{:x}\r\n{line}\r\n",
                line.len()
            );
            stream.write_all(wire.as_bytes()).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn closed_stdout_is_reported_not_panicked() {
        let host = dead_endpoint().await;
        let loud = vec!["ollama-prompt", "--host", &host, "hi"];
        let quiet = vec!["ollama-prompt", "-q", "--host", &host, "hi"];
        for args in [loud, quiet] {
            let cli = Cli::try_parse_from(args).unwrap();
            let result = run(&cli, &client_for(&cli), &mut ClosedPipe).await;
            assert_eq!(result.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
        }
    }

    #[tokio::test]
    async fn unreachable_server_prints_error_reply() {
        let host = dead_endpoint().await;
        let cli = Cli::try_parse_from(["ollama-prompt", "-q", "--host", &host, "hi"]).unwrap();
        let mut out = Vec::new();

        let code = run(&cli, &client_for(&cli), &mut out).await.unwrap();

        assert_eq!(code, ExitCode::FAILURE);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with(ollama_prompt::ERROR_PREFIX), "{text}");
    }

    #[tokio::test]
    async fn error_after_partial_output_starts_on_new_line() {
        let host = truncating_server().await;
        let cli = Cli::try_parse_from(["ollama-prompt", "-q", "--host", &host, "hi"]).unwrap();
        let mut out = Vec::new();

        let code = run(&cli, &client_for(&cli), &mut out).await.unwrap();

        assert_eq!(code, ExitCode::FAILURE);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Hel\nError communicating with Ollama: \
             stream ended before the model finished responding\n"
        );
    }

    #[tokio::test]
    async fn banner_names_the_model_actually_requested() {
        let host = dead_endpoint().await;
        let cli =
            Cli::try_parse_from(["ollama-prompt", "--model", "", "--host", &host, "hi"]).unwrap();
        let mut out = Vec::new();

        run(&cli, &client_for(&cli), &mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(
            text.starts_with("\nSending prompt to llama3.1: hi\n\nResponse:\n"),
            "{text}"
        );
    }


    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn model_defaults_when_omitted() {
        let cli = Cli::try_parse_from(["ollama-prompt", "2+2="]).unwrap();
        assert_eq!(cli.prompt.as_deref(), Some("2+2="));
        assert_eq!(cli.model, "llama3.1");
        assert!(cli.options().is_empty());
    }

    #[test]
    fn prompt_is_optional() {
        let cli = Cli::try_parse_from(["ollama-prompt", "-q"]).unwrap();
        assert!(cli.prompt.is_none());
        assert!(cli.quiet);
    }

    #[test]
    fn flags_map_onto_options() {
        let cli = Cli::try_parse_from([
            "ollama-prompt",
            "--model",
            "mistral",
            "--host",
            "http://[::1]:9000",
            "--temperature",
            "0.7",
            "--num-ctx",
            "4096",
            "hi",
        ])
        .unwrap();
        assert_eq!(cli.model, "mistral");
        assert_eq!(cli.host, Endpoint::new("::1", 9000));
        assert_eq!(
            cli.options(),
            GenerateOptions::default().temperature(0.7).num_ctx(4096)
        );
    }

    #[test]
    fn https_host_is_rejected() {
        let err = Cli::try_parse_from(["ollama-prompt", "--host", "https://remote", "hi"]);
        assert!(err.is_err());
    }
}
