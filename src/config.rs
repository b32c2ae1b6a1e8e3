//! Client configuration: where the Ollama server lives and what to ask it for.
//!
//! Nothing here reads the environment. The binary maps `OLLAMA_HOST` and its
//! flags onto these types; library callers build them directly.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::llm::GenerateOptions;

/// Port Ollama listens on out of the box.
pub const DEFAULT_PORT: u16 = 11434;

/// Host Ollama binds to out of the box.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Model requested when the caller does not name one.
pub const DEFAULT_MODEL: &str = "llama3.1";

/// Errors produced while parsing an [`Endpoint`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("endpoint is empty")]
    Empty,

    #[error("unsupported scheme {0:?}; only plain http is supported")]
    UnsupportedScheme(String),

    #[error("invalid port {0:?}")]
    InvalidPort(String),

    #[error("unterminated IPv6 literal in {0:?}")]
    UnterminatedIpv6(String),

    #[error("IPv6 literal {0:?} must be enclosed in brackets")]
    Ipv6NeedsBrackets(String),
}

/// A `host:port` pair identifying the inference server.
///
/// Parses the same shapes `OLLAMA_HOST` commonly takes.
///
/// # Examples
///
/// ```
/// use ollama_prompt::config::Endpoint;
///
/// let ep: Endpoint = "http://gpu-box:8080/".parse().unwrap();
/// assert_eq!(ep.host(), "gpu-box");
/// assert_eq!(ep.port(), 8080);
///
/// let ep: Endpoint = "localhost".parse().unwrap();
/// assert_eq!(ep.to_string(), "localhost:11434");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates an endpoint from its parts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the host name or IP literal (IPv6 without brackets).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the value for the `Host` request header.
    pub fn authority(&self) -> String {
        self.to_string()
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut rest = s.trim();

        if let Some((scheme, after)) = rest.split_once("://") {
            if !scheme.eq_ignore_ascii_case("http") {
                return Err(EndpointError::UnsupportedScheme(scheme.to_owned()));
            }
            rest = after;
        }

        // Drop any path; only the authority matters.
        let authority = rest.split('/').next().unwrap_or_default();
        if authority.is_empty() {
            return Err(EndpointError::Empty);
        }

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| EndpointError::UnterminatedIpv6(authority.to_owned()))?;
            let port = match after {
                "" => None,
                _ => Some(
                    after
                        .strip_prefix(':')
                        .ok_or_else(|| EndpointError::InvalidPort(after.to_owned()))?,
                ),
            };
            (host, port)
        } else if authority.matches(':').count() > 1 {
            return Err(EndpointError::Ipv6NeedsBrackets(authority.to_owned()));
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };

        let port = match port {
            Some(p) => p
                .parse()
                .map_err(|_| EndpointError::InvalidPort(p.to_owned()))?,
            None => DEFAULT_PORT,
        };

        // `:11434` alone means "default host, this port".
        let host = if host.is_empty() { DEFAULT_HOST } else { host };

        Ok(Self::new(host, port))
    }
}

/// Everything a [`PromptClient`](crate::llm::PromptClient) needs besides the
/// prompt itself.
///
/// # Examples
///
/// ```
/// use ollama_prompt::config::{ClientConfig, Endpoint};
/// use ollama_prompt::llm::GenerateOptions;
///
/// let config = ClientConfig::default()
///     .with_endpoint(Endpoint::new("10.0.0.7", 11434))
///     .with_options(GenerateOptions::default().temperature(0.2));
///
/// assert_eq!(config.default_model(), "llama3.1");
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    endpoint: Endpoint,
    default_model: String,
    options: GenerateOptions,
}

impl ClientConfig {
    /// Targets `endpoint` instead of the local default.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Model used when a call passes an empty model name.
    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Sampling options sent with every request.
    #[must_use]
    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn options(&self) -> &GenerateOptions {
        &self.options
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            default_model: DEFAULT_MODEL.to_owned(),
            options: GenerateOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Result<Endpoint, EndpointError> {
        s.parse()
    }

    #[test]
    fn bare_host_gets_default_port() {
        assert_eq!(parse("localhost").unwrap(), Endpoint::new("localhost", 11434));
    }

    #[test]
    fn scheme_and_trailing_slash() {
        assert_eq!(
            parse("http://127.0.0.1:11434/").unwrap(),
            Endpoint::new("127.0.0.1", 11434)
        );
        assert_eq!(
            parse("HTTP://box:9000/api").unwrap(),
            Endpoint::new("box", 9000)
        );
    }

    #[test]
    fn port_only_uses_default_host() {
        assert_eq!(parse(":8080").unwrap(), Endpoint::new("127.0.0.1", 8080));
    }

    #[test]
    fn ipv6_literal() {
        let ep = parse("[::1]:11500").unwrap();
        assert_eq!(ep.host(), "::1");
        assert_eq!(ep.port(), 11500);
        assert_eq!(ep.authority(), "[::1]:11500");
        assert_eq!(parse("[fe80::2]").unwrap().port(), DEFAULT_PORT);
        assert!(matches!(
            parse("[::1"),
            Err(EndpointError::UnterminatedIpv6(_))
        ));
        assert_eq!(
            parse("::1"),
            Err(EndpointError::Ipv6NeedsBrackets("::1".into()))
        );
        assert_eq!(
            parse("http://fe80::2:11434"),
            Err(EndpointError::Ipv6NeedsBrackets("fe80::2:11434".into()))
        );
        assert_eq!(
            parse("[::1]11500"),
            Err(EndpointError::InvalidPort("11500".into()))
        );
    }

    #[test]
    fn rejects_https_and_bad_ports() {
        assert_eq!(
            parse("https://ollama.example.com"),
            Err(EndpointError::UnsupportedScheme("https".into()))
        );
        assert_eq!(
            parse("localhost:eleven"),
            Err(EndpointError::InvalidPort("eleven".into()))
        );
        assert_eq!(parse("  "), Err(EndpointError::Empty));
        assert_eq!(parse("http://"), Err(EndpointError::Empty));
    }

    #[test]
    fn config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.endpoint().to_string(), "127.0.0.1:11434");
        assert_eq!(config.default_model(), DEFAULT_MODEL);
        assert!(config.options().is_empty());
    }
}
