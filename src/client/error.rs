//! Error types for client exchanges.

use std::{fmt, io};

use crate::codec::DecodeError;

/// Which deadline expired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// The TCP connect did not finish in time.
    Connect,
    /// The response did not finish in time.
    Read,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connect => "connect",
            Self::Read => "read",
        })
    }
}

/// Errors delivered to [`ResponseListener::on_error`](super::ResponseListener::on_error).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The request URL could not be parsed.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// Only plain `http` is spoken.
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
    /// The host did not resolve to any address.
    #[error("failed to resolve {host}")]
    Resolve {
        host: String,
        #[source]
        source: Option<io::Error>,
    },
    /// Transport error.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    /// The server sent bytes that do not form a valid response.
    #[error("invalid response: {0}")]
    Decode(#[from] DecodeError),
    /// A deadline expired.
    #[error("{phase} timed out")]
    Timeout { phase: TimeoutPhase },
    /// The listener asked to stop the exchange.
    #[error("exchange aborted by listener")]
    Aborted,
    /// A listener callback panicked.
    #[error("response listener panicked")]
    ListenerPanicked,
    /// The client was shut down before the exchange finished.
    #[error("client is shut down")]
    Shutdown,
}

impl ClientError {
    /// Short label used for logs and metrics.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidUrl(_) => "invalid_url",
            Self::UnsupportedScheme(_) => "unsupported_scheme",
            Self::Resolve { .. } => "resolve",
            Self::Io(_) => "io",
            Self::Decode(_) => "decode",
            Self::Timeout { .. } => "timeout",
            Self::Aborted => "aborted",
            Self::ListenerPanicked => "listener_panicked",
            Self::Shutdown => "shutdown",
        }
    }
}
