//! Error types for the search library.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for search operations.
pub type Result<T> = std::result::Result<T, SearchError>;

/// Errors that can occur during search and diagnostic operations.
#[derive(Error, Debug)]
pub enum SearchError {
    /// The proxy or the target behind it could not be reached.
    #[error("Transport unreachable: {0}")]
    TransportUnreachable(String),

    /// A network operation exceeded its deadline.
    #[error("Transport timed out after {0:?}")]
    TransportTimeout(Duration),

    /// Non-success status or a malformed response.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No extraction strategy produced a complete result.
    #[error("No extraction strategy matched the response from {0}")]
    ExtractionMismatch(String),

    /// The Tor control port is absent or refused authentication.
    #[error("Control channel unavailable: {0}")]
    ControlChannelUnavailable(String),

    /// Failed to parse a response or selector.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// The query names no sources.
    #[error("No search sources enabled")]
    NoSources,

    /// Invalid query.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// URL parsing error.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source-level failure kinds that are reported next to partial results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransportUnreachable,
    TransportTimeout,
    Protocol,
    ExtractionMismatch,
}

impl SearchError {
    /// Returns the source-level kind of this error, if it has one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::TransportUnreachable(_) => Some(ErrorKind::TransportUnreachable),
            Self::TransportTimeout(_) => Some(ErrorKind::TransportTimeout),
            Self::Protocol(_) | Self::Parse(_) => Some(ErrorKind::Protocol),
            Self::ExtractionMismatch(_) => Some(ErrorKind::ExtractionMismatch),
            _ => None,
        }
    }

    /// Returns true if the error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TransportTimeout(_))
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not report the configured deadline
            Self::TransportTimeout(Duration::ZERO)
        } else if err.is_connect() {
            Self::TransportUnreachable(err.to_string())
        } else {
            Self::Protocol(err.to_string())
        }
    }
}

impl From<tokio_socks::Error> for SearchError {
    fn from(err: tokio_socks::Error) -> Self {
        Self::TransportUnreachable(err.to_string())
    }
}
