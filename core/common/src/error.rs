//! Common error types for unistore.

use serde_json::Value;
use thiserror::Error;

use crate::metadata::Metadata;

/// Backend-specific subkind of a provider error.
///
/// Passed as the `throws` option of a request so that an unexpected status
/// surfaces as the kind of failure the calling operation represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProviderErrorKind {
    #[default]
    Generic,
    Download,
    Upload,
    Delete,
    Metadata,
    Copy,
    Move,
}

impl ProviderErrorKind {
    /// Short label used in error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorKind::Generic => "provider",
            ProviderErrorKind::Download => "download",
            ProviderErrorKind::Upload => "upload",
            ProviderErrorKind::Delete => "delete",
            ProviderErrorKind::Metadata => "metadata",
            ProviderErrorKind::Copy => "copy",
            ProviderErrorKind::Move => "move",
        }
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error type for unistore operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No provider is registered under the requested identifier.
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// A backend answered with a status outside the expected set.
    #[error("{kind} error ({status}): {message}")]
    Provider {
        kind: ProviderErrorKind,
        status: u16,
        message: String,
    },

    /// Remote entry not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A provider declined a native operation; callers may fall back.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// The copy half of a move succeeded but deleting the source failed.
    ///
    /// `metadata` describes the entry now present at the destination.
    #[error("Move partially failed: copied to destination but source cleanup failed: {source}")]
    PartialMove {
        metadata: Box<Metadata>,
        #[source]
        source: Box<Error>,
    },

    /// Transport-level failure (connection, TLS, body stream).
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Endpoint configuration is missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Translate an unexpected backend response into a provider error.
    ///
    /// JSON bodies carrying a `message` (or `error`, or `error.message`)
    /// string contribute that string; any other body is used verbatim.
    pub fn from_response(kind: ProviderErrorKind, status: u16, body: &str) -> Self {
        let message = match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(map)) => map
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| map.get("error").and_then(Value::as_str))
                .or_else(|| {
                    map.get("error")
                        .and_then(|e| e.get("message"))
                        .and_then(Value::as_str)
                })
                .map(str::to_string)
                .unwrap_or_else(|| body.to_string()),
            _ => body.trim().to_string(),
        };

        let message = if message.is_empty() {
            reason_phrase(status).to_string()
        } else {
            message
        };

        Error::Provider {
            kind,
            status,
            message,
        }
    }

    /// Wrap a cleanup failure that followed a successful copy.
    pub fn partial_move(metadata: Metadata, source: Error) -> Self {
        Error::PartialMove {
            metadata: Box::new(metadata),
            source: Box::new(source),
        }
    }

    /// Whether this is a graceful decline rather than a failure.
    pub fn is_not_supported(&self) -> bool {
        matches!(self, Error::NotSupported(_))
    }

    /// Whether the error reports a missing remote entry.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
            || matches!(self, Error::Provider { status: 404, .. })
    }

    /// Suggested HTTP status for a routing layer reporting this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Provider { status, .. } => *status,
            Error::NotFound(_) => 404,
            Error::UnsupportedProvider(_) | Error::InvalidInput(_) => 400,
            Error::NotSupported(_) => 501,
            Error::Network(_) => 502,
            Error::PartialMove { .. }
            | Error::Serialization(_)
            | Error::Io(_)
            | Error::Config(_) => 500,
        }
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        409 => "Conflict",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unexpected response",
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
