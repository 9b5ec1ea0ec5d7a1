use std::path::PathBuf;

use thiserror::Error;

/// Result alias for fallback operations.
pub type FallbackResult<T> = Result<T, FallbackError>;

/// Errors produced by fallback protocols and the manager.
#[derive(Debug, Error)]
pub enum FallbackError {
    /// Protocol was used before `initialize` succeeded.
    #[error("protocol `{protocol}` is not active")]
    NotActive {
        /// Protocol name.
        protocol: String,
    },
    /// Configuration was invalid.
    #[error("invalid fallback configuration: {0}")]
    InvalidConfig(&'static str),
    /// No registered protocol is healthy.
    #[error("no fallback protocol available")]
    NoProtocolAvailable,
    /// Every healthy protocol rejected the message.
    #[error("all {attempted} fallback protocols failed")]
    AllProtocolsFailed {
        /// Number of protocols tried.
        attempted: usize,
    },
    /// HTTP protocol has no endpoint for the recipient.
    #[error("no endpoint registered for `{recipient}`")]
    NoEndpoint {
        /// Recipient identifier.
        recipient: String,
    },
    /// File system failure.
    #[error("i/o failure on {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Message could not be serialized or parsed.
    #[error("fallback message codec error: {0}")]
    Codec(#[from] serde_json::Error),
    /// HTTP request or server failure.
    #[error("http fallback error: {reason}")]
    Http {
        /// Human-readable context.
        reason: String,
    },
}

impl FallbackError {
    /// Convenience constructor for I/O failures.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Convenience constructor for HTTP failures.
    #[must_use]
    pub fn http(reason: impl Into<String>) -> Self {
        Self::Http {
            reason: reason.into(),
        }
    }
}
