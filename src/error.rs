//! Error types for the OBS bridge.

use thiserror::Error;

/// Result type for fern-obs operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to OBS or publishing state.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to establish a connection to OBS.
    #[error("failed to connect to OBS at {host}:{port}: {message}")]
    Connection {
        /// The host we tried to connect to.
        host: String,
        /// The port we tried to connect to.
        port: u16,
        /// Error message.
        message: String,
    },

    /// The identify handshake was rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A malformed or unexpected frame arrived.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Mid-session I/O failure on the WebSocket. The session is over;
    /// the caller must treat this as a disconnect.
    #[error("transport error: {0}")]
    Transport(String),

    /// No response arrived within the request deadline.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// A request was issued on a closed client.
    #[error("not connected to OBS")]
    NotConnected,

    /// OBS received the request but refused it.
    #[error("OBS rejected {request}: {comment}")]
    Rejected {
        /// The request type that was refused.
        request: String,
        /// OBS's explanation.
        comment: String,
    },

    /// I/O error (state file operations).
    #[error("{context}: {source}")]
    Io {
        /// Context for the error.
        context: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Creates a connection error.
    pub fn connection(host: impl Into<String>, port: u16, message: impl Into<String>) -> Self {
        Self::Connection {
            host: host.into(),
            port,
            message: message.into(),
        }
    }

    /// Creates an I/O error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Process exit code for CLI invocations, one per failure category.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Connection { .. } | Self::Transport(_) | Self::NotConnected => 2,
            Self::Auth(_) => 3,
            Self::Timeout(_) => 4,
            Self::Protocol(_) | Self::Rejected { .. } => 5,
            Self::Io { .. } | Self::Json(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_per_category() {
        assert_eq!(Error::connection("localhost", 4455, "refused").exit_code(), 2);
        assert_eq!(Error::Auth("bad password".into()).exit_code(), 3);
        assert_eq!(Error::Timeout(5000).exit_code(), 4);
        assert_eq!(Error::Protocol("garbage frame".into()).exit_code(), 5);
        assert_eq!(Error::NotConnected.exit_code(), 2);
    }

    #[test]
    fn connection_error_message_includes_endpoint() {
        let err = Error::connection("studio-pc", 4455, "connection refused");
        let msg = err.to_string();
        assert!(msg.contains("studio-pc:4455"));
        assert!(msg.contains("connection refused"));
    }
}
