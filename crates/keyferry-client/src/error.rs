//! Error types for the keyferry wire client.

use std::time::Duration;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to a RESP server.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O error occurred during communication.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The server returned a RESP error reply.
    #[error("server error: {0}")]
    Server(String),

    /// The RESP data was malformed.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The reply type did not match what the command produces.
    #[error("unexpected response type: expected {expected}, got {actual}")]
    UnexpectedResponse {
        /// The expected type description.
        expected: &'static str,
        /// The actual type description.
        actual: String,
    },

    /// The connection was closed by the peer, or is unusable after a timeout.
    #[error("connection closed")]
    ConnectionClosed,

    /// No reply arrived within the configured bound.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Authentication was rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// TLS material could not be loaded or the handshake failed.
    #[error("tls error: {0}")]
    Tls(String),
}

impl Error {
    /// Whether the error leaves the connection itself unusable.
    ///
    /// Server replies are scoped to the command that produced them; every
    /// other failure means the byte stream can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Server(_) | Error::UnexpectedResponse { .. })
    }
}
