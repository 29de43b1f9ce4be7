//! Error types for the IRC client engine.
//!
//! The taxonomy follows the engine's failure domains: per-message format
//! errors, correlation-table misuse, and transport-level failures. A format
//! error is fatal to that single message, never to the connection; a
//! transport error terminates the read and dispatch paths and is surfaced
//! exactly once.

use thiserror::Error;

/// Convenience type alias for Results using [`ProtocolError`].
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

/// Top-level protocol errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// I/O error during reading or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Message exceeded maximum allowed length.
    #[error("message too long: {0} bytes")]
    MessageTooLong(usize),

    /// The configured encoding label is not recognized by encoding_rs.
    #[error("unknown encoding label: {0}")]
    UnknownEncoding(String),

    /// Failed to parse an IRC message.
    #[error("invalid message: {string}")]
    InvalidMessage {
        /// The raw message string.
        string: String,
        /// The underlying parse error.
        #[source]
        cause: MessageParseError,
    },
}

/// Errors encountered when parsing IRC messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MessageParseError {
    /// Message was empty.
    #[error("empty message")]
    EmptyMessage,

    /// Command was invalid or missing.
    #[error("invalid command")]
    InvalidCommand,

    /// A `time` or `t` tag did not denote a valid instant.
    ///
    /// Syntactically invalid timestamps and non-existent instants (for
    /// example a leap second) are both rejected rather than clamped.
    #[error("invalid timestamp tag: {0}")]
    InvalidTimestamp(String),
}

/// Errors from the correlation table (request manager).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RequestError {
    /// `complete` was called for a key with no pending operation.
    ///
    /// This is a programming error in the caller, not a wire condition.
    #[error("no pending operation for key: {0}")]
    UnknownKey(String),

    /// The wait for a correlated reply exceeded the caller's timeout.
    #[error("request timed out: {0}")]
    Timeout(String),
}

/// Errors from the connection lifecycle.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectionError {
    /// The client is not connected (or the writer has shut down).
    #[error("not connected")]
    NotConnected,

    /// Transport-level I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS setup failure.
    #[error("tls error: {0}")]
    Tls(String),

    /// The server name is not a valid DNS name for TLS.
    #[error("invalid server name: {0}")]
    InvalidServerName(String),
}

/// Errors surfaced by the client's request/response surface.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    /// The underlying connection failed or is gone.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The correlation layer failed (unknown key, timeout).
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Wire-level setup or framing failed (for example an unknown
    /// encoding label).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
