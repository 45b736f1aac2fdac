//! Error types for transport operations

use thiserror::Error;

/// Errors raised while talking to the server
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The connection is gone.
    #[error("connection closed")]
    Disconnected,

    /// The server did not answer in time.
    #[error("request timed out")]
    Timeout,

    /// The server answered with an error reply.
    #[error("server error: {0}")]
    Server(String),

    /// Anything else.
    #[error("transport error: {0}")]
    Other(String),
}
