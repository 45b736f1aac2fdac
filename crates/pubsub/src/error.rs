//! Error types for the subscription manager

use kvmux_transport::TransportError;
use thiserror::Error;

/// Result type for subscription manager operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the subscription manager
#[derive(Debug, Error)]
pub enum Error {
    /// The request was rejected before reaching the server
    #[error("invalid request: {0}")]
    Validation(&'static str),

    /// The operation is not available on this connection
    #[error("sharded pub/sub on channel '{0}' requires cluster mode")]
    Configuration(String),

    /// The server round trip failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The runtime backing the blocking API could not be built
    #[error("failed to build runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Error returned by [`ChannelQueue::try_recv`](crate::ChannelQueue::try_recv)
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum TryRecvError {
    /// Nothing buffered right now
    #[error("queue is empty")]
    Empty,

    /// The queue was completed and fully drained
    #[error("queue is completed")]
    Completed,
}
