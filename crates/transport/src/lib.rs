//! Transport abstraction for pub/sub traffic on a multiplexed connection
//!
//! This crate describes the collaborator the subscription manager talks to.
//! Specific transports (in-memory, real sockets) live in separate crates.
//!
//! Transports handle:
//! - Issuing (un)subscribe and publish commands to the server
//! - Knowing whether the connection is in cluster mode
//! - Forwarding server push notifications into a [`PushSender`]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod command;
pub mod error;
mod push;

pub use command::{PublishCommand, SubscribeCommand, UnsubscribeCommand};
pub use error::TransportError;
pub use push::{PushKind, PushNotification, PushReceiver, PushSender, PushValue, push_channel};

use async_trait::async_trait;
use bytes::Bytes;

/// Transport trait for pub/sub commands
///
/// Every method is a single server round trip. Implementations must not hold
/// any lock of the caller across the await points.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Whether the underlying connection talks to a cluster.
    ///
    /// Sharded commands are only valid when this returns `true`.
    fn is_cluster(&self) -> bool;

    /// Issue `SUBSCRIBE`, `PSUBSCRIBE` or `SSUBSCRIBE` for one channel.
    async fn subscribe(&self, command: SubscribeCommand, channel: Bytes)
    -> Result<(), TransportError>;

    /// Issue `UNSUBSCRIBE`, `PUNSUBSCRIBE` or `SUNSUBSCRIBE` for one channel.
    async fn unsubscribe(
        &self,
        command: UnsubscribeCommand,
        channel: Bytes,
    ) -> Result<(), TransportError>;

    /// Issue the given unsubscribe command without arguments, dropping every
    /// server-side subscription of that family.
    async fn unsubscribe_all(&self, command: UnsubscribeCommand) -> Result<(), TransportError>;

    /// Publish a message and return the number of receivers the server saw.
    async fn publish(
        &self,
        command: PublishCommand,
        channel: Bytes,
        message: Bytes,
    ) -> Result<u64, TransportError>;
}
