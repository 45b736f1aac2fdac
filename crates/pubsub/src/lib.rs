//! Client-side pub/sub subscription manager
//!
//! Fans server push messages out to any number of local subscribers while
//! keeping exactly one server subscription per channel:
//! - [`Subscriber`] is the entry point: subscribe, unsubscribe, publish
//! - [`Handler`]s are callbacks run on their own task per message
//! - [`ChannelQueue`]s are ordered buffers read at the caller's pace
//! - [`BlockingSubscriber`] wraps everything for synchronous callers
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod blocking;
mod channel;
mod config;
mod error;
mod handler;
mod message;
/// Decoding of push notifications.
pub mod push;
mod queue;
mod registry;
mod subscriber;
mod subscription;

pub use blocking::BlockingSubscriber;
pub use channel::{Channel, ChannelMode};
pub use config::{PatternDetection, PubSubConfig};
pub use error::{Error, Result, TryRecvError};
pub use handler::{Handler, HandlerError, SubscriptionHandler, SubscriptionHandlerError};
pub use message::ChannelMessage;
pub use queue::ChannelQueue;
pub use registry::SubscriptionRegistry;
pub use subscriber::Subscriber;
pub use subscription::Subscription;
