use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::runtime::Handle;
use tracing::trace;
use uuid::Uuid;

use crate::channel::Channel;
use crate::handler::Handler;
use crate::message::ChannelMessage;
use crate::queue::ChannelQueue;
use crate::subscription::Subscription;

/// Concurrent map from channel to its local [`Subscription`].
///
/// An entry exists exactly while its subscription has at least one target.
/// Adding the first target and removing the last are decided under the map's
/// shard lock, so concurrent callers agree on which of them must talk to the
/// server.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: DashMap<Channel, Arc<Subscription>>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler. Returns true if the channel was newly subscribed.
    pub fn add_handler(&self, channel: &Channel, handler: Handler) -> bool {
        self.subscriptions
            .entry(channel.clone())
            .or_insert_with(|| Arc::new(Subscription::new(channel.clone())))
            .add_handler(handler)
    }

    /// Registers a queue. Returns true if the channel was newly subscribed.
    pub fn add_queue(&self, queue: &ChannelQueue) -> bool {
        let channel = queue.channel();
        self.subscriptions
            .entry(channel.clone())
            .or_insert_with(|| Arc::new(Subscription::new(channel.clone())))
            .add_queue(queue.sender())
    }

    /// Removes one registration of `handler`.
    ///
    /// Returns true if that left the channel with no targets, in which case
    /// the entry is gone.
    pub fn remove_handler(&self, channel: &Channel, handler: &Handler) -> bool {
        match self.subscriptions.entry(channel.clone()) {
            Entry::Occupied(entry) => {
                if !entry.get().remove_handler(handler) || !entry.get().is_empty() {
                    return false;
                }
                entry.remove();
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Removes and completes the queue `id` registered on `channel`.
    ///
    /// Returns true if that left the channel with no targets, in which case
    /// the entry is gone.
    pub fn remove_queue(&self, channel: &Channel, id: Uuid) -> bool {
        match self.subscriptions.entry(channel.clone()) {
            Entry::Occupied(entry) => {
                if !entry.get().remove_queue(id) || !entry.get().is_empty() {
                    return false;
                }
                entry.remove();
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Drops every target of `channel`. Returns true if it was subscribed.
    pub fn remove_channel(&self, channel: &Channel) -> bool {
        match self.subscriptions.remove(channel) {
            Some((_, subscription)) => {
                subscription.clear();
                true
            }
            None => false,
        }
    }

    /// Drops every subscription and returns the channels that were subscribed.
    pub fn remove_all(&self) -> Vec<Channel> {
        let channels: Vec<Channel> = self
            .subscriptions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        channels
            .into_iter()
            .filter_map(|channel| {
                let (channel, subscription) = self.subscriptions.remove(&channel)?;
                subscription.clear();
                Some(channel)
            })
            .collect()
    }

    /// Delivers a message to the subscription it was routed by, running
    /// handlers on `runtime`.
    ///
    /// Returns false if nothing is subscribed locally.
    pub fn dispatch(&self, message: &ChannelMessage, runtime: Option<&Handle>) -> bool {
        match self.subscriptions.get(message.subscription()) {
            Some(subscription) => {
                subscription.dispatch(message, runtime);
                true
            }
            None => {
                trace!("No local subscription for {}", message.subscription());
                false
            }
        }
    }

    /// Whether `channel` has a local subscription.
    #[must_use]
    pub fn contains(&self, channel: &Channel) -> bool {
        self.subscriptions.contains_key(channel)
    }

    /// The subscription for `channel`, if any.
    #[must_use]
    pub fn get(&self, channel: &Channel) -> Option<Arc<Subscription>> {
        self.subscriptions
            .get(channel)
            .map(|entry| entry.value().clone())
    }

    /// Every locally subscribed channel.
    #[must_use]
    pub fn channels(&self) -> Vec<Channel> {
        self.subscriptions
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of subscribed channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether nothing is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
