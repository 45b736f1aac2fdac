use bytes::Bytes;

use crate::channel::Channel;

/// A message delivered to a local subscriber.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelMessage {
    subscription: Channel,
    channel: Channel,
    payload: Bytes,
}

impl ChannelMessage {
    /// Creates a message.
    ///
    /// `subscription` is the identity the message was routed by, `channel` is
    /// the concrete channel it was published on. They differ only for patterns.
    #[must_use]
    pub const fn new(subscription: Channel, channel: Channel, payload: Bytes) -> Self {
        Self {
            subscription,
            channel,
            payload,
        }
    }

    /// The subscription the message matched.
    #[must_use]
    pub const fn subscription(&self) -> &Channel {
        &self.subscription
    }

    /// The channel the message was published on.
    #[must_use]
    pub const fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Message body.
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consumes the message, returning its body.
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}
