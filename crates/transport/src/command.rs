use std::fmt;

/// Command families that start a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubscribeCommand {
    /// `SUBSCRIBE` for literal channels.
    Subscribe,
    /// `PSUBSCRIBE` for glob patterns.
    PSubscribe,
    /// `SSUBSCRIBE` for shard channels (cluster only).
    SSubscribe,
}

impl SubscribeCommand {
    /// Wire name of the command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "SUBSCRIBE",
            Self::PSubscribe => "PSUBSCRIBE",
            Self::SSubscribe => "SSUBSCRIBE",
        }
    }

    /// The unsubscribe command that undoes this one.
    #[must_use]
    pub const fn mirror(self) -> UnsubscribeCommand {
        match self {
            Self::Subscribe => UnsubscribeCommand::Unsubscribe,
            Self::PSubscribe => UnsubscribeCommand::PUnsubscribe,
            Self::SSubscribe => UnsubscribeCommand::SUnsubscribe,
        }
    }
}

/// Command families that end a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnsubscribeCommand {
    /// `UNSUBSCRIBE`
    Unsubscribe,
    /// `PUNSUBSCRIBE`
    PUnsubscribe,
    /// `SUNSUBSCRIBE` (cluster only)
    SUnsubscribe,
}

impl UnsubscribeCommand {
    /// Wire name of the command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::PUnsubscribe => "PUNSUBSCRIBE",
            Self::SUnsubscribe => "SUNSUBSCRIBE",
        }
    }
}

/// Command families that publish a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PublishCommand {
    /// `PUBLISH`, broadcast to every node.
    Publish,
    /// `SPUBLISH`, routed to the shard owning the channel (cluster only).
    SPublish,
}

impl PublishCommand {
    /// Wire name of the command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Publish => "PUBLISH",
            Self::SPublish => "SPUBLISH",
        }
    }
}

impl fmt::Display for SubscribeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for UnsubscribeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for PublishCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
