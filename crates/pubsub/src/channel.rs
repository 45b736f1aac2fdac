use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;
use kvmux_transport::{PublishCommand, SubscribeCommand, UnsubscribeCommand};
use serde::{Deserialize, Serialize};

use crate::config::PatternDetection;

/// How a channel name is interpreted by the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMode {
    /// Exact channel name.
    Literal,
    /// Glob pattern matched against published channel names.
    Pattern,
    /// Shard channel, routed to the slot owning the name (cluster only).
    Sharded,
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Literal => "literal",
            Self::Pattern => "pattern",
            Self::Sharded => "sharded",
        })
    }
}

/// Identity of a subscription: the raw channel bytes plus how they are matched.
///
/// Two channels are equal only if both name and mode agree, so `chat.*` as a
/// pattern and `chat.*` as a literal are separate subscriptions.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Channel {
    name: Bytes,
    mode: ChannelMode,
}

impl Channel {
    /// Creates a channel with an explicit mode.
    pub fn with_mode(name: impl Into<Bytes>, mode: ChannelMode) -> Self {
        Self {
            name: name.into(),
            mode,
        }
    }

    /// Creates a literal channel.
    pub fn literal(name: impl Into<Bytes>) -> Self {
        Self::with_mode(name, ChannelMode::Literal)
    }

    /// Creates a pattern channel.
    pub fn pattern(name: impl Into<Bytes>) -> Self {
        Self::with_mode(name, ChannelMode::Pattern)
    }

    /// Creates a shard channel.
    pub fn sharded(name: impl Into<Bytes>) -> Self {
        Self::with_mode(name, ChannelMode::Sharded)
    }

    /// Classifies a bare name: with [`PatternDetection::Auto`] any `*` makes it a pattern.
    pub fn infer(name: impl Into<Bytes>, detection: PatternDetection) -> Self {
        let name = name.into();
        let mode = match detection {
            PatternDetection::Auto if name.contains(&b'*') => ChannelMode::Pattern,
            PatternDetection::Auto | PatternDetection::Disabled => ChannelMode::Literal,
        };

        Self { name, mode }
    }

    /// Raw channel bytes.
    #[must_use]
    pub const fn name(&self) -> &Bytes {
        &self.name
    }

    /// How the name is matched.
    #[must_use]
    pub const fn mode(&self) -> ChannelMode {
        self.mode
    }

    /// Whether the name has no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    /// Whether this is a pattern channel.
    #[must_use]
    pub const fn is_pattern(&self) -> bool {
        matches!(self.mode, ChannelMode::Pattern)
    }

    /// Whether this is a shard channel.
    #[must_use]
    pub const fn is_sharded(&self) -> bool {
        matches!(self.mode, ChannelMode::Sharded)
    }

    /// Command that starts a server subscription for this channel.
    #[must_use]
    pub const fn subscribe_command(&self) -> SubscribeCommand {
        match self.mode {
            ChannelMode::Literal => SubscribeCommand::Subscribe,
            ChannelMode::Pattern => SubscribeCommand::PSubscribe,
            ChannelMode::Sharded => SubscribeCommand::SSubscribe,
        }
    }

    /// Command that ends the server subscription for this channel.
    #[must_use]
    pub const fn unsubscribe_command(&self) -> UnsubscribeCommand {
        self.subscribe_command().mirror()
    }

    /// Command used to publish to this channel.
    ///
    /// Patterns publish with plain `PUBLISH`; the server treats the name literally.
    #[must_use]
    pub const fn publish_command(&self) -> PublishCommand {
        match self.mode {
            ChannelMode::Literal | ChannelMode::Pattern => PublishCommand::Publish,
            ChannelMode::Sharded => PublishCommand::SPublish,
        }
    }

    /// Name as text: UTF-8 when valid, lowercase hex otherwise.
    #[must_use]
    pub fn to_text(&self) -> Cow<'_, str> {
        match std::str::from_utf8(&self.name) {
            Ok(text) => Cow::Borrowed(text),
            Err(_) => Cow::Owned(hex::encode(&self.name)),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Channel({}, {:?})", self.mode, self.to_text())
    }
}
