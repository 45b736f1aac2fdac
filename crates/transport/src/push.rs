use bytes::Bytes;
use tokio::sync::mpsc;

/// Sending half handed to a transport for server push notifications.
pub type PushSender = mpsc::UnboundedSender<PushNotification>;

/// Receiving half consumed by the subscription manager.
pub type PushReceiver = mpsc::UnboundedReceiver<PushNotification>;

/// Creates a linked push sender/receiver pair.
///
/// The channel is unbounded: the server has no redelivery, so a slow consumer
/// must cost memory rather than messages.
#[must_use]
pub fn push_channel() -> (PushSender, PushReceiver) {
    mpsc::unbounded_channel()
}

/// Kind of an out-of-band notification pushed by the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PushKind {
    /// Synthesised by the transport when the connection is lost.
    Disconnection,
    /// Unknown push kind, carrying the raw name.
    Other(String),
    /// Client-side caching invalidation.
    Invalidate,
    /// `[channel, message]`
    Message,
    /// `[pattern, channel, message]`
    PMessage,
    /// `[channel, message]` on a shard channel.
    SMessage,
    /// `[channel, count]`
    Subscribe,
    /// `[pattern, count]`
    PSubscribe,
    /// `[channel, count]`
    SSubscribe,
    /// `[channel, count]`
    Unsubscribe,
    /// `[pattern, count]`
    PUnsubscribe,
    /// `[channel, count]`
    SUnsubscribe,
}

/// A single element of a push notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PushValue {
    /// Binary-safe string.
    BulkString(Bytes),
    /// Status string.
    SimpleString(String),
    /// Integer reply, used for subscription counts.
    Int(i64),
    /// Null reply.
    Nil,
}

impl From<Bytes> for PushValue {
    fn from(bytes: Bytes) -> Self {
        Self::BulkString(bytes)
    }
}

impl From<&'static str> for PushValue {
    fn from(s: &'static str) -> Self {
        Self::BulkString(Bytes::from_static(s.as_bytes()))
    }
}

impl From<i64> for PushValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

/// Notification pushed by the server outside of request/response flow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushNotification {
    /// What the notification is.
    pub kind: PushKind,
    /// Positional payload; layout depends on `kind`.
    pub data: Vec<PushValue>,
}

impl PushNotification {
    /// Creates a new notification.
    #[must_use]
    pub const fn new(kind: PushKind, data: Vec<PushValue>) -> Self {
        Self { kind, data }
    }

    /// The notification a transport emits when its connection drops.
    #[must_use]
    pub const fn disconnection() -> Self {
        Self::new(PushKind::Disconnection, Vec::new())
    }
}
