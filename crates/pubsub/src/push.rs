use bytes::Bytes;
use kvmux_transport::{PushKind, PushNotification, PushValue};
use tracing::{debug, error};

use crate::channel::Channel;
use crate::message::ChannelMessage;

/// A push notification the subscriber knows how to act on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// A published message for a local subscription.
    Message(ChannelMessage),

    /// The server acknowledged a (un)subscribe.
    Confirmation {
        /// Which command was confirmed.
        kind: PushKind,
        /// Channel or pattern; empty when nothing was subscribed.
        channel: Bytes,
        /// Subscriptions the connection holds afterwards.
        count: Option<i64>,
    },

    /// The connection dropped; server-side subscriptions are gone.
    Disconnected,
}

/// Decodes a push notification.
///
/// Returns `None` for kinds the subscriber ignores and for malformed payloads,
/// which are logged.
pub fn decode(notification: PushNotification) -> Option<Inbound> {
    let PushNotification { kind, data } = notification;

    match kind {
        PushKind::Disconnection => Some(Inbound::Disconnected),
        PushKind::Message => {
            let [channel, payload] = expect_arity::<2>(&kind, data)?;
            let channel = into_bytes(channel);
            Some(Inbound::Message(ChannelMessage::new(
                Channel::literal(channel.clone()),
                Channel::literal(channel),
                into_bytes(payload),
            )))
        }
        PushKind::SMessage => {
            let [channel, payload] = expect_arity::<2>(&kind, data)?;
            let channel = into_bytes(channel);
            Some(Inbound::Message(ChannelMessage::new(
                Channel::sharded(channel.clone()),
                Channel::sharded(channel),
                into_bytes(payload),
            )))
        }
        PushKind::PMessage => {
            let [pattern, channel, payload] = expect_arity::<3>(&kind, data)?;
            Some(Inbound::Message(ChannelMessage::new(
                Channel::pattern(into_bytes(pattern)),
                Channel::literal(into_bytes(channel)),
                into_bytes(payload),
            )))
        }
        PushKind::PSubscribe | PushKind::PUnsubscribe if data.len() == 3 => {
            // `[pattern, channel, count]` form: the middle element is informational
            let [pattern, _, count] = expect_arity::<3>(&kind, data)?;
            Some(confirmation(kind, pattern, count))
        }
        PushKind::Subscribe
        | PushKind::PSubscribe
        | PushKind::SSubscribe
        | PushKind::Unsubscribe
        | PushKind::PUnsubscribe
        | PushKind::SUnsubscribe => {
            let [channel, count] = expect_arity::<2>(&kind, data)?;
            Some(confirmation(kind, channel, count))
        }
        PushKind::Invalidate | PushKind::Other(_) => {
            debug!("Ignoring {:?} push notification", kind);
            None
        }
    }
}

fn confirmation(kind: PushKind, channel: PushValue, count: PushValue) -> Inbound {
    Inbound::Confirmation {
        kind,
        channel: into_bytes(channel),
        count: into_count(count),
    }
}

fn expect_arity<const N: usize>(kind: &PushKind, data: Vec<PushValue>) -> Option<[PushValue; N]> {
    let len = data.len();
    match data.try_into() {
        Ok(values) => Some(values),
        Err(_) => {
            error!(
                "Malformed {:?} push notification: expected {} values, got {}",
                kind, N, len
            );
            None
        }
    }
}

fn into_bytes(value: PushValue) -> Bytes {
    match value {
        PushValue::BulkString(bytes) => bytes,
        PushValue::SimpleString(text) => Bytes::from(text),
        PushValue::Int(n) => Bytes::from(n.to_string()),
        PushValue::Nil => Bytes::new(),
    }
}

fn into_count(value: PushValue) -> Option<i64> {
    match value {
        PushValue::Int(n) => Some(n),
        PushValue::BulkString(bytes) => std::str::from_utf8(&bytes).ok()?.parse().ok(),
        PushValue::SimpleString(text) => text.parse().ok(),
        PushValue::Nil => None,
    }
}
