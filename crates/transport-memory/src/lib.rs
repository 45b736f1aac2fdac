//! In-memory server emulation for testing
//!
//! A [`MemoryServer`] keeps the server side of pub/sub state for any number of
//! connections in the same process. Each [`MemoryTransport`] is one connection
//! and pushes notifications into the [`PushSender`] it was created with.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod glob;

pub use glob::glob_matches;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use kvmux_transport::{
    PublishCommand, PushKind, PushNotification, PushSender, PushValue, SubscribeCommand,
    Transport, TransportError, UnsubscribeCommand,
};
use parking_lot::Mutex;
use tracing::{debug, info, trace};
use uuid::Uuid;

/// Configuration for the memory server
#[derive(Clone, Debug, Default)]
pub struct MemoryServerOptions {
    /// Whether the server behaves like a cluster (enables sharded pub/sub)
    pub cluster: bool,
    /// How long every command waits before the server handles it
    pub latency: Duration,
}

/// A command as the server received it
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordedCommand {
    /// A subscribe family command for one channel
    Subscribe(SubscribeCommand, Bytes),
    /// An unsubscribe family command for one channel
    Unsubscribe(UnsubscribeCommand, Bytes),
    /// An unsubscribe family command without arguments
    UnsubscribeAll(UnsubscribeCommand),
    /// A publish family command
    Publish(PublishCommand, Bytes, Bytes),
}

/// Server-side subscription state of one connection
#[derive(Debug)]
struct ConnectionState {
    push: PushSender,
    channels: HashSet<Bytes>,
    patterns: HashSet<Bytes>,
    shard_channels: HashSet<Bytes>,
}

impl ConnectionState {
    fn new(push: PushSender) -> Self {
        Self {
            push,
            channels: HashSet::new(),
            patterns: HashSet::new(),
            shard_channels: HashSet::new(),
        }
    }

    fn set_mut(&mut self, command: UnsubscribeCommand) -> &mut HashSet<Bytes> {
        match command {
            UnsubscribeCommand::Unsubscribe => &mut self.channels,
            UnsubscribeCommand::PUnsubscribe => &mut self.patterns,
            UnsubscribeCommand::SUnsubscribe => &mut self.shard_channels,
        }
    }

    fn subscription_count(&self) -> i64 {
        i64::try_from(self.channels.len() + self.patterns.len() + self.shard_channels.len())
            .unwrap_or(i64::MAX)
    }

    fn push(&self, kind: PushKind, data: Vec<PushValue>) -> bool {
        self.push.send(PushNotification::new(kind, data)).is_ok()
    }
}

#[derive(Debug)]
struct ServerInner {
    options: MemoryServerOptions,
    connections: DashMap<Uuid, ConnectionState>,
    commands: Mutex<Vec<RecordedCommand>>,
    pending_failures: AtomicUsize,
    latency: Mutex<Duration>,
}

/// In-process server holding pub/sub state for its connections
#[derive(Clone, Debug)]
pub struct MemoryServer {
    inner: Arc<ServerInner>,
}

impl MemoryServer {
    /// Create a new memory server with options
    #[must_use]
    pub fn new(options: MemoryServerOptions) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                latency: Mutex::new(options.latency),
                options,
                connections: DashMap::new(),
                commands: Mutex::new(Vec::new()),
                pending_failures: AtomicUsize::new(0),
            }),
        }
    }

    /// Create a standalone (non-cluster) server
    #[must_use]
    pub fn standalone() -> Self {
        Self::new(MemoryServerOptions::default())
    }

    /// Create a server in cluster mode
    #[must_use]
    pub fn cluster() -> Self {
        Self::new(MemoryServerOptions {
            cluster: true,
            ..MemoryServerOptions::default()
        })
    }

    /// Whether this server runs in cluster mode
    #[must_use]
    pub fn is_cluster(&self) -> bool {
        self.inner.options.cluster
    }

    /// Open a new connection whose push notifications go to `push`
    #[must_use]
    pub fn connect(&self, push: PushSender) -> MemoryTransport {
        let id = Uuid::new_v4();
        self.inner
            .connections
            .insert(id, ConnectionState::new(push));

        info!("Memory connection {} established", id);

        MemoryTransport {
            id,
            server: self.clone(),
        }
    }

    /// Drop a connection, pushing a disconnection notification to it
    pub fn disconnect(&self, id: Uuid) {
        if let Some((_, state)) = self.inner.connections.remove(&id) {
            state.push(PushKind::Disconnection, Vec::new());
            info!("Memory connection {} disconnected", id);
        }
    }

    /// Number of open connections
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    /// Every command received so far, in arrival order
    #[must_use]
    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.inner.commands.lock().clone()
    }

    /// Forget the recorded command log
    pub fn clear_commands(&self) {
        self.inner.commands.lock().clear();
    }

    /// Make the next `n` commands fail with a server error
    pub fn fail_next_commands(&self, n: usize) {
        self.inner.pending_failures.store(n, Ordering::SeqCst);
    }

    /// Change the delay applied to commands sent from now on
    pub fn set_latency(&self, latency: Duration) {
        *self.inner.latency.lock() = latency;
    }

    /// Channels, patterns and shard channels a connection is subscribed to
    #[must_use]
    pub fn subscriptions(&self, id: Uuid) -> Option<(Vec<Bytes>, Vec<Bytes>, Vec<Bytes>)> {
        self.inner.connections.get(&id).map(|state| {
            (
                state.channels.iter().cloned().collect(),
                state.patterns.iter().cloned().collect(),
                state.shard_channels.iter().cloned().collect(),
            )
        })
    }

    async fn delay(&self) {
        let latency = *self.inner.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn record(&self, command: RecordedCommand) -> Result<(), TransportError> {
        trace!("Memory server received {:?}", command);
        self.inner.commands.lock().push(command);

        let injected = self
            .inner
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        if injected {
            return Err(TransportError::Server("ERR injected failure".to_string()));
        }

        Ok(())
    }

    fn require_cluster(&self) -> Result<(), TransportError> {
        if self.is_cluster() {
            Ok(())
        } else {
            Err(TransportError::Server(
                "ERR This instance has cluster support disabled".to_string(),
            ))
        }
    }

    fn subscribe(
        &self,
        id: Uuid,
        command: SubscribeCommand,
        channel: Bytes,
    ) -> Result<(), TransportError> {
        self.record(RecordedCommand::Subscribe(command, channel.clone()))?;
        if command == SubscribeCommand::SSubscribe {
            self.require_cluster()?;
        }

        let mut state = self
            .inner
            .connections
            .get_mut(&id)
            .ok_or(TransportError::Disconnected)?;

        state.set_mut(command.mirror()).insert(channel.clone());
        let count = state.subscription_count();

        let kind = match command {
            SubscribeCommand::Subscribe => PushKind::Subscribe,
            SubscribeCommand::PSubscribe => PushKind::PSubscribe,
            SubscribeCommand::SSubscribe => PushKind::SSubscribe,
        };
        state.push(kind, vec![PushValue::BulkString(channel), PushValue::Int(count)]);

        Ok(())
    }

    fn unsubscribe(
        &self,
        id: Uuid,
        command: UnsubscribeCommand,
        channels: Option<Bytes>,
    ) -> Result<(), TransportError> {
        match &channels {
            Some(channel) => self.record(RecordedCommand::Unsubscribe(command, channel.clone()))?,
            None => self.record(RecordedCommand::UnsubscribeAll(command))?,
        }
        if command == UnsubscribeCommand::SUnsubscribe {
            self.require_cluster()?;
        }

        let mut state = self
            .inner
            .connections
            .get_mut(&id)
            .ok_or(TransportError::Disconnected)?;

        let removed: Vec<Bytes> = match channels {
            Some(channel) => {
                state.set_mut(command).remove(&channel);
                vec![channel]
            }
            None => state.set_mut(command).drain().collect(),
        };

        let kind = match command {
            UnsubscribeCommand::Unsubscribe => PushKind::Unsubscribe,
            UnsubscribeCommand::PUnsubscribe => PushKind::PUnsubscribe,
            UnsubscribeCommand::SUnsubscribe => PushKind::SUnsubscribe,
        };

        let count = state.subscription_count();
        if removed.is_empty() {
            state.push(kind.clone(), vec![PushValue::Nil, PushValue::Int(count)]);
        }
        for channel in removed {
            state.push(
                kind.clone(),
                vec![PushValue::BulkString(channel), PushValue::Int(count)],
            );
        }

        Ok(())
    }

    fn publish(
        &self,
        command: PublishCommand,
        channel: Bytes,
        message: Bytes,
    ) -> Result<u64, TransportError> {
        self.record(RecordedCommand::Publish(
            command,
            channel.clone(),
            message.clone(),
        ))?;

        let mut receivers = 0;
        match command {
            PublishCommand::Publish => {
                for state in &self.inner.connections {
                    if state.channels.contains(&channel)
                        && state.push(
                            PushKind::Message,
                            vec![channel.clone().into(), message.clone().into()],
                        )
                    {
                        receivers += 1;
                    }

                    for pattern in &state.patterns {
                        if glob_matches(pattern, &channel)
                            && state.push(
                                PushKind::PMessage,
                                vec![
                                    pattern.clone().into(),
                                    channel.clone().into(),
                                    message.clone().into(),
                                ],
                            )
                        {
                            receivers += 1;
                        }
                    }
                }
            }
            PublishCommand::SPublish => {
                self.require_cluster()?;
                for state in &self.inner.connections {
                    if state.shard_channels.contains(&channel)
                        && state.push(
                            PushKind::SMessage,
                            vec![channel.clone().into(), message.clone().into()],
                        )
                    {
                        receivers += 1;
                    }
                }
            }
        }

        debug!(
            "Published {} bytes on {:?} to {} receivers",
            message.len(),
            channel,
            receivers
        );

        Ok(receivers)
    }
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::standalone()
    }
}

/// One connection to a [`MemoryServer`]
#[derive(Clone, Debug)]
pub struct MemoryTransport {
    id: Uuid,
    server: MemoryServer,
}

impl MemoryTransport {
    /// Identifier of this connection on its server
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// The server this connection belongs to
    #[must_use]
    pub const fn server(&self) -> &MemoryServer {
        &self.server
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn is_cluster(&self) -> bool {
        self.server.is_cluster()
    }

    async fn subscribe(
        &self,
        command: SubscribeCommand,
        channel: Bytes,
    ) -> Result<(), TransportError> {
        self.server.delay().await;
        self.server.subscribe(self.id, command, channel)
    }

    async fn unsubscribe(
        &self,
        command: UnsubscribeCommand,
        channel: Bytes,
    ) -> Result<(), TransportError> {
        self.server.delay().await;
        self.server.unsubscribe(self.id, command, Some(channel))
    }

    async fn unsubscribe_all(&self, command: UnsubscribeCommand) -> Result<(), TransportError> {
        self.server.delay().await;
        self.server.unsubscribe(self.id, command, None)
    }

    async fn publish(
        &self,
        command: PublishCommand,
        channel: Bytes,
        message: Bytes,
    ) -> Result<u64, TransportError> {
        self.server.delay().await;
        self.server.publish(command, channel, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use kvmux_transport::push_channel;

    #[tokio::test]
    async fn test_subscribe_pushes_confirmation() {
        let _ = tracing_subscriber::fmt::try_init();

        let server = MemoryServer::standalone();
        let (push_tx, mut push_rx) = push_channel();
        let transport = server.connect(push_tx);

        transport
            .subscribe(SubscribeCommand::Subscribe, Bytes::from("news"))
            .await
            .unwrap();

        let push = push_rx.recv().await.unwrap();
        assert_eq!(push.kind, PushKind::Subscribe);
        assert_eq!(push.data, vec!["news".into(), PushValue::Int(1)]);

        assert_eq!(
            server.commands(),
            vec![RecordedCommand::Subscribe(
                SubscribeCommand::Subscribe,
                Bytes::from("news")
            )]
        );
    }

    #[tokio::test]
    async fn test_publish_counts_exact_and_pattern_receivers() {
        let server = MemoryServer::standalone();
        let (push_tx, mut push_rx) = push_channel();
        let transport = server.connect(push_tx);

        transport
            .subscribe(SubscribeCommand::Subscribe, Bytes::from("chat.room1"))
            .await
            .unwrap();
        transport
            .subscribe(SubscribeCommand::PSubscribe, Bytes::from("chat.*"))
            .await
            .unwrap();
        let _ = push_rx.recv().await;
        let _ = push_rx.recv().await;

        let receivers = transport
            .publish(
                PublishCommand::Publish,
                Bytes::from("chat.room1"),
                Bytes::from("hi"),
            )
            .await
            .unwrap();
        assert_eq!(receivers, 2);

        let first = push_rx.recv().await.unwrap();
        assert_eq!(first.kind, PushKind::Message);
        let second = push_rx.recv().await.unwrap();
        assert_eq!(second.kind, PushKind::PMessage);
        assert_eq!(
            second.data,
            vec![
                PushValue::from("chat.*"),
                PushValue::from("chat.room1"),
                PushValue::from("hi")
            ]
        );
    }

    #[tokio::test]
    async fn test_sharded_requires_cluster() {
        let server = MemoryServer::standalone();
        let (push_tx, _push_rx) = push_channel();
        let transport = server.connect(push_tx);

        let result = transport
            .subscribe(SubscribeCommand::SSubscribe, Bytes::from("orders"))
            .await;
        assert_matches!(result, Err(TransportError::Server(_)));

        let result = transport
            .publish(
                PublishCommand::SPublish,
                Bytes::from("orders"),
                Bytes::from("x"),
            )
            .await;
        assert_matches!(result, Err(TransportError::Server(_)));
    }

    #[tokio::test]
    async fn test_sharded_publish_in_cluster() {
        let server = MemoryServer::cluster();
        let (push_tx, mut push_rx) = push_channel();
        let transport = server.connect(push_tx);

        transport
            .subscribe(SubscribeCommand::SSubscribe, Bytes::from("orders"))
            .await
            .unwrap();
        let _ = push_rx.recv().await;

        let receivers = transport
            .publish(
                PublishCommand::SPublish,
                Bytes::from("orders"),
                Bytes::from("new"),
            )
            .await
            .unwrap();
        assert_eq!(receivers, 1);

        let push = push_rx.recv().await.unwrap();
        assert_eq!(push.kind, PushKind::SMessage);
    }

    #[tokio::test]
    async fn test_unsubscribe_all_without_subscriptions() {
        let server = MemoryServer::standalone();
        let (push_tx, mut push_rx) = push_channel();
        let transport = server.connect(push_tx);

        transport
            .unsubscribe_all(UnsubscribeCommand::PUnsubscribe)
            .await
            .unwrap();

        let push = push_rx.recv().await.unwrap();
        assert_eq!(push.kind, PushKind::PUnsubscribe);
        assert_eq!(push.data, vec![PushValue::Nil, PushValue::Int(0)]);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let server = MemoryServer::standalone();
        let (push_tx, _push_rx) = push_channel();
        let transport = server.connect(push_tx);

        server.fail_next_commands(1);

        let result = transport
            .subscribe(SubscribeCommand::Subscribe, Bytes::from("news"))
            .await;
        assert_matches!(result, Err(TransportError::Server(_)));

        transport
            .subscribe(SubscribeCommand::Subscribe, Bytes::from("news"))
            .await
            .unwrap();
        assert_eq!(server.commands().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_orders_by_arrival() {
        let server = MemoryServer::new(MemoryServerOptions {
            latency: Duration::from_millis(50),
            ..MemoryServerOptions::default()
        });
        let (push_tx, _push_rx) = push_channel();
        let transport = server.connect(push_tx);

        let slow = {
            let transport = transport.clone();
            tokio::spawn(async move {
                transport
                    .subscribe(SubscribeCommand::Subscribe, Bytes::from("news"))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(server.commands().is_empty());

        server.set_latency(Duration::ZERO);
        transport
            .subscribe(SubscribeCommand::PSubscribe, Bytes::from("chat.*"))
            .await
            .unwrap();
        slow.await.unwrap().unwrap();

        assert_eq!(
            server.commands(),
            vec![
                RecordedCommand::Subscribe(SubscribeCommand::PSubscribe, Bytes::from("chat.*")),
                RecordedCommand::Subscribe(SubscribeCommand::Subscribe, Bytes::from("news")),
            ]
        );
    }

    #[tokio::test]
    async fn test_disconnect() {
        let server = MemoryServer::standalone();
        let (push_tx, mut push_rx) = push_channel();
        let transport = server.connect(push_tx);
        assert_eq!(server.connection_count(), 1);

        server.disconnect(transport.id());
        assert_eq!(server.connection_count(), 0);

        let push = push_rx.recv().await.unwrap();
        assert_eq!(push.kind, PushKind::Disconnection);

        let result = transport
            .subscribe(SubscribeCommand::Subscribe, Bytes::from("news"))
            .await;
        assert_matches!(result, Err(TransportError::Disconnected));
    }
}
