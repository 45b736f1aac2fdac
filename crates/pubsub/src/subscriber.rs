use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use kvmux_transport::{PushNotification, PushReceiver, Transport, UnsubscribeCommand};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{OwnedMutexGuard, RwLock, RwLockReadGuard, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::channel::Channel;
use crate::config::PubSubConfig;
use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::push::{Inbound, decode};
use crate::queue::{ChannelQueue, ReleaseHook};
use crate::registry::SubscriptionRegistry;

type Gate = Arc<tokio::sync::Mutex<()>>;

struct Listener {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Exclusive right to change one channel's registration and to issue the
/// server command that change calls for.
struct ChannelGuard<'a> {
    gates: &'a DashMap<Channel, Gate>,
    channel: Channel,
    gate: Option<OwnedMutexGuard<()>>,
    _transitions: RwLockReadGuard<'a, ()>,
}

impl Drop for ChannelGuard<'_> {
    fn drop(&mut self) {
        drop(self.gate.take());

        // Only the map still holds the gate, so nobody waits on it
        self.gates.remove_if(&self.channel, |_, gate| Arc::strong_count(gate) == 1);
    }
}

struct SubscriberInner<T>
where
    T: Transport,
{
    transport: T,
    config: PubSubConfig,
    registry: Arc<SubscriptionRegistry>,
    gates: DashMap<Channel, Gate>,
    transitions: RwLock<()>,
    runtime: Option<Handle>,
    listener: Mutex<Option<Listener>>,
}

impl<T> Drop for SubscriberInner<T>
where
    T: Transport,
{
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            let _ = listener.shutdown.send(());
        }
        self.registry.remove_all();
    }
}

/// Multiplexes local subscribers over one connection.
///
/// Any number of handlers and queues can subscribe to the same channel; the
/// server sees one subscription, issued when the first local subscriber
/// arrives and withdrawn when the last one leaves. Changes to one channel are
/// applied one at a time, each together with its server command, so a caller
/// that returns `Ok` is covered by a server subscription. Cloning shares the
/// state.
pub struct Subscriber<T>
where
    T: Transport,
{
    inner: Arc<SubscriberInner<T>>,
}

impl<T> Clone for Subscriber<T>
where
    T: Transport,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Subscriber<T>
where
    T: Transport,
{
    /// Creates a subscriber and starts routing the push notifications of `push`.
    ///
    /// Handlers run on the runtime the subscriber was created in.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(transport: T, config: PubSubConfig, push: PushReceiver) -> Self {
        let runtime = Handle::current();
        let registry = Arc::new(SubscriptionRegistry::new());
        let listener = spawn_listener(&runtime, registry.clone(), push);

        Self::with_parts(transport, config, registry, Some(runtime), Some(listener))
    }

    /// Creates a subscriber without a listener.
    ///
    /// Push notifications must be fed through [`Self::handle_push`]. Handlers
    /// run on the runtime current at construction, if there is one.
    pub fn detached(transport: T, config: PubSubConfig) -> Self {
        Self::with_parts(
            transport,
            config,
            Arc::new(SubscriptionRegistry::new()),
            Handle::try_current().ok(),
            None,
        )
    }

    fn with_parts(
        transport: T,
        config: PubSubConfig,
        registry: Arc<SubscriptionRegistry>,
        runtime: Option<Handle>,
        listener: Option<Listener>,
    ) -> Self {
        Self {
            inner: Arc::new(SubscriberInner {
                transport,
                config,
                registry,
                gates: DashMap::new(),
                transitions: RwLock::new(()),
                runtime,
                listener: Mutex::new(listener),
            }),
        }
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &PubSubConfig {
        &self.inner.config
    }

    /// Local subscription state.
    #[must_use]
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.inner.registry
    }

    /// Builds a channel from a bare name using the configured pattern detection.
    pub fn channel(&self, name: impl Into<Bytes>) -> Channel {
        Channel::infer(name, self.inner.config.pattern_detection)
    }

    /// Whether anything is subscribed locally to `channel`.
    #[must_use]
    pub fn is_subscribed(&self, channel: &Channel) -> bool {
        self.inner.registry.contains(channel)
    }

    /// Registers a handler on `channel`.
    ///
    /// Only the first local subscriber causes a server round trip. If that
    /// round trip fails, the handler is unregistered again and the error is
    /// returned. A caller arriving while that round trip is in flight waits for
    /// it and, if it failed, issues its own.
    ///
    /// # Errors
    ///
    /// Validation and configuration errors are returned before any state
    /// changes. Transport errors come from the server subscribe.
    pub async fn subscribe(&self, channel: Channel, handler: Handler) -> Result<()> {
        self.validate(&channel)?;
        let _guard = self.lock_channel(&channel).await;

        if self.inner.registry.add_handler(&channel, handler.clone()) {
            if let Err(e) = self.server_subscribe(&channel).await {
                self.inner.registry.remove_handler(&channel, &handler);
                return Err(e);
            }
        }

        Ok(())
    }

    /// Registers a new queue on `channel` and returns it.
    ///
    /// Dropping the queue unregisters it as [`Self::unsubscribe_queue`] would,
    /// on a task of the subscriber's runtime.
    ///
    /// # Errors
    ///
    /// As for [`Self::subscribe`].
    pub async fn subscribe_queue(&self, channel: Channel) -> Result<ChannelQueue> {
        self.validate(&channel)?;

        let mut queue = ChannelQueue::new(channel);
        queue.on_release(self.release_hook());

        let _guard = self.lock_channel(queue.channel()).await;
        if self.inner.registry.add_queue(&queue) {
            if let Err(e) = self.server_subscribe(queue.channel()).await {
                self.inner.registry.remove_queue(queue.channel(), queue.id());
                return Err(e);
            }
        }

        Ok(queue)
    }

    /// Removes one handler from `channel`, or every handler and queue when
    /// `handler` is `None`.
    ///
    /// The server is told only when nothing local remains. Removing something
    /// that is not registered is a no-op.
    ///
    /// # Errors
    ///
    /// Validation and configuration errors, or the transport error of the
    /// server unsubscribe. Local state is already updated when a transport
    /// error is returned.
    pub async fn unsubscribe(&self, channel: &Channel, handler: Option<&Handler>) -> Result<()> {
        self.validate(channel)?;
        let _guard = self.lock_channel(channel).await;

        let emptied = match handler {
            Some(handler) => self.inner.registry.remove_handler(channel, handler),
            None => self.inner.registry.remove_channel(channel),
        };

        if emptied {
            self.server_unsubscribe(channel).await?;
        }

        Ok(())
    }

    /// Removes and completes `queue`.
    ///
    /// # Errors
    ///
    /// As for [`Self::unsubscribe`].
    pub async fn unsubscribe_queue(&self, queue: &ChannelQueue) -> Result<()> {
        queue.complete();
        self.release_queue(queue.channel(), queue.id()).await
    }

    /// Drops every local subscription, then asks the server to drop every
    /// subscription of each kind.
    ///
    /// Waits for in-flight channel changes to finish first. Every
    /// unsubscribe-all command is attempted even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// The first transport error encountered.
    pub async fn unsubscribe_all(&self) -> Result<()> {
        let _transitions = self.inner.transitions.write().await;

        let channels = self.inner.registry.remove_all();
        debug!("Removed {} local subscriptions", channels.len());

        let mut commands = vec![UnsubscribeCommand::Unsubscribe, UnsubscribeCommand::PUnsubscribe];
        if self.inner.transport.is_cluster() {
            commands.push(UnsubscribeCommand::SUnsubscribe);
        }

        let mut first_error = None;
        for command in commands {
            if let Err(e) = self.inner.transport.unsubscribe_all(command).await {
                warn!("{} failed: {}", command, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Publishes `message` on `channel` and returns the receiver count
    /// reported by the server.
    ///
    /// # Errors
    ///
    /// Validation and configuration errors, or the transport error of the
    /// publish.
    pub async fn publish(&self, channel: &Channel, message: impl Into<Bytes>) -> Result<u64> {
        self.validate(channel)?;

        let receivers = self
            .inner
            .transport
            .publish(channel.publish_command(), channel.name().clone(), message.into())
            .await?;
        trace!("Published to {} ({} receivers)", channel, receivers);

        Ok(receivers)
    }

    /// Routes one push notification to local subscribers.
    ///
    /// Handlers are spawned on the subscriber's runtime, or on the current one
    /// if the subscriber was created outside a runtime. With neither, only
    /// queues receive the message and the skipped handlers are logged.
    pub fn handle_push(&self, notification: PushNotification) {
        route(&self.inner.registry, notification, self.runtime().as_ref());
    }

    /// Stops the listener and drops every local subscription.
    ///
    /// Waits up to the configured shutdown timeout for the listener before
    /// aborting it. Calling `close` again is a no-op.
    pub async fn close(&self) {
        let listener = self.inner.listener.lock().take();

        if let Some(Listener { shutdown, mut task }) = listener {
            let _ = shutdown.send(());
            match tokio::time::timeout(self.inner.config.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => debug!("Listener stopped"),
                Ok(Err(e)) => warn!("Listener task failed: {}", e),
                Err(_) => {
                    warn!("Listener did not stop in time, aborting");
                    task.abort();
                }
            }
        }

        let channels = self.inner.registry.remove_all();
        if !channels.is_empty() {
            debug!("Closed with {} local subscriptions", channels.len());
        }
    }

    fn runtime(&self) -> Option<Handle> {
        self.inner
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
    }

    async fn lock_channel(&self, channel: &Channel) -> ChannelGuard<'_> {
        let transitions = self.inner.transitions.read().await;
        let gate = self.inner.gates.entry(channel.clone()).or_default().clone();

        ChannelGuard {
            gates: &self.inner.gates,
            channel: channel.clone(),
            gate: Some(gate.lock_owned().await),
            _transitions: transitions,
        }
    }

    async fn release_queue(&self, channel: &Channel, id: Uuid) -> Result<()> {
        let _guard = self.lock_channel(channel).await;

        if self.inner.registry.remove_queue(channel, id) {
            self.server_unsubscribe(channel).await?;
        }

        Ok(())
    }

    fn release_hook(&self) -> ReleaseHook {
        let inner = Arc::downgrade(&self.inner);
        let runtime = self.runtime();

        Box::new(move |id, channel| {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let subscriber = Self { inner };

            match runtime {
                Some(runtime) => {
                    runtime.spawn(async move {
                        trace!("Releasing dropped queue {} on {}", id, channel);
                        if let Err(e) = subscriber.release_queue(&channel, id).await {
                            warn!("Releasing dropped queue on {} failed: {}", channel, e);
                        }
                    });
                }
                None => {
                    if subscriber.inner.registry.remove_queue(&channel, id) {
                        warn!(
                            "Last queue on {} dropped without a runtime; server subscription kept",
                            channel
                        );
                    }
                }
            }
        })
    }

    fn validate(&self, channel: &Channel) -> Result<()> {
        if channel.is_empty() {
            return Err(Error::Validation("channel name must not be empty"));
        }

        if channel.is_sharded() && !self.inner.transport.is_cluster() {
            return Err(Error::Configuration(channel.to_string()));
        }

        Ok(())
    }

    async fn server_subscribe(&self, channel: &Channel) -> Result<()> {
        let command = channel.subscribe_command();
        debug!("{} {}", command, channel);

        self.inner
            .transport
            .subscribe(command, channel.name().clone())
            .await
            .map_err(|e| {
                warn!("{} {} failed: {}", command, channel, e);
                Error::from(e)
            })
    }

    async fn server_unsubscribe(&self, channel: &Channel) -> Result<()> {
        let command = channel.unsubscribe_command();
        debug!("{} {}", command, channel);

        self.inner
            .transport
            .unsubscribe(command, channel.name().clone())
            .await
            .map_err(|e| {
                warn!("{} {} failed: {}", command, channel, e);
                Error::from(e)
            })
    }
}

fn spawn_listener(
    runtime: &Handle,
    registry: Arc<SubscriptionRegistry>,
    mut push: PushReceiver,
) -> Listener {
    let (shutdown, mut shutdown_rx) = oneshot::channel();
    let handlers = runtime.clone();

    let task = runtime.spawn(async move {
        info!("Pub/sub listener started");

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    debug!("Pub/sub listener received shutdown");
                    break;
                }
                notification = push.recv() => {
                    let Some(notification) = notification else {
                        info!("Push channel closed");
                        break;
                    };
                    route(&registry, notification, Some(&handlers));
                }
            }
        }

        info!("Pub/sub listener stopped");
    });

    Listener { shutdown, task }
}

fn route(
    registry: &SubscriptionRegistry,
    notification: PushNotification,
    runtime: Option<&Handle>,
) {
    match decode(notification) {
        Some(Inbound::Message(message)) => {
            registry.dispatch(&message, runtime);
        }
        Some(Inbound::Confirmation {
            kind,
            channel,
            count,
        }) => {
            trace!(
                "{:?} confirmed for {} ({:?} active)",
                kind,
                String::from_utf8_lossy(&channel),
                count
            );
        }
        Some(Inbound::Disconnected) => {
            warn!("Connection lost; server-side subscriptions must be restored by the transport");
        }
        None => {}
    }
}
