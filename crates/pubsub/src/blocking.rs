use bytes::Bytes;
use kvmux_transport::{PushReceiver, Transport};
use tokio::runtime::{Builder, Runtime};

use crate::channel::Channel;
use crate::config::PubSubConfig;
use crate::error::Result;
use crate::handler::Handler;
use crate::queue::ChannelQueue;
use crate::subscriber::Subscriber;

/// Synchronous front for [`Subscriber`], backed by its own runtime.
///
/// Handlers still run on the runtime's worker threads. Must not be created,
/// used or dropped from inside another async runtime.
pub struct BlockingSubscriber<T>
where
    T: Transport,
{
    subscriber: Subscriber<T>,
    runtime: Runtime,
}

impl<T> BlockingSubscriber<T>
where
    T: Transport,
{
    /// Builds the runtime from `config` and starts the subscriber on it.
    ///
    /// # Errors
    ///
    /// [`Error::Runtime`](crate::Error::Runtime) if the runtime cannot be built.
    pub fn new(transport: T, config: PubSubConfig, push: PushReceiver) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name(config.thread_name.clone())
            .enable_all()
            .build()?;

        let subscriber = {
            let _guard = runtime.enter();
            Subscriber::new(transport, config, push)
        };

        Ok(Self {
            subscriber,
            runtime,
        })
    }

    /// The async subscriber this wraps.
    #[must_use]
    pub const fn subscriber(&self) -> &Subscriber<T> {
        &self.subscriber
    }

    /// See [`Subscriber::channel`].
    pub fn channel(&self, name: impl Into<Bytes>) -> Channel {
        self.subscriber.channel(name)
    }

    /// See [`Subscriber::subscribe`].
    ///
    /// # Errors
    ///
    /// As for [`Subscriber::subscribe`].
    pub fn subscribe(&self, channel: Channel, handler: Handler) -> Result<()> {
        self.runtime.block_on(self.subscriber.subscribe(channel, handler))
    }

    /// See [`Subscriber::subscribe_queue`].
    ///
    /// # Errors
    ///
    /// As for [`Subscriber::subscribe_queue`].
    pub fn subscribe_queue(&self, channel: Channel) -> Result<ChannelQueue> {
        self.runtime.block_on(self.subscriber.subscribe_queue(channel))
    }

    /// See [`Subscriber::unsubscribe`].
    ///
    /// # Errors
    ///
    /// As for [`Subscriber::unsubscribe`].
    pub fn unsubscribe(&self, channel: &Channel, handler: Option<&Handler>) -> Result<()> {
        self.runtime.block_on(self.subscriber.unsubscribe(channel, handler))
    }

    /// See [`Subscriber::unsubscribe_queue`].
    ///
    /// # Errors
    ///
    /// As for [`Subscriber::unsubscribe_queue`].
    pub fn unsubscribe_queue(&self, queue: &ChannelQueue) -> Result<()> {
        self.runtime.block_on(self.subscriber.unsubscribe_queue(queue))
    }

    /// See [`Subscriber::unsubscribe_all`].
    ///
    /// # Errors
    ///
    /// As for [`Subscriber::unsubscribe_all`].
    pub fn unsubscribe_all(&self) -> Result<()> {
        self.runtime.block_on(self.subscriber.unsubscribe_all())
    }

    /// See [`Subscriber::publish`].
    ///
    /// # Errors
    ///
    /// As for [`Subscriber::publish`].
    pub fn publish(&self, channel: &Channel, message: impl Into<Bytes>) -> Result<u64> {
        self.runtime.block_on(self.subscriber.publish(channel, message))
    }

    /// Stops the listener, then shuts the runtime down.
    pub fn close(self) {
        self.runtime.block_on(self.subscriber.close());
    }
}
