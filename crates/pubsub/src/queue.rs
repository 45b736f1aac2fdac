use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::channel::Channel;
use crate::error::TryRecvError;
use crate::message::ChannelMessage;

#[derive(Debug, Default)]
struct QueueState {
    buffer: VecDeque<ChannelMessage>,
    completed: bool,
}

#[derive(Debug)]
struct QueueShared {
    id: Uuid,
    channel: Channel,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl QueueShared {
    fn complete(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.completed {
                return false;
            }
            state.completed = true;
        }

        // Wake every parked reader plus a reader that is about to park
        self.notify.notify_waiters();
        self.notify.notify_one();
        true
    }
}

/// Write half of a [`ChannelQueue`], held by the subscription it is registered on.
#[derive(Clone, Debug)]
pub(crate) struct QueueSender {
    shared: Arc<QueueShared>,
}

impl QueueSender {
    pub(crate) fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Appends a message. Returns false once the queue is completed.
    pub(crate) fn push(&self, message: ChannelMessage) -> bool {
        {
            let mut state = self.shared.state.lock();
            if state.completed {
                return false;
            }
            state.buffer.push_back(message);
        }

        self.shared.notify.notify_one();
        true
    }

    pub(crate) fn complete(&self) -> bool {
        self.shared.complete()
    }
}

/// Called once when a queue is dropped, with the queue's id and channel.
pub(crate) type ReleaseHook = Box<dyn FnOnce(Uuid, Channel) + Send + Sync>;

/// An ordered, unbounded buffer of messages for one subscription.
///
/// Messages are read in the order they were dispatched. After the queue is
/// completed, buffered messages can still be drained; once the buffer is empty
/// reads return end of stream.
///
/// Dropping the queue completes it. A queue handed out by a subscriber is also
/// unregistered on drop, releasing the server subscription if it was the last
/// local target.
pub struct ChannelQueue {
    shared: Arc<QueueShared>,
    release: Option<ReleaseHook>,
}

impl fmt::Debug for ChannelQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelQueue")
            .field("id", &self.shared.id)
            .field("channel", &self.shared.channel)
            .field("state", &self.shared.state)
            .finish_non_exhaustive()
    }
}

impl Drop for ChannelQueue {
    fn drop(&mut self) {
        self.shared.complete();
        if let Some(release) = self.release.take() {
            release(self.shared.id, self.shared.channel.clone());
        }
    }
}

impl ChannelQueue {
    /// Creates a queue bound to `channel`.
    pub(crate) fn new(channel: Channel) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                id: Uuid::new_v4(),
                channel,
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
            }),
            release: None,
        }
    }

    pub(crate) fn on_release(&mut self, hook: ReleaseHook) {
        self.release = Some(hook);
    }

    pub(crate) fn sender(&self) -> QueueSender {
        QueueSender {
            shared: self.shared.clone(),
        }
    }

    /// Unique id of the queue.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// The subscription the queue is registered on.
    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.shared.channel
    }

    /// Waits for the next message. Returns `None` once completed and drained.
    pub async fn recv(&self) -> Option<ChannelMessage> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_recv() {
                Ok(message) => return Some(message),
                Err(TryRecvError::Completed) => return None,
                Err(TryRecvError::Empty) => notified.await,
            }
        }
    }

    /// Takes the next message without waiting.
    ///
    /// # Errors
    ///
    /// [`TryRecvError::Empty`] if nothing is buffered, [`TryRecvError::Completed`]
    /// if the queue is completed and drained.
    pub fn try_recv(&self) -> Result<ChannelMessage, TryRecvError> {
        let mut state = self.shared.state.lock();
        match state.buffer.pop_front() {
            Some(message) => Ok(message),
            None if state.completed => Err(TryRecvError::Completed),
            None => Err(TryRecvError::Empty),
        }
    }

    /// Blocks the current thread until the next message.
    ///
    /// Must not be called from inside an async runtime.
    #[must_use]
    pub fn blocking_recv(&self) -> Option<ChannelMessage> {
        futures::executor::block_on(self.recv())
    }

    /// Marks the queue complete. Returns false if it already was.
    pub fn complete(&self) -> bool {
        self.shared.complete()
    }

    /// Whether the queue stopped accepting messages.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.shared.state.lock().completed
    }

    /// Number of buffered messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.state.lock().buffer.len()
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Converts the queue into a stream that ends when the queue completes.
    pub fn into_stream(self) -> impl Stream<Item = ChannelMessage> + Send {
        futures::stream::unfold(self, |queue| async move {
            let message = queue.recv().await?;
            Some((message, queue))
        })
    }
}
