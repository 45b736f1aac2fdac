use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{trace, warn};
use uuid::Uuid;

use crate::channel::Channel;
use crate::handler::Handler;
use crate::message::ChannelMessage;
use crate::queue::QueueSender;

#[derive(Debug, Default)]
struct Targets {
    handlers: Arc<Vec<Handler>>,
    queues: Arc<Vec<QueueSender>>,
}

impl Targets {
    fn is_empty(&self) -> bool {
        self.handlers.is_empty() && self.queues.is_empty()
    }
}

/// Local delivery targets for one channel.
///
/// Writers replace the target lists copy-on-write, so a dispatch works on a
/// snapshot and never waits on registration changes.
#[derive(Debug)]
pub struct Subscription {
    channel: Channel,
    targets: Mutex<Targets>,
}

impl Subscription {
    /// Creates a subscription with no targets.
    #[must_use]
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            targets: Mutex::new(Targets::default()),
        }
    }

    /// The channel this subscription is for.
    #[must_use]
    pub const fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Adds a handler. Returns true if the subscription had no targets before.
    pub fn add_handler(&self, handler: Handler) -> bool {
        let mut targets = self.targets.lock();
        let was_empty = targets.is_empty();
        Arc::make_mut(&mut targets.handlers).push(handler);
        was_empty
    }

    /// Adds a queue. Returns true if the subscription had no targets before.
    pub(crate) fn add_queue(&self, queue: QueueSender) -> bool {
        let mut targets = self.targets.lock();
        let was_empty = targets.is_empty();
        Arc::make_mut(&mut targets.queues).push(queue);
        was_empty
    }

    /// Removes the most recent registration of `handler`. Returns whether one was found.
    pub fn remove_handler(&self, handler: &Handler) -> bool {
        let mut targets = self.targets.lock();
        let Some(position) = targets.handlers.iter().rposition(|h| h == handler) else {
            return false;
        };
        Arc::make_mut(&mut targets.handlers).remove(position);
        true
    }

    /// Removes the queue with `id` and completes it. Returns whether it was found.
    pub(crate) fn remove_queue(&self, id: Uuid) -> bool {
        let removed = {
            let mut targets = self.targets.lock();
            let Some(position) = targets.queues.iter().position(|q| q.id() == id) else {
                return false;
            };
            Arc::make_mut(&mut targets.queues).remove(position)
        };
        removed.complete();
        true
    }

    /// Drops every target, completing the queues.
    pub fn clear(&self) {
        let queues = {
            let mut targets = self.targets.lock();
            targets.handlers = Arc::default();
            std::mem::take(&mut targets.queues)
        };

        for queue in queues.iter() {
            queue.complete();
        }
    }

    /// Whether no handler or queue is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.lock().is_empty()
    }

    /// Number of handler registrations.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.targets.lock().handlers.len()
    }

    /// Number of queues.
    #[must_use]
    pub fn queue_count(&self) -> usize {
        self.targets.lock().queues.len()
    }

    /// Delivers a message to every target.
    ///
    /// Queues are written in registration order on the calling task. Each
    /// handler runs on its own task spawned on `runtime`; errors and panics are
    /// logged and dropped. Without a runtime, handlers are skipped and only the
    /// queues receive the message.
    pub fn dispatch(&self, message: &ChannelMessage, runtime: Option<&Handle>) {
        let (handlers, queues) = {
            let targets = self.targets.lock();
            (targets.handlers.clone(), targets.queues.clone())
        };

        for queue in queues.iter() {
            if !queue.push(message.clone()) {
                trace!("Skipping completed queue {} on {}", queue.id(), self.channel);
            }
        }

        if handlers.is_empty() {
            return;
        }

        let Some(runtime) = runtime else {
            warn!(
                "No runtime to run {} handlers on {}, message skipped",
                handlers.len(),
                self.channel
            );
            return;
        };

        for handler in handlers.iter() {
            spawn_handler(runtime, handler.clone(), message.clone());
        }
    }
}

fn spawn_handler(runtime: &Handle, handler: Handler, message: ChannelMessage) {
    runtime.spawn(async move {
        let channel = message.subscription().clone();
        match AssertUnwindSafe(handler.invoke(message)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Handler on {} failed: {}", channel, e),
            Err(_) => warn!("Handler on {} panicked", channel),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ChannelQueue;

    use std::time::Duration;

    use bytes::Bytes;
    use tokio::sync::mpsc;
    use tracing_test::traced_test;

    fn message(payload: &'static str) -> ChannelMessage {
        ChannelMessage::new(
            Channel::literal("news"),
            Channel::literal("news"),
            Bytes::from_static(payload.as_bytes()),
        )
    }

    #[test]
    fn test_was_empty_transitions() {
        let subscription = Subscription::new(Channel::literal("news"));
        let queue = ChannelQueue::new(Channel::literal("news"));
        let a = Handler::from_fn(|_| {});
        let b = Handler::from_fn(|_| {});

        assert!(subscription.add_handler(a.clone()));
        assert!(!subscription.add_handler(b.clone()));
        assert!(!subscription.add_queue(queue.sender()));

        assert!(subscription.remove_handler(&a));
        assert!(subscription.remove_handler(&b));
        assert!(!subscription.remove_handler(&b));
        assert!(!subscription.is_empty());

        assert!(subscription.remove_queue(queue.id()));
        assert!(subscription.is_empty());
        assert!(queue.is_completed());
    }

    #[test]
    fn test_remove_last_duplicate() {
        let subscription = Subscription::new(Channel::literal("news"));
        let handler = Handler::from_fn(|_| {});

        subscription.add_handler(handler.clone());
        subscription.add_handler(handler.clone());
        assert_eq!(subscription.handler_count(), 2);

        assert!(subscription.remove_handler(&handler));
        assert_eq!(subscription.handler_count(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_to_handlers_and_queues() {
        let subscription = Subscription::new(Channel::literal("news"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        subscription.add_handler(Handler::from_fn(move |m| {
            let _ = tx.send(m);
        }));
        let first = ChannelQueue::new(Channel::literal("news"));
        let second = ChannelQueue::new(Channel::literal("news"));
        subscription.add_queue(first.sender());
        subscription.add_queue(second.sender());

        let runtime = Handle::current();
        subscription.dispatch(&message("one"), Some(&runtime));
        subscription.dispatch(&message("two"), Some(&runtime));

        for queue in [&first, &second] {
            assert_eq!(queue.try_recv().unwrap().payload(), "one");
            assert_eq!(queue.try_recv().unwrap().payload(), "two");
        }

        let mut seen = Vec::new();
        for _ in 0..2 {
            let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(received.into_payload());
        }
        seen.sort();
        assert_eq!(seen, vec![Bytes::from("one"), Bytes::from("two")]);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_panicking_handler_is_isolated() {
        let subscription = Subscription::new(Channel::literal("news"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        subscription.add_handler(Handler::from_fn(|_| panic!("boom")));
        subscription.add_handler(Handler::from_fn(move |m| {
            let _ = tx.send(m);
        }));

        let runtime = Handle::current();
        subscription.dispatch(&message("survives"), Some(&runtime));

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.payload(), "survives");

        // The dispatching side is unaffected
        subscription.dispatch(&message("again"), Some(&runtime));
        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.payload(), "again");
    }

    #[test]
    #[traced_test]
    fn test_dispatch_without_runtime_feeds_queues() {
        let subscription = Subscription::new(Channel::literal("news"));
        let queue = ChannelQueue::new(Channel::literal("news"));
        subscription.add_handler(Handler::from_fn(|_| panic!("must not run")));
        subscription.add_queue(queue.sender());

        subscription.dispatch(&message("queued"), None);

        assert_eq!(queue.try_recv().unwrap().payload(), "queued");
        assert!(logs_contain("No runtime to run 1 handlers on news"));
    }

    #[test]
    fn test_clear_completes_queues() {
        let subscription = Subscription::new(Channel::literal("news"));
        let queue = ChannelQueue::new(Channel::literal("news"));
        subscription.add_queue(queue.sender());
        subscription.add_handler(Handler::from_fn(|_| {}));

        subscription.clear();

        assert!(subscription.is_empty());
        assert!(queue.is_completed());
    }
}
