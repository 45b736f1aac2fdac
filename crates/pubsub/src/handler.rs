use std::error::Error;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::message::ChannelMessage;

/// Error type erased from handlers once they are registered.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Marker trait for handler errors
pub trait SubscriptionHandlerError: Error + Send + Sync + 'static {}

/// A trait representing a callback subscriber of a channel.
#[async_trait]
pub trait SubscriptionHandler: Send + Sync + 'static {
    /// The error type for the handler.
    type Error: SubscriptionHandlerError;

    /// Handles one message.
    async fn handle(&self, message: ChannelMessage) -> Result<(), Self::Error>;
}

#[async_trait]
trait ErasedHandler: Send + Sync {
    async fn invoke(&self, message: ChannelMessage) -> Result<(), HandlerError>;
}

#[async_trait]
impl<X> ErasedHandler for X
where
    X: SubscriptionHandler,
{
    async fn invoke(&self, message: ChannelMessage) -> Result<(), HandlerError> {
        self.handle(message)
            .await
            .map_err(|e| Box::new(e) as HandlerError)
    }
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> ErasedHandler for FnHandler<F>
where
    F: Fn(ChannelMessage) + Send + Sync + 'static,
{
    async fn invoke(&self, message: ChannelMessage) -> Result<(), HandlerError> {
        (self.0)(message);
        Ok(())
    }
}

/// A registered callback.
///
/// Cloning shares the callback. Equality is identity: two handlers are equal
/// only if one was cloned from the other, which is what `unsubscribe` uses to
/// find the registration to remove.
#[derive(Clone)]
pub struct Handler {
    inner: Arc<dyn ErasedHandler>,
}

impl Handler {
    /// Wraps a [`SubscriptionHandler`].
    pub fn new<X>(handler: X) -> Self
    where
        X: SubscriptionHandler,
    {
        Self {
            inner: Arc::new(handler),
        }
    }

    /// Wraps a plain closure.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(ChannelMessage) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(FnHandler(f)),
        }
    }

    pub(crate) async fn invoke(&self, message: ChannelMessage) -> Result<(), HandlerError> {
        self.inner.invoke(message).await
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.inner).cast::<()>()
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Handler {}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.addr()).finish()
    }
}
