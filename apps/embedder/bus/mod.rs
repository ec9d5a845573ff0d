//! Publish/subscribe over the two coordination channels.
//!
//! Delivery is best effort: a message reaches only the subscriptions that
//! exist at publish time. There is no replay and no acknowledgement.

mod memory;
mod redis_bus;

pub use memory::MemoryBus;
pub use redis_bus::RedisBus;

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Payload published on [`Channel::Shutdown`]. Listeners do not interpret it.
pub const SHUTDOWN_TOKEN: &str = "shutdown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Carries the id of every newly stored embedding.
    NewEmbedding,
    Shutdown,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::NewEmbedding => "new_embedding",
            Channel::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Message(String),
    /// Nothing arrived within the wait. Not an error.
    Timeout,
}

#[async_trait]
pub trait NotificationBus: Send + Sync {
    async fn publish(&self, channel: Channel, payload: &str) -> Result<()>;

    async fn subscribe(&self, channel: Channel) -> Result<Box<dyn Subscription>>;
}

#[async_trait]
pub trait Subscription: Send {
    fn channel(&self) -> Channel;

    /// Waits at most `timeout` for the next message. Must be cancel safe:
    /// dropping the future loses no message that was not yet returned.
    async fn receive(&mut self, timeout: Duration) -> Result<Received>;

    /// Releases the server-side subscription. Calling it again is a no-op.
    async fn unsubscribe(&mut self) -> Result<()>;
}
