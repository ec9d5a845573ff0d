use super::{Channel, NotificationBus, Received, Subscription};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

const CHANNEL_CAPACITY: usize = 1024;
/// Payloads kept per channel for [`MemoryBus::published`]; older ones drop.
const PUBLISHED_HISTORY: usize = 256;

/// In-process bus. Clones share the same channels, so several coordinators
/// built on clones of one `MemoryBus` behave like processes sharing a
/// Redis server.
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<Inner>,
}

struct Inner {
    senders: Mutex<Option<HashMap<Channel, broadcast::Sender<Vec<u8>>>>>,
    stats: Mutex<BusStats>,
}

#[derive(Debug, Default, Clone)]
struct BusStats {
    active: HashMap<Channel, usize>,
    unsubscribes: HashMap<Channel, usize>,
    published: HashMap<Channel, VecDeque<Vec<u8>>>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        let mut senders = HashMap::new();
        for channel in [Channel::NewEmbedding, Channel::Shutdown] {
            let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
            senders.insert(channel, tx);
        }

        Self {
            inner: Arc::new(Inner {
                senders: Mutex::new(Some(senders)),
                stats: Mutex::new(BusStats::default()),
            }),
        }
    }

    /// Publishes raw bytes, bypassing UTF-8 text payloads.
    pub fn publish_bytes(&self, channel: Channel, payload: Vec<u8>) -> Result<()> {
        let sender = self.sender(channel)?;
        {
            let mut stats = self.stats();
            let history = stats.published.entry(channel).or_default();
            if history.len() == PUBLISHED_HISTORY {
                history.pop_front();
            }
            history.push_back(payload.clone());
        }
        // No receivers is not a failure for a fire-and-forget publish.
        let _ = sender.send(payload);
        Ok(())
    }

    /// Simulates losing the server: live subscriptions fail on their next
    /// receive, and every later publish or subscribe fails.
    pub fn close(&self) {
        self.inner
            .senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    pub fn active_subscriptions(&self, channel: Channel) -> usize {
        self.stats().active.get(&channel).copied().unwrap_or(0)
    }

    pub fn unsubscribe_count(&self, channel: Channel) -> usize {
        self.stats().unsubscribes.get(&channel).copied().unwrap_or(0)
    }

    /// The most recent payloads published on `channel`, oldest first and
    /// lossily decoded.
    pub fn published(&self, channel: Channel) -> Vec<String> {
        self.stats()
            .published
            .get(&channel)
            .map(|payloads| {
                payloads
                    .iter()
                    .map(|p| String::from_utf8_lossy(p).into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn sender(&self, channel: Channel) -> Result<broadcast::Sender<Vec<u8>>> {
        self.inner
            .senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(|senders| senders.get(&channel).cloned())
            .ok_or_else(|| Error::BusUnavailable("memory bus closed".to_string()))
    }

    fn stats(&self) -> std::sync::MutexGuard<'_, BusStats> {
        self.inner.stats.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl NotificationBus for MemoryBus {
    async fn publish(&self, channel: Channel, payload: &str) -> Result<()> {
        self.publish_bytes(channel, payload.as_bytes().to_vec())
    }

    async fn subscribe(&self, channel: Channel) -> Result<Box<dyn Subscription>> {
        let receiver = self.sender(channel)?.subscribe();
        *self.stats().active.entry(channel).or_default() += 1;

        Ok(Box::new(MemorySubscription {
            channel,
            receiver: Some(receiver),
            bus: self.clone(),
        }))
    }
}

struct MemorySubscription {
    channel: Channel,
    receiver: Option<broadcast::Receiver<Vec<u8>>>,
    bus: MemoryBus,
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Received> {
        let channel = self.channel;
        let receiver = self.receiver.as_mut().ok_or_else(|| {
            Error::BusUnavailable(format!("receive on released subscription to {channel}"))
        })?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, receiver.recv()).await {
                Err(_) => return Ok(Received::Timeout),
                Ok(Ok(payload)) => {
                    return String::from_utf8(payload).map(Received::Message).map_err(|e| {
                        Error::MalformedMessage {
                            channel: channel.to_string(),
                            reason: e.to_string(),
                        }
                    });
                }
                Ok(Err(RecvError::Lagged(skipped))) => {
                    warn!(channel = %channel, skipped, "Subscriber lagged, messages dropped");
                }
                Ok(Err(RecvError::Closed)) => {
                    return Err(Error::BusUnavailable(format!("{channel} channel closed")));
                }
            }
        }
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        if self.receiver.take().is_some() {
            let mut stats = self.bus.stats();
            if let Some(active) = stats.active.get_mut(&self.channel) {
                *active = active.saturating_sub(1);
            }
            *stats.unsubscribes.entry(self.channel).or_default() += 1;
        }
        Ok(())
    }
}
