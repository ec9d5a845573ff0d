use super::{Channel, NotificationBus, Received, Subscription};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{ConnectionManager, PubSub};
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tracing::{debug, info};
use utils::errors::{
    PUBLISH_FAILED, REDIS_CLIENT_FAILED, REDIS_CONNECTION_FAILED, SUBSCRIBE_FAILED,
    UNSUBSCRIBE_FAILED,
};

/// Redis pub/sub. Publishing shares one managed connection; every
/// subscription owns a dedicated connection, since a Redis connection in
/// subscriber mode cannot issue other commands.
#[derive(Clone)]
pub struct RedisBus {
    client: Client,
    publisher: ConnectionManager,
}

impl RedisBus {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| Error::BusUnavailable(format!("{REDIS_CLIENT_FAILED}: {e}")))?;
        let publisher = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| Error::BusUnavailable(format!("{REDIS_CONNECTION_FAILED}: {e}")))?;

        info!("Notification bus connected");
        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl NotificationBus for RedisBus {
    async fn publish(&self, channel: Channel, payload: &str) -> Result<()> {
        let receivers: i64 = self
            .publisher
            .clone()
            .publish(channel.as_str(), payload)
            .await
            .map_err(|e| Error::BusUnavailable(format!("{PUBLISH_FAILED} on {channel}: {e}")))?;

        debug!(channel = %channel, receivers, "Published");
        Ok(())
    }

    async fn subscribe(&self, channel: Channel) -> Result<Box<dyn Subscription>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| Error::BusUnavailable(format!("{SUBSCRIBE_FAILED} {channel}: {e}")))?;

        pubsub
            .subscribe(channel.as_str())
            .await
            .map_err(|e| Error::BusUnavailable(format!("{SUBSCRIBE_FAILED} {channel}: {e}")))?;

        Ok(Box::new(RedisSubscription {
            channel,
            pubsub: Some(pubsub),
        }))
    }
}

struct RedisSubscription {
    channel: Channel,
    pubsub: Option<PubSub>,
}

#[async_trait]
impl Subscription for RedisSubscription {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Received> {
        let channel = self.channel;
        let pubsub = self.pubsub.as_mut().ok_or_else(|| {
            Error::BusUnavailable(format!("receive on released subscription to {channel}"))
        })?;

        let mut messages = std::pin::pin!(pubsub.on_message());
        match tokio::time::timeout(timeout, messages.next()).await {
            Err(_) => Ok(Received::Timeout),
            Ok(None) => Err(Error::BusUnavailable(format!(
                "pub/sub connection for {channel} closed"
            ))),
            Ok(Some(msg)) => msg
                .get_payload::<String>()
                .map(Received::Message)
                .map_err(|e| Error::MalformedMessage {
                    channel: channel.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        if let Some(mut pubsub) = self.pubsub.take() {
            pubsub.unsubscribe(self.channel.as_str()).await.map_err(|e| {
                Error::BusUnavailable(format!("{UNSUBSCRIBE_FAILED} {}: {e}", self.channel))
            })?;
        }
        Ok(())
    }
}
