//! Redis pub/sub bus.
//!
//! Each topic maps to a Redis channel of the same name. Messages are JSON.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use super::NotificationBus;
use crate::error::BusError;
use delivery_domain::{BusMessage, Topic};

/// Redis bus configuration
#[derive(Debug, Clone)]
pub struct RedisBusConfig {
    pub url: String,
}

impl Default for RedisBusConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// Notification bus backed by Redis PUBLISH
#[derive(Clone)]
pub struct RedisBus {
    conn: ConnectionManager,
}

impl RedisBus {
    /// Connect to Redis. The connection manager reconnects on its own afterwards.
    pub async fn new(config: RedisBusConfig) -> Result<Self, BusError> {
        let client = Client::open(config.url.as_str())?;
        let conn = ConnectionManager::new(client).await?;

        tracing::info!(url = %config.url, "Connected to Redis bus");
        Ok(Self { conn })
    }
}

#[async_trait]
impl NotificationBus for RedisBus {
    async fn publish(&self, topic: Topic, message: &BusMessage) -> Result<(), BusError> {
        let payload = serde_json::to_string(message)?;
        let mut conn = self.conn.clone();
        let receivers: i64 = conn.publish(topic.to_string(), payload).await?;

        tracing::trace!(topic = %topic, receivers, "Published to Redis");
        Ok(())
    }
}
