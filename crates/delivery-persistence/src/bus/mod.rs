//! # Notification Bus
//!
//! Fire-and-forget pub/sub for telemetry and delivery status messages.
//! Topics are `drone.<id>` and `delivery.<id>`; payloads are JSON.

pub mod broadcast;
#[cfg(feature = "redis")]
pub mod redis_bus;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::BusError;
use delivery_domain::{BusMessage, Topic};

pub use broadcast::{BroadcastBus, TopicSubscription};
#[cfg(feature = "redis")]
pub use redis_bus::{RedisBus, RedisBusConfig};

/// Outbound side of the pub/sub transport
#[async_trait]
pub trait NotificationBus: Send + Sync {
    /// Publish a message at most once. Delivery is best-effort.
    async fn publish(&self, topic: Topic, message: &BusMessage) -> Result<(), BusError>;
}

/// Shared bus handle
pub type SharedBus = Arc<dyn NotificationBus>;
