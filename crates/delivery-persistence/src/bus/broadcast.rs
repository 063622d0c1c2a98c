//! In-process bus on a `tokio::sync::broadcast` channel.
//!
//! Every subscriber sees every message; `subscribe(topic)` filters down to
//! one drone or one delivery.

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::NotificationBus;
use crate::error::BusError;
use delivery_domain::{BusMessage, Topic};

/// Channel capacity for broadcast channels
const CHANNEL_CAPACITY: usize = 1024;

/// In-process notification bus
#[derive(Clone)]
pub struct BroadcastBus {
    tx: broadcast::Sender<(Topic, BusMessage)>,
}

impl BroadcastBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Receive only messages published to `topic`
    pub fn subscribe(&self, topic: Topic) -> TopicSubscription {
        TopicSubscription {
            topic,
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live subscriptions across all topics
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationBus for BroadcastBus {
    async fn publish(&self, topic: Topic, message: &BusMessage) -> Result<(), BusError> {
        // No receivers is not a failure: nobody is listening yet
        if self.tx.send((topic, message.clone())).is_err() {
            tracing::trace!(topic = %topic, "Published with no subscribers");
        }
        Ok(())
    }
}

/// Receiver filtered to a single topic
pub struct TopicSubscription {
    topic: Topic,
    rx: broadcast::Receiver<(Topic, BusMessage)>,
}

impl TopicSubscription {
    pub const fn topic(&self) -> Topic {
        self.topic
    }

    /// Next message for this topic, or `None` once the bus is dropped.
    /// Messages lost to a slow consumer are skipped.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.recv().await {
                Ok((topic, message)) if topic == self.topic => return Some(message),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(topic = %self.topic, skipped, "Subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.try_recv() {
                Ok((topic, message)) if topic == self.topic => return Some(message),
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use delivery_domain::{DeliveryEvent, DeliveryUpdate};
    use uuid::Uuid;

    fn delivered() -> BusMessage {
        BusMessage::Delivery(DeliveryUpdate {
            status: DeliveryEvent::Delivered,
            timestamp: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = BroadcastBus::new();
        let result = bus.publish(Topic::Delivery(Uuid::new_v4()), &delivered()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_subscription_filters_by_topic() {
        let bus = BroadcastBus::new();
        let mine = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut sub = bus.subscribe(Topic::Delivery(mine));

        bus.publish(Topic::Delivery(other), &delivered()).await.unwrap();
        bus.publish(Topic::Drone(mine), &delivered()).await.unwrap();
        assert!(sub.try_recv().is_none());

        bus.publish(Topic::Delivery(mine), &delivered()).await.unwrap();
        let received = sub.recv().await.unwrap();
        assert!(matches!(
            received,
            BusMessage::Delivery(DeliveryUpdate {
                status: DeliveryEvent::Delivered,
                ..
            })
        ));
    }
}
