//! Message bus trait and in-memory implementation.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::BusError;
use crate::messages::BookingMessage;

/// Trait for publishing messages to the broker.
///
/// Delivery is at-least-once; consumers must be idempotent.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes a message.
    async fn publish(&self, message: BookingMessage) -> Result<(), BusError>;
}

#[derive(Debug, Default)]
struct InMemoryBusState {
    published: Vec<BookingMessage>,
    fail_on_publish: bool,
}

/// In-memory message bus.
///
/// A bus built with [`new`](Self::new) records every published message for
/// inspection. One built with [`with_channel`](Self::with_channel) forwards
/// messages to a consumer and keeps nothing once they are handed over.
#[derive(Debug, Clone)]
pub struct InMemoryMessageBus {
    state: Arc<RwLock<InMemoryBusState>>,
    sender: Option<mpsc::Sender<BookingMessage>>,
    recording: bool,
}

impl InMemoryMessageBus {
    /// Creates a bus that only records messages.
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            sender: None,
            recording: true,
        }
    }

    /// Creates a bus that forwards messages to the returned receiver.
    pub fn with_channel(capacity: usize) -> (Self, mpsc::Receiver<BookingMessage>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let bus = Self {
            state: Arc::default(),
            sender: Some(sender),
            recording: false,
        };
        (bus, receiver)
    }

    /// Configures the bus to reject publishes.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_publish = fail;
    }

    /// Returns all recorded messages, oldest first.
    pub fn published(&self) -> Vec<BookingMessage> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .published
            .clone()
    }

    /// Returns the number of recorded messages.
    pub fn published_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .published
            .len()
    }
}

impl Default for InMemoryMessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, message: BookingMessage) -> Result<(), BusError> {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if state.fail_on_publish {
                return Err(BusError::Unavailable("broker rejected publish".to_string()));
            }
            if self.recording {
                state.published.push(message.clone());
            }
        }

        tracing::debug!(message_type = message.message_type(), "message published");

        if let Some(sender) = &self.sender {
            sender.send(message).await.map_err(|_| BusError::Closed)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::PaymentSucceeded;
    use chrono::Utc;
    use common::BookingId;

    fn message() -> BookingMessage {
        BookingMessage::from(PaymentSucceeded {
            booking_id: BookingId::new(),
            transaction_id: "TX-1".to_string(),
            timestamp: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_publish_records_message() {
        let bus = InMemoryMessageBus::new();
        let msg = message();

        bus.publish(msg.clone()).await.unwrap();

        assert_eq!(bus.published_count(), 1);
        assert_eq!(bus.published(), vec![msg]);
    }

    #[tokio::test]
    async fn test_fail_on_publish() {
        let bus = InMemoryMessageBus::new();
        bus.set_fail_on_publish(true);

        let result = bus.publish(message()).await;
        assert!(matches!(result, Err(BusError::Unavailable(_))));
        assert_eq!(bus.published_count(), 0);
    }

    #[tokio::test]
    async fn test_channel_forwards_to_consumer() {
        let (bus, mut rx) = InMemoryMessageBus::with_channel(4);
        let msg = message();

        bus.publish(msg.clone()).await.unwrap();

        assert_eq!(rx.recv().await, Some(msg));
    }

    #[tokio::test]
    async fn test_channel_bus_retains_nothing_after_handover() {
        let (bus, mut rx) = InMemoryMessageBus::with_channel(4);

        let consumer = tokio::spawn(async move {
            let mut consumed = 0;
            while rx.recv().await.is_some() {
                consumed += 1;
            }
            consumed
        });
        for _ in 0..500 {
            bus.publish(message()).await.unwrap();
        }
        assert_eq!(bus.published_count(), 0);
        assert!(bus.published().is_empty());

        drop(bus);
        assert_eq!(consumer.await.unwrap(), 500);
    }

    #[tokio::test]
    async fn test_closed_consumer_is_reported() {
        let (bus, rx) = InMemoryMessageBus::with_channel(1);
        drop(rx);

        let result = bus.publish(message()).await;
        assert!(matches!(result, Err(BusError::Closed)));
    }
}
