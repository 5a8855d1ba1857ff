//! Topic-based message bus
//! Publish/subscribe over bounded broadcast channels, plus a
//! request/response surface for point queries

use crate::MessageBounds;
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::warn;

/// Maximum messages buffered per subscriber before the slowest reader
/// starts losing the oldest ones
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

pub type BoxedResponse<M> = Pin<Box<dyn Future<Output = Arc<M>> + Send>>;
pub type Handler<M> = Arc<dyn Fn(Arc<M>) -> BoxedResponse<M> + Send + Sync>;

/// In-process message bus, one per process
pub struct MessageBus<M: MessageBounds> {
    /// Broadcast sender per topic, created lazily
    topics: Mutex<HashMap<String, broadcast::Sender<(String, Arc<M>)>>>,

    /// Request handler per topic
    handlers: Mutex<HashMap<String, Handler<M>>>,
}

impl<M: MessageBounds> MessageBus<M> {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Get or create the sender for a topic
    fn sender(&self, topic: &str) -> broadcast::Sender<(String, Arc<M>)> {
        let mut topics = self.topics.lock().expect("poisoned topic map");
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(DEFAULT_CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Publish a message on a topic
    /// Delivery to a topic nobody subscribes to is a silent no-op
    pub async fn publish(&self, topic: &str, message: Arc<M>) -> Result<()> {
        let _ = self.sender(topic).send((topic.to_string(), message));
        Ok(())
    }

    /// Subscribe to a topic
    pub async fn subscribe(&self, topic: &str) -> Result<Subscription<M>> {
        Ok(Subscription {
            topic: topic.to_string(),
            receiver: self.sender(topic).subscribe(),
        })
    }

    /// Register the request handler for a topic, replacing any previous one
    pub fn handle(&self, topic: &str, handler: Handler<M>) {
        let mut handlers = self.handlers.lock().expect("poisoned handler map");
        handlers.insert(topic.to_string(), handler);
    }

    /// Send a request to a topic's handler and await its response
    pub async fn request(&self, topic: &str, message: Arc<M>) -> Result<Arc<M>> {
        let handler = {
            let handlers = self.handlers.lock().expect("poisoned handler map");
            handlers.get(topic).cloned()
        };
        match handler {
            Some(handler) => Ok(handler(message).await),
            None => bail!("No handler registered on '{topic}'"),
        }
    }
}

impl<M: MessageBounds> Default for MessageBus<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// A single subscriber's view of one topic
pub struct Subscription<M: MessageBounds> {
    topic: String,
    receiver: broadcast::Receiver<(String, Arc<M>)>,
}

impl<M: MessageBounds> Subscription<M> {
    /// Read the next message, in publication order
    pub async fn read(&mut self) -> Result<(String, Arc<M>)> {
        loop {
            match self.receiver.recv().await {
                Ok(entry) => return Ok(entry),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = %self.topic, missed = n, "Subscriber lagging");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    bail!("Topic '{}' closed", self.topic)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_all_subscribers_in_order() {
        let bus = MessageBus::<String>::new();
        let mut first = bus.subscribe("test.topic").await.unwrap();
        let mut second = bus.subscribe("test.topic").await.unwrap();

        for n in 0..3 {
            bus.publish("test.topic", Arc::new(format!("message {n}"))).await.unwrap();
        }

        for n in 0..3 {
            let (topic, message) = first.read().await.unwrap();
            assert_eq!("test.topic", topic);
            assert_eq!(format!("message {n}"), *message);
            let (_, message) = second.read().await.unwrap();
            assert_eq!(format!("message {n}"), *message);
        }
    }

    #[tokio::test]
    async fn topics_are_independent() {
        let bus = MessageBus::<String>::new();
        let mut one = bus.subscribe("topic.one").await.unwrap();
        bus.publish("topic.two", Arc::new("elsewhere".to_string())).await.unwrap();
        bus.publish("topic.one", Arc::new("here".to_string())).await.unwrap();

        let (_, message) = one.read().await.unwrap();
        assert_eq!("here", *message);
    }

    #[tokio::test]
    async fn request_round_trips_through_handler() {
        let bus = MessageBus::<String>::new();
        bus.handle(
            "test.query",
            Arc::new(|message: Arc<String>| {
                Box::pin(async move { Arc::new(format!("echo: {message}")) })
            }),
        );

        let response = bus.request("test.query", Arc::new("ping".to_string())).await.unwrap();
        assert_eq!("echo: ping", *response);

        assert!(bus.request("test.unhandled", Arc::new("ping".to_string())).await.is_err());
    }
}
