//! Module context - the handle a module uses to reach the bus

use crate::bus::{BoxedResponse, MessageBus, Subscription};
use crate::MessageBounds;
use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Shared context handed to every module at init
pub struct Context<M: MessageBounds> {
    /// The process-wide message bus
    pub message_bus: Arc<MessageBus<M>>,
}

impl<M: MessageBounds> Context<M> {
    pub fn new(message_bus: Arc<MessageBus<M>>) -> Arc<Self> {
        Arc::new(Self { message_bus })
    }

    /// Subscribe to a topic
    pub async fn subscribe(&self, topic: &str) -> Result<Subscription<M>> {
        self.message_bus.subscribe(topic).await
    }

    /// Spawn a long-running module task
    pub fn run<F>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future)
    }

    /// Register a request handler on a topic
    pub fn handle<F, Fut>(&self, topic: &str, handler: F)
    where
        F: Fn(Arc<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Arc<M>> + Send + 'static,
    {
        self.message_bus.handle(
            topic,
            Arc::new(move |message| Box::pin(handler(message)) as BoxedResponse<M>),
        );
    }

    /// Request a response from a topic's handler
    pub async fn request(&self, topic: &str, message: Arc<M>) -> Result<Arc<M>> {
        self.message_bus.request(topic, message).await
    }
}
