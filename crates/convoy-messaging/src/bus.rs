//! The message bus trait and its in-process implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{MessagingError, Result};
use crate::topic::Topic;

/// A message handler subscribed on a topic.
///
/// Handlers receive the method name and the raw payload. A handler invoked
/// through a cast must convert its own failures into state updates; an
/// error returned from a cast delivery is logged by the bus and dropped,
/// never re-raised to the sender.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Process one message and return a response value.
    ///
    /// Cast deliveries discard the response; call deliveries return it to
    /// the caller.
    ///
    /// # Errors
    ///
    /// Returns an error string describing the failure. Only meaningful for
    /// call dispatch.
    async fn handle(&self, method: &str, payload: Value) -> std::result::Result<Value, String>;
}

/// The messaging boundary between worker roles.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Fire-and-forget dispatch of a state-changing operation.
    ///
    /// Point-to-point topics require a subscriber; fanout topics deliver to
    /// however many subscribers the role currently has (possibly none).
    ///
    /// # Errors
    ///
    /// Returns `MessagingError::NoSubscriber` for a point-to-point topic
    /// with no registered handler. Handler failures are not surfaced.
    async fn cast(&self, topic: &Topic, method: &str, payload: Value) -> Result<()>;

    /// Synchronous request/response, used only for read-only validation
    /// queries.
    ///
    /// # Errors
    ///
    /// Returns `MessagingError::NoSubscriber` if the topic has no handler,
    /// or `MessagingError::Handler` if the handler fails.
    async fn call(&self, topic: &Topic, method: &str, payload: Value) -> Result<Value>;
}

/// In-process message bus.
///
/// Subscribers register under their point-to-point topic; fanout casts
/// deliver to every subscriber whose topic shares the role. Cast deliveries
/// run on spawned tasks so a slow handler never blocks the sender, which
/// also means a cast can be processed after the sending function returns —
/// the same at-least-once, unordered contract a real transport gives.
#[derive(Default)]
pub struct LocalBus {
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl LocalBus {
    /// Create a new bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a handler on a point-to-point topic.
    ///
    /// Re-subscribing on the same topic replaces the previous handler.
    pub fn subscribe(&self, topic: &Topic, handler: Arc<dyn Handler>) {
        self.handlers.write().insert(topic.to_string(), handler);
    }

    /// Remove the subscriber of a topic.
    pub fn unsubscribe(&self, topic: &Topic) {
        self.handlers.write().remove(&topic.to_string());
    }

    /// Resolve the delivery targets for a topic.
    fn targets(&self, topic: &Topic) -> Vec<(String, Arc<dyn Handler>)> {
        let handlers = self.handlers.read();

        if topic.is_fanout() {
            let prefix = format!("{}.", topic.role());
            handlers
                .iter()
                .filter(|(key, _)| key.starts_with(&prefix) || *key == topic.role().as_str())
                .map(|(key, handler)| (key.clone(), Arc::clone(handler)))
                .collect()
        } else {
            let key = topic.to_string();
            handlers
                .get(&key)
                .map(|handler| (key, Arc::clone(handler)))
                .into_iter()
                .collect()
        }
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn cast(&self, topic: &Topic, method: &str, payload: Value) -> Result<()> {
        let targets = self.targets(topic);

        if targets.is_empty() && !topic.is_fanout() {
            return Err(MessagingError::NoSubscriber(topic.to_string()));
        }

        for (key, handler) in targets {
            let method = method.to_string();
            let payload = payload.clone();

            tokio::spawn(async move {
                if let Err(message) = handler.handle(&method, payload).await {
                    // A failing cast handler is a defect in the handler: it
                    // must record failure in its own state, not report it here.
                    tracing::error!(topic = %key, method = %method, %message, "cast handler failed");
                }
            });
        }

        Ok(())
    }

    async fn call(&self, topic: &Topic, method: &str, payload: Value) -> Result<Value> {
        let handler = {
            let handlers = self.handlers.read();
            handlers.get(&topic.to_string()).map(Arc::clone)
        };

        let handler = handler.ok_or_else(|| MessagingError::NoSubscriber(topic.to_string()))?;

        handler
            .handle(method, payload)
            .await
            .map_err(|message| MessagingError::Handler {
                topic: topic.to_string(),
                method: method.to_string(),
                message,
            })
    }
}
