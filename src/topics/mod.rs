//! Topic dispatch table: receive, subscribe, and unsubscribe handlers keyed by
//! topic name.
//!
//! Registration happens once at startup, before the router is shared; dispatch
//! is read-only after that. Each registered handler is invoked independently
//! and a failure in one never prevents its siblings from running.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::connection::Connection;

pub type HandlerResult = anyhow::Result<()>;

/// Handles inbound topic payloads from a subscribed connection.
#[async_trait]
pub trait ReceiveHandler: Send + Sync {
    async fn on_message(&self, connection: &Arc<Connection>, payload: &Value) -> HandlerResult;
}

/// Runs when a connection subscribes to the topic.
#[async_trait]
pub trait SubscribeHandler: Send + Sync {
    async fn on_subscribe(&self, connection: &Arc<Connection>) -> HandlerResult;
}

/// Runs when a still-subscribed connection unsubscribes (or disconnects).
#[async_trait]
pub trait UnsubscribeHandler: Send + Sync {
    async fn on_unsubscribe(&self, connection: &Arc<Connection>) -> HandlerResult;
}

#[derive(Default)]
struct TopicEntry {
    receive: Vec<Arc<dyn ReceiveHandler>>,
    subscribe: Vec<Arc<dyn SubscribeHandler>>,
    unsubscribe: Vec<Arc<dyn UnsubscribeHandler>>,
}

/// Outcome of dispatching an inbound topic payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The connection is not subscribed to the topic; the protocol layer
    /// reports this back to the client.
    NotSubscribed,
    /// No receive handlers are registered; a no-op, distinct from an error.
    NoHandlers,
    Handled { invoked: usize },
}

#[derive(Default)]
pub struct TopicRouter {
    topics: HashMap<String, TopicEntry>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a receive handler. Re-registering the same handler reference
    /// is idempotent.
    pub fn register_receive(&mut self, topic: impl Into<String>, handler: Arc<dyn ReceiveHandler>) {
        let topic = topic.into();
        let entry = self.topics.entry(topic.clone()).or_default();
        if !entry.receive.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            entry.receive.push(handler);
            tracing::info!(topic = %topic, "Registered receive handler");
        }
    }

    pub fn register_subscribe(
        &mut self,
        topic: impl Into<String>,
        handler: Arc<dyn SubscribeHandler>,
    ) {
        let topic = topic.into();
        let entry = self.topics.entry(topic.clone()).or_default();
        if !entry.subscribe.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            entry.subscribe.push(handler);
            tracing::info!(topic = %topic, "Registered subscribe handler");
        }
    }

    pub fn register_unsubscribe(
        &mut self,
        topic: impl Into<String>,
        handler: Arc<dyn UnsubscribeHandler>,
    ) {
        let topic = topic.into();
        let entry = self.topics.entry(topic.clone()).or_default();
        if !entry.unsubscribe.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            entry.unsubscribe.push(handler);
            tracing::info!(topic = %topic, "Registered unsubscribe handler");
        }
    }

    /// Invoke the topic's receive handlers for an inbound payload.
    pub async fn dispatch_message(
        &self,
        connection: &Arc<Connection>,
        topic: &str,
        payload: &Value,
    ) -> DispatchOutcome {
        if !connection.has_subscription(topic).await {
            return DispatchOutcome::NotSubscribed;
        }

        let handlers = match self.topics.get(topic) {
            Some(entry) if !entry.receive.is_empty() => &entry.receive,
            _ => {
                tracing::debug!(topic = %topic, "No receive handlers registered for topic");
                return DispatchOutcome::NoHandlers;
            }
        };

        let mut invoked = 0;
        for handler in handlers {
            if let Err(e) = handler.on_message(connection, payload).await {
                tracing::error!(
                    topic = %topic,
                    connection_id = %connection.id,
                    error = %e,
                    "Receive handler failed"
                );
            }
            invoked += 1;
        }
        DispatchOutcome::Handled { invoked }
    }

    /// Run the topic's subscribe handlers, then record the subscription on the
    /// connection regardless of individual handler failures.
    pub async fn dispatch_subscribe(&self, connection: &Arc<Connection>, topic: &str) {
        if let Some(entry) = self.topics.get(topic) {
            for handler in &entry.subscribe {
                if let Err(e) = handler.on_subscribe(connection).await {
                    tracing::error!(
                        topic = %topic,
                        connection_id = %connection.id,
                        error = %e,
                        "Subscribe handler failed"
                    );
                }
            }
        }

        connection.add_subscription(topic).await;
        tracing::debug!(
            connection_id = %connection.id,
            topic = %topic,
            "Subscribed to topic"
        );
    }

    /// Run the topic's unsubscribe handlers while the connection is still
    /// subscribed, then remove the subscription. No-op if not subscribed,
    /// which keeps disconnect teardown exactly-once under races.
    pub async fn dispatch_unsubscribe(&self, connection: &Arc<Connection>, topic: &str) {
        if !connection.has_subscription(topic).await {
            return;
        }

        if let Some(entry) = self.topics.get(topic) {
            for handler in &entry.unsubscribe {
                if let Err(e) = handler.on_unsubscribe(connection).await {
                    tracing::error!(
                        topic = %topic,
                        connection_id = %connection.id,
                        error = %e,
                        "Unsubscribe handler failed"
                    );
                }
            }
        }

        connection.remove_subscription(topic).await;
        tracing::debug!(
            connection_id = %connection.id,
            topic = %topic,
            "Unsubscribed from topic"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbound;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct Counting {
        messages: AtomicUsize,
        subscribes: AtomicUsize,
        unsubscribes: AtomicUsize,
        fail: bool,
    }

    impl Counting {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ReceiveHandler for Counting {
        async fn on_message(&self, _c: &Arc<Connection>, _p: &Value) -> HandlerResult {
            self.messages.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl SubscribeHandler for Counting {
        async fn on_subscribe(&self, _c: &Arc<Connection>) -> HandlerResult {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl UnsubscribeHandler for Counting {
        async fn on_unsubscribe(&self, _c: &Arc<Connection>) -> HandlerResult {
            self.unsubscribes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(())
        }
    }

    fn new_connection() -> (Arc<Connection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        (Arc::new(Connection::new(tx)), rx)
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_idempotent() {
        let mut router = TopicRouter::new();
        let handler = Arc::new(Counting::default());
        router.register_receive("orders", handler.clone());
        router.register_receive("orders", handler.clone());

        let (conn, _rx) = new_connection();
        router.dispatch_subscribe(&conn, "orders").await;
        let outcome = router
            .dispatch_message(&conn, "orders", &Value::Null)
            .await;

        assert_eq!(outcome, DispatchOutcome::Handled { invoked: 1 });
        assert_eq!(handler.messages.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_not_subscribed_vs_no_handlers() {
        let mut router = TopicRouter::new();
        router.register_receive("orders", Arc::new(Counting::default()));
        let (conn, _rx) = new_connection();

        assert_eq!(
            router.dispatch_message(&conn, "orders", &Value::Null).await,
            DispatchOutcome::NotSubscribed
        );

        router.dispatch_subscribe(&conn, "unknown-topic").await;
        assert_eq!(
            router
                .dispatch_message(&conn, "unknown-topic", &Value::Null)
                .await,
            DispatchOutcome::NoHandlers
        );
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_siblings() {
        let mut router = TopicRouter::new();
        let failing = Arc::new(Counting::failing());
        let ok = Arc::new(Counting::default());
        router.register_receive("orders", failing.clone());
        router.register_receive("orders", ok.clone());

        let (conn, _rx) = new_connection();
        router.dispatch_subscribe(&conn, "orders").await;
        let outcome = router
            .dispatch_message(&conn, "orders", &Value::Null)
            .await;

        assert_eq!(outcome, DispatchOutcome::Handled { invoked: 2 });
        assert_eq!(failing.messages.load(Ordering::SeqCst), 1);
        assert_eq!(ok.messages.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscription_recorded_even_when_handler_fails() {
        let mut router = TopicRouter::new();
        router.register_subscribe("orders", Arc::new(Counting::failing()));

        let (conn, _rx) = new_connection();
        router.dispatch_subscribe(&conn, "orders").await;
        assert!(conn.has_subscription("orders").await);
    }

    #[tokio::test]
    async fn test_unsubscribe_handlers_see_still_subscribed_connection() {
        struct AssertSubscribed;

        #[async_trait]
        impl UnsubscribeHandler for AssertSubscribed {
            async fn on_unsubscribe(&self, connection: &Arc<Connection>) -> HandlerResult {
                assert!(connection.has_subscription("orders").await);
                Ok(())
            }
        }

        let mut router = TopicRouter::new();
        router.register_unsubscribe("orders", Arc::new(AssertSubscribed));

        let (conn, _rx) = new_connection();
        router.dispatch_subscribe(&conn, "orders").await;
        router.dispatch_unsubscribe(&conn, "orders").await;
        assert!(!conn.has_subscription("orders").await);
    }

    #[tokio::test]
    async fn test_unsubscribe_when_not_subscribed_is_noop() {
        let mut router = TopicRouter::new();
        let handler = Arc::new(Counting::default());
        router.register_unsubscribe("orders", handler.clone());

        let (conn, _rx) = new_connection();
        router.dispatch_unsubscribe(&conn, "orders").await;
        assert_eq!(handler.unsubscribes.load(Ordering::SeqCst), 0);
    }
}
