//! Connection lifecycle orchestration: registration, authentication, topic
//! subscription, and the single disconnect path shared by every teardown
//! trigger.

use std::sync::Arc;

use uuid::Uuid;

use crate::connection::Connection;
use crate::metrics::{
    CONNECTIONS_ACTIVE, CONNECTIONS_CLOSED_TOTAL, CONNECTIONS_OPENED_TOTAL, USERS_CONNECTED,
};
use crate::registry::ConnectionRegistry;
use crate::topics::TopicRouter;

pub struct SessionManager {
    registry: Arc<ConnectionRegistry>,
    topics: Arc<TopicRouter>,
}

impl SessionManager {
    pub fn new(registry: Arc<ConnectionRegistry>, topics: Arc<TopicRouter>) -> Self {
        Self { registry, topics }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Track a freshly accepted connection.
    pub fn connect(&self, connection: Arc<Connection>) {
        self.registry.register(connection);
        CONNECTIONS_OPENED_TOTAL.inc();
        CONNECTIONS_ACTIVE.set(self.registry.len() as i64);
    }

    /// Authenticate a connection and index it under its user id.
    ///
    /// Returns false if the connection is already bound to a different user;
    /// the registry indices are left untouched in that case.
    pub async fn authenticate(&self, connection: &Arc<Connection>, user_id: &str) -> bool {
        if !connection.authenticate(user_id).await {
            return false;
        }
        self.registry.authenticate(connection.id, user_id);
        USERS_CONNECTED.set(self.registry.stats().authenticated_users as i64);
        true
    }

    pub async fn subscribe(&self, connection: &Arc<Connection>, topic: &str) {
        self.topics.dispatch_subscribe(connection, topic).await;
    }

    pub async fn unsubscribe(&self, connection: &Arc<Connection>, topic: &str) {
        self.topics.dispatch_unsubscribe(connection, topic).await;
    }

    /// Tear down a connection: run unsubscribe handlers for every topic it is
    /// still subscribed to, remove it from the registry, and close the
    /// transport.
    ///
    /// Idempotent under concurrent triggers (transport error, heartbeat
    /// expiry, client close): the connection's closing guard admits exactly
    /// one caller, so handlers run exactly once per topic.
    pub async fn disconnect(&self, connection_id: Uuid) {
        let Some(connection) = self.registry.get(connection_id) else {
            return;
        };
        if !connection.begin_close() {
            return;
        }

        for topic in connection.subscriptions_snapshot().await {
            self.topics.dispatch_unsubscribe(&connection, &topic).await;
        }

        self.registry.unregister(connection_id).await;
        connection.close_transport().await;

        CONNECTIONS_CLOSED_TOTAL.inc();
        CONNECTIONS_ACTIVE.set(self.registry.len() as i64);
        USERS_CONNECTED.set(self.registry.stats().authenticated_users as i64);

        tracing::info!(connection_id = %connection_id, "Connection closed");
    }

    /// Disconnect every live connection; used during graceful shutdown.
    pub async fn disconnect_all(&self) {
        for connection_id in self.registry.all_connection_ids() {
            self.disconnect(connection_id).await;
        }
    }
}
