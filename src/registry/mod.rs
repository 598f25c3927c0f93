//! Tracks all live connections, indexed by connection id and by authenticated
//! user id.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::connection::Connection;

/// Registry of live connections.
///
/// The user index holds a connection id if and only if that connection is
/// authenticated. Readers always resolve user-index entries through the
/// primary index, so a transiently stale entry can never surface a removed
/// connection. Operations on unknown ids are no-ops; disconnect races are
/// expected.
pub struct ConnectionRegistry {
    /// connection_id -> Connection
    connections: DashMap<Uuid, Arc<Connection>>,
    /// user_id -> Set<connection_id> (supports multiple devices)
    user_index: DashMap<String, HashSet<Uuid>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            user_index: DashMap::new(),
        }
    }

    /// Add a freshly accepted connection. Connections start unauthenticated,
    /// so no user-index entry is created here.
    pub fn register(&self, connection: Arc<Connection>) {
        let connection_id = connection.id;
        self.connections.insert(connection_id, connection);
        tracing::info!(connection_id = %connection_id, "Connection registered");
    }

    /// Move the connection into the user-index bucket for `user_id`, creating
    /// the bucket if absent. No-op for unknown connection ids.
    pub fn authenticate(&self, connection_id: Uuid, user_id: &str) {
        if !self.connections.contains_key(&connection_id) {
            return;
        }

        self.user_index
            .entry(user_id.to_string())
            .or_default()
            .insert(connection_id);

        tracing::info!(
            connection_id = %connection_id,
            user_id = %user_id,
            "Connection authenticated"
        );
    }

    /// Remove a connection from both indices. Safe to call twice; the second
    /// call is a no-op.
    pub async fn unregister(&self, connection_id: Uuid) {
        let Some((_, connection)) = self.connections.remove(&connection_id) else {
            return;
        };

        if let Some(user_id) = connection.user_id().await {
            if let Some(mut bucket) = self.user_index.get_mut(&user_id) {
                bucket.remove(&connection_id);
                let empty = bucket.is_empty();
                drop(bucket);
                if empty {
                    self.user_index.remove_if(&user_id, |_, ids| ids.is_empty());
                }
            }
        }

        tracing::info!(connection_id = %connection_id, "Connection unregistered");
    }

    pub fn get(&self, connection_id: Uuid) -> Option<Arc<Connection>> {
        self.connections.get(&connection_id).map(|c| c.clone())
    }

    /// Snapshot of all connections for a user.
    pub fn connections_for_user(&self, user_id: &str) -> Vec<Arc<Connection>> {
        self.user_index
            .get(user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.connections.get(id).map(|c| c.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot of all user ids with at least one authenticated connection.
    pub fn authenticated_users(&self) -> Vec<String> {
        self.user_index.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshot of every live connection, authenticated or not.
    pub fn all_connections(&self) -> Vec<Arc<Connection>> {
        self.connections.iter().map(|e| e.value().clone()).collect()
    }

    pub fn all_connection_ids(&self) -> Vec<Uuid> {
        self.connections.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_connections: self.connections.len(),
            authenticated_users: self.user_index.len(),
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistryStats {
    pub total_connections: usize,
    pub authenticated_users: usize,
}
