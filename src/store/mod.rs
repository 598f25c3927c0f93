//! Notification persistence.
//!
//! Every published notification is written to the store before any delivery is
//! attempted, so offline recipients can catch up via backlog replay. Two
//! implementations: an in-memory store for development and tests, and a
//! PostgreSQL store for production.

mod memory;
mod postgres;

pub use memory::MemoryNotificationStore;
pub use postgres::PostgresNotificationStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::notification::NotificationRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt stored record: {0}")]
    Corrupt(String),
}

/// Persistent notification storage.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Persist a new record.
    async fn append(&self, record: &NotificationRecord) -> Result<(), StoreError>;

    /// Undelivered records addressed to the user directly, to any of the given
    /// groups, or broadcast. Newest first.
    async fn undelivered_for(
        &self,
        user_id: &str,
        group_ids: &[String],
    ) -> Result<Vec<NotificationRecord>, StoreError>;

    /// Flag records as delivered. Unknown ids are ignored.
    async fn mark_delivered(&self, ids: &[Uuid]) -> Result<(), StoreError>;

    /// Flag records as read on behalf of a user. Unknown ids are ignored.
    async fn mark_read(&self, user_id: &str, ids: &[Uuid]) -> Result<(), StoreError>;
}
