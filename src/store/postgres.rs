//! PostgreSQL-backed notification store.
//!
//! Table structure:
//! - `notifications` - One row per published notification, with delivery and
//!   read flags driving backlog replay.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::notification::{Address, NotificationRecord};

use super::{NotificationStore, StoreError};

type NotificationRow = (
    Uuid,
    String,
    String,
    Option<String>,
    Value,
    i32,
    bool,
    bool,
    DateTime<Utc>,
);

pub struct PostgresNotificationStore {
    pool: PgPool,
}

impl PostgresNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn record_from_row(row: NotificationRow) -> Result<NotificationRecord, StoreError> {
        let (id, kind, recipient_type, recipient, payload, priority, delivered, read, created_at) =
            row;
        let address = Address::parse(&recipient_type, recipient.as_deref())
            .map_err(|e| StoreError::Corrupt(format!("notification {id}: {e}")))?;
        Ok(NotificationRecord {
            id,
            kind,
            address,
            payload,
            priority,
            delivered,
            read,
            created_at,
        })
    }
}

#[async_trait]
impl NotificationStore for PostgresNotificationStore {
    async fn append(&self, record: &NotificationRecord) -> Result<(), StoreError> {
        let (recipient_type, recipient) = match &record.address {
            Address::Unicast(user_id) => ("unicast", Some(user_id.as_str())),
            Address::Multicast(group_id) => ("multicast", Some(group_id.as_str())),
            Address::Broadcast => ("broadcast", None),
        };

        sqlx::query(
            r#"
            INSERT INTO notifications
                (id, kind, recipient_type, recipient, payload, priority, delivered, read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id)
        .bind(&record.kind)
        .bind(recipient_type)
        .bind(recipient)
        .bind(&record.payload)
        .bind(record.priority)
        .bind(record.delivered)
        .bind(record.read)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn undelivered_for(
        &self,
        user_id: &str,
        group_ids: &[String],
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        let rows: Vec<NotificationRow> = sqlx::query_as(
            r#"
            SELECT id, kind, recipient_type, recipient, payload, priority, delivered, read, created_at
            FROM notifications
            WHERE delivered = FALSE
              AND (
                    (recipient_type = 'unicast' AND recipient = $1)
                 OR (recipient_type = 'multicast' AND recipient = ANY($2))
                 OR recipient_type = 'broadcast'
              )
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .bind(group_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::record_from_row).collect()
    }

    async fn mark_delivered(&self, ids: &[Uuid]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }

        sqlx::query("UPDATE notifications SET delivered = TRUE WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn mark_read(&self, user_id: &str, ids: &[Uuid]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }

        // Users may only mark records that were addressed to them
        sqlx::query(
            r#"
            UPDATE notifications
            SET read = TRUE, delivered = TRUE
            WHERE id = ANY($2)
              AND (
                    (recipient_type = 'unicast' AND recipient = $1)
                 OR recipient_type = 'broadcast'
              )
            "#,
        )
        .bind(user_id)
        .bind(ids)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
