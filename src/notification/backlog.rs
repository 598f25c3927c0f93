//! Backlog replay and read receipts for the notifications topic.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::connection::Connection;
use crate::groups::GroupDirectory;
use crate::notification::NOTIFICATIONS_TOPIC;
use crate::store::NotificationStore;
use crate::topics::{HandlerResult, ReceiveHandler, SubscribeHandler};

/// Topic handlers behind `"notifications"`.
///
/// On subscribe, replays the user's undelivered backlog so a reconnecting
/// client catches up before live traffic resumes. On receive, accepts
/// `mark_read` requests from the client.
pub struct NotificationsTopic {
    store: Arc<dyn NotificationStore>,
    directory: Arc<dyn GroupDirectory>,
}

impl NotificationsTopic {
    pub fn new(store: Arc<dyn NotificationStore>, directory: Arc<dyn GroupDirectory>) -> Self {
        Self { store, directory }
    }
}

#[async_trait]
impl SubscribeHandler for NotificationsTopic {
    async fn on_subscribe(&self, connection: &Arc<Connection>) -> HandlerResult {
        // Anonymous connections have no backlog to replay
        let Some(user_id) = connection.user_id().await else {
            return Ok(());
        };

        let groups = match self.directory.groups_for_user(&user_id).await {
            Ok(groups) => groups,
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "Group lookup failed during backlog replay, using direct notifications only"
                );
                Vec::new()
            }
        };
        let group_ids: Vec<String> = groups.into_iter().map(|g| g.id).collect();

        let backlog = self.store.undelivered_for(&user_id, &group_ids).await?;
        if backlog.is_empty() {
            return Ok(());
        }

        let mut delivered_ids = Vec::with_capacity(backlog.len());
        for record in &backlog {
            let payload = serde_json::to_value(record)?;
            if connection.send(NOTIFICATIONS_TOPIC, payload).await.is_err() {
                // Transport gone mid-replay; the rest stays undelivered
                break;
            }
            delivered_ids.push(record.id);
        }

        tracing::info!(
            connection_id = %connection.id,
            user_id = %user_id,
            replayed = delivered_ids.len(),
            pending = backlog.len(),
            "Replayed notification backlog"
        );

        self.store.mark_delivered(&delivered_ids).await?;
        Ok(())
    }
}

#[async_trait]
impl ReceiveHandler for NotificationsTopic {
    async fn on_message(&self, connection: &Arc<Connection>, payload: &Value) -> HandlerResult {
        let Some(user_id) = connection.user_id().await else {
            tracing::debug!(
                connection_id = %connection.id,
                "Ignoring notifications-topic message from anonymous connection"
            );
            return Ok(());
        };

        if payload.get("action").and_then(Value::as_str) != Some("mark_read") {
            return Ok(());
        }

        let ids: Vec<Uuid> = payload
            .get("ids")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(|s| Uuid::parse_str(s).ok())
                    .collect()
            })
            .unwrap_or_default();

        if ids.is_empty() {
            return Ok(());
        }

        self.store.mark_read(&user_id, &ids).await?;
        tracing::debug!(
            user_id = %user_id,
            count = ids.len(),
            "Marked notifications as read"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbound;
    use crate::groups::StaticGroupDirectory;
    use crate::notification::{Address, NotificationRecord, NotificationRequest};
    use crate::store::MemoryNotificationStore;
    use serde_json::json;
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    fn record(address: Address) -> NotificationRecord {
        let request = NotificationRequest {
            kind: "in-app".to_string(),
            recipient_type: String::new(),
            recipient: None,
            payload: json!({"title": "hi"}),
            priority: 0,
        };
        NotificationRecord::from_request(&request, address)
    }

    fn topic_with(
        memberships: HashMap<String, Vec<String>>,
    ) -> (NotificationsTopic, Arc<MemoryNotificationStore>) {
        let store = Arc::new(MemoryNotificationStore::new());
        let directory = Arc::new(StaticGroupDirectory::new(memberships));
        (NotificationsTopic::new(store.clone(), directory), store)
    }

    #[tokio::test]
    async fn test_replay_marks_delivered() {
        let (topic, store) = topic_with(HashMap::new());
        let pending = record(Address::Unicast("alice".to_string()));
        store.append(&pending).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let conn = Arc::new(Connection::new(tx));
        conn.authenticate("alice").await;

        topic.on_subscribe(&conn).await.unwrap();

        let out = rx.try_recv().unwrap();
        assert!(matches!(out, Outbound::Frame(_)));
        assert!(store.get(pending.id).await.unwrap().delivered);
        assert!(store.undelivered_for("alice", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replay_includes_group_notifications() {
        let mut memberships = HashMap::new();
        memberships.insert("alice".to_string(), vec!["staff".to_string()]);
        let (topic, store) = topic_with(memberships);
        store
            .append(&record(Address::Multicast("staff".to_string())))
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let conn = Arc::new(Connection::new(tx));
        conn.authenticate("alice").await;

        topic.on_subscribe(&conn).await.unwrap();
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_anonymous_subscribe_skips_replay() {
        let (topic, store) = topic_with(HashMap::new());
        store.append(&record(Address::Broadcast)).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let conn = Arc::new(Connection::new(tx));

        topic.on_subscribe(&conn).await.unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(store.undelivered_for("anyone", &[]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_read_via_topic_message() {
        let (topic, store) = topic_with(HashMap::new());
        let r = record(Address::Unicast("alice".to_string()));
        store.append(&r).await.unwrap();

        let (tx, _rx) = mpsc::channel(8);
        let conn = Arc::new(Connection::new(tx));
        conn.authenticate("alice").await;

        let payload = json!({"action": "mark_read", "ids": [r.id.to_string()]});
        topic.on_message(&conn, &payload).await.unwrap();
        assert!(store.get(r.id).await.unwrap().read);
    }

    #[tokio::test]
    async fn test_unknown_action_is_ignored() {
        let (topic, store) = topic_with(HashMap::new());
        let r = record(Address::Unicast("alice".to_string()));
        store.append(&r).await.unwrap();

        let (tx, _rx) = mpsc::channel(8);
        let conn = Arc::new(Connection::new(tx));
        conn.authenticate("alice").await;

        topic
            .on_message(&conn, &json!({"action": "snooze"}))
            .await
            .unwrap();
        assert!(!store.get(r.id).await.unwrap().read);
    }
}
