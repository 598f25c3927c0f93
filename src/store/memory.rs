//! In-memory notification store for development and tests.

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::notification::{Address, NotificationRecord};

use super::{NotificationStore, StoreError};

#[derive(Default)]
pub struct MemoryNotificationStore {
    records: RwLock<Vec<NotificationRecord>>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn get(&self, id: Uuid) -> Option<NotificationRecord> {
        self.records
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }
}

fn addressed_to(record: &NotificationRecord, user_id: &str, group_ids: &[String]) -> bool {
    match &record.address {
        Address::Unicast(recipient) => recipient == user_id,
        Address::Multicast(group) => group_ids.iter().any(|g| g == group),
        Address::Broadcast => true,
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn append(&self, record: &NotificationRecord) -> Result<(), StoreError> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn undelivered_for(
        &self,
        user_id: &str,
        group_ids: &[String],
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        let records = self.records.read().await;
        let mut matching: Vec<NotificationRecord> = records
            .iter()
            .filter(|r| !r.delivered && addressed_to(r, user_id, group_ids))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn mark_delivered(&self, ids: &[Uuid]) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        for record in records.iter_mut() {
            if ids.contains(&record.id) {
                record.delivered = true;
            }
        }
        Ok(())
    }

    async fn mark_read(&self, user_id: &str, ids: &[Uuid]) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        for record in records.iter_mut() {
            if ids.contains(&record.id) && addressed_to(record, user_id, &[]) {
                record.read = true;
                record.delivered = true;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::NotificationRequest;
    use serde_json::json;

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

    #[tokio::test]
    async fn test_undelivered_filters_by_address() {
        let store = MemoryNotificationStore::new();
        store
            .append(&record(Address::Unicast("alice".to_string())))
            .await
            .unwrap();
        store
            .append(&record(Address::Unicast("bob".to_string())))
            .await
            .unwrap();
        store
            .append(&record(Address::Multicast("staff".to_string())))
            .await
            .unwrap();
        store.append(&record(Address::Broadcast)).await.unwrap();

        let for_alice = store
            .undelivered_for("alice", &["staff".to_string()])
            .await
            .unwrap();
        // Unicast to alice, staff multicast, and the broadcast; not bob's
        assert_eq!(for_alice.len(), 3);

        let for_carol = store.undelivered_for("carol", &[]).await.unwrap();
        assert_eq!(for_carol.len(), 1);
        assert_eq!(for_carol[0].address, Address::Broadcast);
    }

    #[tokio::test]
    async fn test_mark_delivered_excludes_from_backlog() {
        let store = MemoryNotificationStore::new();
        let r = record(Address::Unicast("alice".to_string()));
        store.append(&r).await.unwrap();

        store.mark_delivered(&[r.id]).await.unwrap();
        assert!(store.undelivered_for("alice", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_read_only_for_addressee() {
        let store = MemoryNotificationStore::new();
        let r = record(Address::Unicast("alice".to_string()));
        store.append(&r).await.unwrap();

        store.mark_read("bob", &[r.id]).await.unwrap();
        assert!(!store.get(r.id).await.unwrap().read);

        store.mark_read("alice", &[r.id]).await.unwrap();
        let stored = store.get(r.id).await.unwrap();
        assert!(stored.read);
        assert!(stored.delivered);
    }

    #[tokio::test]
    async fn test_newest_first_ordering() {
        let store = MemoryNotificationStore::new();
        let mut first = record(Address::Unicast("alice".to_string()));
        first.created_at = first.created_at - chrono::Duration::seconds(10);
        let second = record(Address::Unicast("alice".to_string()));
        store.append(&first).await.unwrap();
        store.append(&second).await.unwrap();

        let backlog = store.undelivered_for("alice", &[]).await.unwrap();
        assert_eq!(backlog[0].id, second.id);
        assert_eq!(backlog[1].id, first.id);
    }
}
