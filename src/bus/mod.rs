//! Internal message bus: persist first, then dispatch.
//!
//! Publishing a notification appends it to the store before any handler runs,
//! so a crash mid-dispatch loses delivery attempts but never the notification
//! itself. Handlers for a kind run in registration order; a failing handler is
//! logged and skipped, it never aborts the publish or its siblings.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AppError;
use crate::metrics::{BUS_HANDLER_ERRORS_TOTAL, BUS_PUBLISHED_TOTAL};
use crate::notification::{Address, NotificationRecord, NotificationRequest};
use crate::store::NotificationStore;

/// Consumes persisted notifications of a registered kind.
#[async_trait]
pub trait BusHandler: Send + Sync {
    async fn handle(&self, record: &NotificationRecord) -> anyhow::Result<()>;
}

pub struct MessageBus {
    store: Arc<dyn NotificationStore>,
    /// kind -> handlers, in registration order
    handlers: HashMap<String, Vec<Arc<dyn BusHandler>>>,
}

impl MessageBus {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a notification kind. Registration happens once
    /// at startup, before the bus is shared.
    pub fn register_handler(&mut self, kind: impl Into<String>, handler: Arc<dyn BusHandler>) {
        let kind = kind.into();
        self.handlers.entry(kind.clone()).or_default().push(handler);
        tracing::info!(kind = %kind, "Registered bus handler");
    }

    /// Validate, persist, then dispatch a notification.
    ///
    /// Returns the persisted record. Handler failures do not surface here;
    /// the record is already durable by the time handlers run.
    pub async fn publish(
        &self,
        request: &NotificationRequest,
    ) -> Result<NotificationRecord, AppError> {
        let address = Address::parse(&request.recipient_type, request.recipient.as_deref())
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let record = NotificationRecord::from_request(request, address);
        self.store.append(&record).await?;
        BUS_PUBLISHED_TOTAL.inc();

        let handlers = self.handlers.get(&record.kind);
        let count = handlers.map(|h| h.len()).unwrap_or(0);
        tracing::debug!(
            notification_id = %record.id,
            kind = %record.kind,
            handlers = count,
            "Notification persisted, dispatching"
        );

        if let Some(handlers) = handlers {
            for handler in handlers {
                if let Err(e) = handler.handle(&record).await {
                    BUS_HANDLER_ERRORS_TOTAL.inc();
                    tracing::error!(
                        notification_id = %record.id,
                        kind = %record.kind,
                        error = %e,
                        "Bus handler failed"
                    );
                }
            }
        }

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryNotificationStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Recording {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl BusHandler for Recording {
        async fn handle(&self, _record: &NotificationRecord) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(self.label);
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("handler down");
            }
            Ok(())
        }
    }

    fn handler(
        label: &'static str,
        log: &Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    ) -> Arc<Recording> {
        Arc::new(Recording {
            label,
            log: log.clone(),
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    fn request(recipient_type: &str, recipient: Option<&str>) -> NotificationRequest {
        NotificationRequest {
            kind: "in-app".to_string(),
            recipient_type: recipient_type.to_string(),
            recipient: recipient.map(str::to_string),
            payload: json!({"title": "hi"}),
            priority: 0,
        }
    }

    #[tokio::test]
    async fn test_invalid_address_is_rejected_before_persist() {
        let store = Arc::new(MemoryNotificationStore::new());
        let bus = MessageBus::new(store.clone());

        let err = bus.publish(&request("anycast", None)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_handlers_run_in_registration_order() {
        let store = Arc::new(MemoryNotificationStore::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = MessageBus::new(store);
        bus.register_handler(crate::notification::IN_APP, handler("first", &log, false));
        bus.register_handler(crate::notification::IN_APP, handler("second", &log, false));

        bus.publish(&request("broadcast", None)).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_siblings_or_publish() {
        let store = Arc::new(MemoryNotificationStore::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let failing = handler("failing", &log, true);
        let ok = handler("ok", &log, false);
        let mut bus = MessageBus::new(store.clone());
        bus.register_handler(crate::notification::IN_APP, failing.clone());
        bus.register_handler(crate::notification::IN_APP, ok.clone());

        let record = bus.publish(&request("unicast", Some("alice"))).await.unwrap();

        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ok.calls.load(Ordering::SeqCst), 1);
        // Persisted despite the handler failure
        assert!(store.get(record.id).await.is_some());
    }

    #[tokio::test]
    async fn test_kind_without_handlers_still_persists() {
        let store = Arc::new(MemoryNotificationStore::new());
        let bus = MessageBus::new(store.clone());

        let mut req = request("broadcast", None);
        req.kind = "email".to_string();
        let record = bus.publish(&req).await.unwrap();
        assert!(store.get(record.id).await.is_some());
    }
}
