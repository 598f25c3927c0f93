//! Notification model and real-time delivery.

mod backlog;
mod router;
mod types;

pub use backlog::NotificationsTopic;
pub use router::{DeliveryResult, NotificationRouter, RouterStats};
pub use types::{Address, AddressError, NotificationRecord, NotificationRequest};

use std::sync::Arc;

use async_trait::async_trait;

use crate::bus::BusHandler;

/// Topic carrying notification envelopes to clients.
pub const NOTIFICATIONS_TOPIC: &str = "notifications";

/// Notification kind handled by real-time push.
pub const IN_APP: &str = "in-app";

/// Bus handler that fans a persisted record out to live connections.
pub struct RealtimePush {
    router: Arc<NotificationRouter>,
}

impl RealtimePush {
    pub fn new(router: Arc<NotificationRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl BusHandler for RealtimePush {
    async fn handle(&self, record: &NotificationRecord) -> anyhow::Result<()> {
        self.router.deliver(record).await;
        Ok(())
    }
}
