//! Real-time delivery fan-out.
//!
//! Resolves a notification's address to live connections and pushes the
//! record to each, with per-connection failure isolation: one dead socket
//! never blocks delivery to the rest.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;

use crate::connection::Connection;
use crate::groups::GroupDirectory;
use crate::metrics::{
    NOTIFICATIONS_DELIVERED_TOTAL, NOTIFICATIONS_FAILED_TOTAL, NOTIFICATIONS_SENT_TOTAL,
};
use crate::notification::{Address, NotificationRecord, NOTIFICATIONS_TOPIC};
use crate::registry::ConnectionRegistry;
use crate::session::SessionManager;

/// Upper bound on in-flight sends during a broadcast fan-out.
const MAX_CONCURRENT_SENDS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryResult {
    pub targets: usize,
    pub delivered: usize,
    pub failed: usize,
}

pub struct NotificationRouter {
    registry: Arc<ConnectionRegistry>,
    directory: Arc<dyn GroupDirectory>,
    sessions: Arc<SessionManager>,
    delivered_total: AtomicU64,
    failed_total: AtomicU64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RouterStats {
    pub delivered_total: u64,
    pub failed_total: u64,
}

impl NotificationRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        directory: Arc<dyn GroupDirectory>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            registry,
            directory,
            sessions,
            delivered_total: AtomicU64::new(0),
            failed_total: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            delivered_total: self.delivered_total.load(Ordering::Relaxed),
            failed_total: self.failed_total.load(Ordering::Relaxed),
        }
    }

    /// Resolve the notification's address to the set of target connections.
    ///
    /// Unicast resolves through the user index, so a user receives their
    /// notifications on every device regardless of which topics each
    /// connection subscribed to. Multicast walks the authenticated users and
    /// keeps those the directory places in the group; a directory error for
    /// one user skips that user rather than failing the whole fan-out.
    pub async fn resolve_targets(&self, address: &Address) -> Vec<Arc<Connection>> {
        match address {
            Address::Unicast(user_id) => self.registry.connections_for_user(user_id),
            Address::Multicast(group_id) => {
                let mut targets = Vec::new();
                for user_id in self.registry.authenticated_users() {
                    let groups = match self.directory.groups_for_user(&user_id).await {
                        Ok(groups) => groups,
                        Err(e) => {
                            tracing::warn!(
                                user_id = %user_id,
                                group_id = %group_id,
                                error = %e,
                                "Group lookup failed, skipping user"
                            );
                            continue;
                        }
                    };
                    if groups.iter().any(|g| g.id == *group_id) {
                        targets.extend(self.registry.connections_for_user(&user_id));
                    }
                }
                targets
            }
            Address::Broadcast => self.registry.all_connections(),
        }
    }

    /// Push a record to every resolved target.
    ///
    /// Sends run concurrently up to [`MAX_CONCURRENT_SENDS`]. A failed send
    /// marks that connection for teardown and moves on; the failure never
    /// propagates to the caller.
    pub async fn deliver(&self, record: &NotificationRecord) -> DeliveryResult {
        let targets = self.resolve_targets(&record.address).await;
        NOTIFICATIONS_SENT_TOTAL
            .with_label_values(&[record.address.mode()])
            .inc();

        if targets.is_empty() {
            tracing::debug!(
                notification_id = %record.id,
                mode = record.address.mode(),
                "No live targets for notification"
            );
            return DeliveryResult {
                targets: 0,
                delivered: 0,
                failed: 0,
            };
        }

        let payload = match serde_json::to_value(record) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(notification_id = %record.id, error = %e, "Failed to serialize notification");
                return DeliveryResult {
                    targets: targets.len(),
                    delivered: 0,
                    failed: targets.len(),
                };
            }
        };

        let total = targets.len();
        let delivered = AtomicU64::new(0);
        let failed = AtomicU64::new(0);

        futures::stream::iter(targets)
            .for_each_concurrent(MAX_CONCURRENT_SENDS, |connection| {
                let payload = &payload;
                let delivered = &delivered;
                let failed = &failed;
                async move {
                    match self.send_to(&connection, payload).await {
                        Ok(()) => {
                            delivered.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(()) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
            .await;

        let delivered = delivered.load(Ordering::Relaxed) as usize;
        let failed = failed.load(Ordering::Relaxed) as usize;
        self.delivered_total
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.failed_total.fetch_add(failed as u64, Ordering::Relaxed);
        NOTIFICATIONS_DELIVERED_TOTAL.inc_by(delivered as u64);
        NOTIFICATIONS_FAILED_TOTAL.inc_by(failed as u64);

        tracing::debug!(
            notification_id = %record.id,
            mode = record.address.mode(),
            targets = total,
            delivered = delivered,
            failed = failed,
            "Notification fan-out complete"
        );

        DeliveryResult {
            targets: total,
            delivered,
            failed,
        }
    }

    async fn send_to(&self, connection: &Arc<Connection>, payload: &Value) -> Result<(), ()> {
        if let Err(e) = connection.send(NOTIFICATIONS_TOPIC, payload.clone()).await {
            tracing::warn!(
                connection_id = %connection.id,
                error = %e,
                "Send failed, scheduling disconnect"
            );
            let sessions = self.sessions.clone();
            let connection_id = connection.id;
            tokio::spawn(async move {
                sessions.disconnect(connection_id).await;
            });
            return Err(());
        }
        Ok(())
    }
}
