//! A single live WebSocket connection and its local state.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, Notify, RwLock};
use uuid::Uuid;

use crate::websocket::ServerFrame;

/// Items queued toward the writer task that owns the WebSocket sink.
#[derive(Debug)]
pub enum Outbound {
    Frame(ServerFrame),
    Close,
}

/// The writer task for this connection is gone; the transport is dead.
#[derive(Debug, Error)]
#[error("connection {0} is closed")]
pub struct ConnectionClosed(pub Uuid);

/// One duplex transport plus its connection-local state.
///
/// The transport handle is owned exclusively by a writer task; everything here
/// talks to it through the bounded `mpsc` queue, which also gives per-connection
/// FIFO delivery.
pub struct Connection {
    pub id: Uuid,
    sender: mpsc::Sender<Outbound>,
    pub connected_at: DateTime<Utc>,
    user_id: RwLock<Option<String>>,
    subscriptions: RwLock<HashSet<String>>,
    /// Last activity as Unix milliseconds
    last_activity: AtomicI64,
    /// Woken on every inbound message; raced against the probe deadline
    pub activity: Notify,
    closing: AtomicBool,
}

impl Connection {
    pub fn new(sender: mpsc::Sender<Outbound>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            sender,
            connected_at: now,
            user_id: RwLock::new(None),
            subscriptions: RwLock::new(HashSet::new()),
            last_activity: AtomicI64::new(now.timestamp_millis()),
            activity: Notify::new(),
            closing: AtomicBool::new(false),
        }
    }

    /// Enqueue a topic envelope toward the transport.
    pub async fn send(&self, topic: &str, data: Value) -> Result<(), ConnectionClosed> {
        self.send_frame(ServerFrame::topic_message(topic, data))
            .await
    }

    pub async fn send_frame(&self, frame: ServerFrame) -> Result<(), ConnectionClosed> {
        self.sender
            .send(Outbound::Frame(frame))
            .await
            .map_err(|_| ConnectionClosed(self.id))
    }

    /// Ask the writer task to close the transport and stop.
    pub async fn close_transport(&self) {
        let _ = self.sender.send(Outbound::Close).await;
    }

    /// Associate a user id with this connection.
    ///
    /// Idempotent for the same id; a different id after authentication is
    /// rejected so the registry's user index stays coherent.
    pub async fn authenticate(&self, user_id: &str) -> bool {
        let mut guard = self.user_id.write().await;
        match guard.as_deref() {
            None => {
                *guard = Some(user_id.to_string());
                true
            }
            Some(existing) if existing == user_id => true,
            Some(existing) => {
                tracing::warn!(
                    connection_id = %self.id,
                    current_user = %existing,
                    attempted_user = %user_id,
                    "Rejecting re-authentication with a different user id"
                );
                false
            }
        }
    }

    pub async fn user_id(&self) -> Option<String> {
        self.user_id.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.user_id.read().await.is_some()
    }

    pub async fn add_subscription(&self, topic: &str) {
        self.subscriptions.write().await.insert(topic.to_string());
    }

    pub async fn remove_subscription(&self, topic: &str) {
        self.subscriptions.write().await.remove(topic);
    }

    pub async fn has_subscription(&self, topic: &str) -> bool {
        self.subscriptions.read().await.contains(topic)
    }

    pub async fn subscriptions_snapshot(&self) -> Vec<String> {
        self.subscriptions.read().await.iter().cloned().collect()
    }

    /// Record inbound activity and wake the liveness monitor if it is probing.
    pub fn touch(&self) {
        self.last_activity
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        self.activity.notify_waiters();
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_activity.load(Ordering::Relaxed))
            .unwrap_or_else(Utc::now)
    }

    pub fn idle_seconds(&self) -> i64 {
        let last = self.last_activity.load(Ordering::Relaxed);
        (Utc::now().timestamp_millis() - last) / 1000
    }

    /// Flip the closing guard. Returns true for exactly one caller, which then
    /// owns the teardown sequence.
    pub fn begin_close(&self) -> bool {
        !self.closing.swap(true, Ordering::SeqCst)
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn backdate_activity(&self, seconds: i64) {
        self.last_activity.store(
            Utc::now().timestamp_millis() - seconds * 1000,
            Ordering::Relaxed,
        );
    }
}
