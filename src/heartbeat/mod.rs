//! Per-connection liveness monitoring.
//!
//! Each connection gets its own monitor task so a hung peer can never delay
//! probing of the others. The state machine is ACTIVE -> IDLE_PROBE_SENT ->
//! (ACTIVE | DEAD): once idle long enough the monitor sends a ping and races
//! the pong deadline against the connection's activity signal. Any inbound
//! message counts as liveness, not only a pong.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::WebSocketConfig;
use crate::connection::Connection;
use crate::metrics::{HEARTBEAT_EXPIRED_TOTAL, HEARTBEAT_PINGS_TOTAL};
use crate::session::SessionManager;
use crate::websocket::ServerFrame;

pub struct HeartbeatMonitor {
    config: WebSocketConfig,
    sessions: Arc<SessionManager>,
    connection: Arc<Connection>,
}

impl HeartbeatMonitor {
    pub fn new(
        config: WebSocketConfig,
        sessions: Arc<SessionManager>,
        connection: Arc<Connection>,
    ) -> Self {
        Self {
            config,
            sessions,
            connection,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Poll the connection's idle time until it dies or is closed elsewhere.
    pub async fn run(self) {
        let mut poll = tokio::time::interval(self.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip immediate first tick
        poll.tick().await;

        tracing::debug!(
            connection_id = %self.connection.id,
            idle_timeout_secs = self.config.idle_timeout,
            pong_timeout_secs = self.config.pong_timeout,
            "Heartbeat monitor started"
        );

        loop {
            poll.tick().await;

            if self.connection.is_closing() {
                break;
            }

            if self.connection.idle_seconds() < self.config.idle_timeout as i64 {
                continue;
            }

            if !self.probe().await {
                HEARTBEAT_EXPIRED_TOTAL.inc();
                tracing::warn!(
                    connection_id = %self.connection.id,
                    pong_timeout_secs = self.config.pong_timeout,
                    "No activity within pong deadline, disconnecting"
                );
                self.sessions.disconnect(self.connection.id).await;
                break;
            }
        }

        tracing::debug!(connection_id = %self.connection.id, "Heartbeat monitor stopped");
    }

    /// Send one ping and wait for proof of life. Returns false when the
    /// connection is dead (probe unanswered or transport write failed).
    async fn probe(&self) -> bool {
        // Register for the activity signal before sending the ping so a reply
        // arriving immediately after the write cannot be missed.
        let activity = self.connection.activity.notified();
        tokio::pin!(activity);

        tracing::debug!(
            connection_id = %self.connection.id,
            idle_secs = self.connection.idle_seconds(),
            "Connection idle, sending ping"
        );

        if self.connection.send_frame(ServerFrame::ping_now()).await.is_err() {
            return false;
        }
        HEARTBEAT_PINGS_TOTAL.inc();
        let probe_sent_at = Utc::now();

        match tokio::time::timeout(self.config.pong_timeout(), &mut activity).await {
            Ok(()) => true,
            // The signal races the deadline; trust the timestamp over the race
            Err(_) => self.connection.last_activity() > probe_sent_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbound;
    use crate::registry::ConnectionRegistry;
    use crate::topics::TopicRouter;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn test_config() -> WebSocketConfig {
        WebSocketConfig {
            poll_interval: 1,
            idle_timeout: 1,
            pong_timeout: 1,
        }
    }

    fn new_sessions() -> Arc<SessionManager> {
        Arc::new(SessionManager::new(
            Arc::new(ConnectionRegistry::new()),
            Arc::new(TopicRouter::new()),
        ))
    }

    async fn recv_ping(rx: &mut mpsc::Receiver<Outbound>) -> Option<Outbound> {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_idle_connection_gets_one_ping_then_disconnect() {
        let sessions = new_sessions();
        let (tx, mut rx) = mpsc::channel(8);
        let conn = Arc::new(Connection::new(tx));
        sessions.connect(conn.clone());
        conn.backdate_activity(120);

        let handle = HeartbeatMonitor::new(test_config(), sessions.clone(), conn.clone()).spawn();

        let first = recv_ping(&mut rx).await.expect("expected a ping");
        assert!(matches!(first, Outbound::Frame(ServerFrame::Ping { .. })));

        // No reply: the monitor must disconnect exactly once
        let next = recv_ping(&mut rx).await.expect("expected transport close");
        assert!(matches!(next, Outbound::Close));

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("monitor should stop")
            .unwrap();
        assert!(sessions.registry().is_empty());
    }

    #[tokio::test]
    async fn test_activity_during_probe_keeps_connection_alive() {
        let sessions = new_sessions();
        let (tx, mut rx) = mpsc::channel(8);
        let conn = Arc::new(Connection::new(tx));
        sessions.connect(conn.clone());
        conn.backdate_activity(120);

        let handle = HeartbeatMonitor::new(test_config(), sessions.clone(), conn.clone()).spawn();

        let first = recv_ping(&mut rx).await.expect("expected a ping");
        assert!(matches!(first, Outbound::Frame(ServerFrame::Ping { .. })));

        // Any inbound message counts as liveness proof
        conn.touch();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!sessions.registry().is_empty());
        assert!(!conn.is_closing());

        sessions.disconnect(conn.id).await;
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("monitor should stop after disconnect")
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_failure_triggers_disconnect() {
        let sessions = new_sessions();
        let (tx, rx) = mpsc::channel(8);
        let conn = Arc::new(Connection::new(tx));
        sessions.connect(conn.clone());
        conn.backdate_activity(120);
        // Writer task gone: the ping write must fail and kill the connection
        drop(rx);

        let handle = HeartbeatMonitor::new(test_config(), sessions.clone(), conn.clone()).spawn();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("monitor should stop")
            .unwrap();
        assert!(sessions.registry().is_empty());
    }
}
