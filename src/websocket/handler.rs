use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::connection::{Connection, Outbound};
use crate::heartbeat::HeartbeatMonitor;
use crate::server::AppState;
use crate::topics::DispatchOutcome;

use super::message::{ClientFrame, ServerFrame};

const CHANNEL_BUFFER_SIZE: usize = 32;

/// Bound on token verification so a stalled verifier cannot wedge the reader.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket upgrade handler.
///
/// The upgrade itself requires no credentials; connections start anonymous
/// and authenticate in-band with an `authenticate` frame.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive an established WebSocket connection until it closes.
#[tracing::instrument(name = "ws.connection", skip(socket, state))]
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (tx, mut rx) = mpsc::channel::<Outbound>(CHANNEL_BUFFER_SIZE);
    let connection = Arc::new(Connection::new(tx));
    let connection_id = connection.id;

    state.sessions.connect(connection.clone());
    let heartbeat = HeartbeatMonitor::new(
        state.settings.websocket.clone(),
        state.sessions.clone(),
        connection.clone(),
    )
    .spawn();

    tracing::info!(connection_id = %connection_id, "WebSocket connection established");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Writer task: sole owner of the sink, drains the connection's queue
    let send_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Frame(frame) => {
                    let text = match serde_json::to_string(&frame) {
                        Ok(t) => t,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to serialize frame");
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = ws_sender.close().await;
                    break;
                }
            }
        }
    });

    // Reader loop runs on this task; returning tears the connection down
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(msg) => {
                if !process_message(msg, &state, &connection).await {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(connection_id = %connection_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    state.sessions.disconnect(connection_id).await;
    heartbeat.abort();
    let _ = send_task.await;

    tracing::info!(connection_id = %connection_id, "WebSocket connection closed");
}

/// Process a received WebSocket message.
/// Returns false if the connection should be closed.
async fn process_message(msg: Message, state: &AppState, connection: &Arc<Connection>) -> bool {
    match msg {
        Message::Text(text) => {
            connection.touch();

            // Malformed and unknown frames are dropped without a reply
            let frame: ClientFrame = match serde_json::from_str(&text) {
                Ok(f) => f,
                Err(e) => {
                    tracing::debug!(
                        connection_id = %connection.id,
                        error = %e,
                        "Ignoring unparseable frame"
                    );
                    return true;
                }
            };

            handle_client_frame(frame, state, connection).await;
            true
        }
        Message::Binary(_) => true,
        Message::Ping(_) | Message::Pong(_) => {
            connection.touch();
            true
        }
        Message::Close(_) => {
            tracing::debug!(connection_id = %connection.id, "Received close frame");
            false
        }
    }
}

async fn handle_client_frame(frame: ClientFrame, state: &AppState, connection: &Arc<Connection>) {
    match frame {
        ClientFrame::Ping => {
            let _ = connection.send_frame(ServerFrame::Pong).await;
        }
        // Pong already counted as activity in process_message
        ClientFrame::Pong => {}
        ClientFrame::Authenticate { token } => {
            handle_authenticate(&token, state, connection).await;
        }
        ClientFrame::Subscribe { topic } => {
            if !is_valid_topic_name(&topic) {
                tracing::warn!(
                    connection_id = %connection.id,
                    topic = %topic,
                    "Invalid topic name"
                );
                let _ = connection
                    .send_frame(ServerFrame::subscribe_error(topic, "Invalid topic name"))
                    .await;
                return;
            }
            state.sessions.subscribe(connection, &topic).await;
            let _ = connection.send_frame(ServerFrame::subscribed(topic)).await;
        }
        ClientFrame::Unsubscribe { topic } => {
            state.sessions.unsubscribe(connection, &topic).await;
            let _ = connection
                .send_frame(ServerFrame::unsubscribed(topic))
                .await;
        }
        ClientFrame::Message { topic, data } => {
            let outcome = state.topics.dispatch_message(connection, &topic, &data).await;
            let reply = match outcome {
                DispatchOutcome::NotSubscribed => {
                    Some(ServerFrame::message_error("Not subscribed to this topic"))
                }
                DispatchOutcome::NoHandlers => Some(ServerFrame::message_noop(
                    "no handlers registered for this topic",
                )),
                DispatchOutcome::Handled { .. } => None,
            };
            if let Some(reply) = reply {
                let _ = connection.send_frame(reply).await;
            }
        }
    }
}

async fn handle_authenticate(token: &str, state: &AppState, connection: &Arc<Connection>) {
    let principal = match tokio::time::timeout(AUTH_TIMEOUT, state.verifier.verify(token)).await {
        Ok(Ok(principal)) => principal,
        Ok(Err(e)) => {
            tracing::warn!(connection_id = %connection.id, error = %e, "Token verification failed");
            let _ = connection
                .send_frame(ServerFrame::auth_error("Invalid authentication token"))
                .await;
            return;
        }
        Err(_) => {
            tracing::warn!(connection_id = %connection.id, "Token verification timed out");
            let _ = connection
                .send_frame(ServerFrame::auth_error("Authentication timed out"))
                .await;
            return;
        }
    };

    if state.sessions.authenticate(connection, &principal.user_id).await {
        tracing::info!(
            connection_id = %connection.id,
            user_id = %principal.user_id,
            "Connection authenticated"
        );
        let _ = connection
            .send_frame(ServerFrame::auth_success(principal.user_id))
            .await;
    } else {
        let _ = connection
            .send_frame(ServerFrame::auth_error(
                "Connection already authenticated as another user",
            ))
            .await;
    }
}

/// Validate topic name
fn is_valid_topic_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 64 {
        return false;
    }

    // Only allow alphanumeric, dash, underscore, and dot
    name.chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_topic_names() {
        assert!(is_valid_topic_name("orders"));
        assert!(is_valid_topic_name("system-alerts"));
        assert!(is_valid_topic_name("user_notifications"));
        assert!(is_valid_topic_name("v1.events"));
        assert!(is_valid_topic_name("Topic123"));
    }

    #[test]
    fn test_invalid_topic_names() {
        assert!(!is_valid_topic_name(""));
        assert!(!is_valid_topic_name("topic with spaces"));
        assert!(!is_valid_topic_name("topic/path"));
        assert!(!is_valid_topic_name("topic@special"));
        // Too long
        assert!(!is_valid_topic_name(&"a".repeat(65)));
    }
}
