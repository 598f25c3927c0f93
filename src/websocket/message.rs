use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping,
    Pong,
    Authenticate { token: String },
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Message { topic: String, data: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Error,
}

/// Frames sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Pong,
    /// Liveness probe for an idle connection
    Ping {
        timestamp: i64,
    },
    AuthenticationResult {
        status: ResultStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    SubscriptionResult {
        status: ResultStatus,
        topic: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    UnsubscriptionResult {
        status: ResultStatus,
        topic: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Outcome of an inbound topic message that produced no dispatch
    MessageResult {
        status: ResultStatus,
        message: String,
    },
    /// Topic payload envelope, also used for real-time notification pushes
    Message {
        topic: String,
        data: Value,
        timestamp: i64,
    },
}

impl ServerFrame {
    pub fn ping_now() -> Self {
        Self::Ping {
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn topic_message(topic: impl Into<String>, data: Value) -> Self {
        Self::Message {
            topic: topic.into(),
            data,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn auth_success(user_id: impl Into<String>) -> Self {
        Self::AuthenticationResult {
            status: ResultStatus::Success,
            user_id: Some(user_id.into()),
            message: None,
        }
    }

    pub fn auth_error(message: impl Into<String>) -> Self {
        Self::AuthenticationResult {
            status: ResultStatus::Error,
            user_id: None,
            message: Some(message.into()),
        }
    }

    pub fn subscribed(topic: impl Into<String>) -> Self {
        Self::SubscriptionResult {
            status: ResultStatus::Success,
            topic: topic.into(),
            message: None,
        }
    }

    pub fn subscribe_error(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SubscriptionResult {
            status: ResultStatus::Error,
            topic: topic.into(),
            message: Some(message.into()),
        }
    }

    pub fn unsubscribed(topic: impl Into<String>) -> Self {
        Self::UnsubscriptionResult {
            status: ResultStatus::Success,
            topic: topic.into(),
            message: None,
        }
    }

    pub fn message_error(message: impl Into<String>) -> Self {
        Self::MessageResult {
            status: ResultStatus::Error,
            message: message.into(),
        }
    }

    pub fn message_noop(message: impl Into<String>) -> Self {
        Self::MessageResult {
            status: ResultStatus::Success,
            message: message.into(),
        }
    }
}
