//! Notification data model shared by the HTTP surface, the bus, and the
//! delivery router.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Addressing mode of a notification.
///
/// Serializes as a `recipient_type` / `recipient` pair so stored records and
/// wire payloads share one shape; broadcast carries no recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "recipient_type", content = "recipient", rename_all = "lowercase")]
pub enum Address {
    /// One user, every device they have connected.
    Unicast(String),
    /// Every member of a group.
    Multicast(String),
    /// Every live connection, authenticated or not.
    Broadcast,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("unknown recipient_type: {0}")]
    UnknownRecipientType(String),
    #[error("recipient is required for {0} notifications")]
    MissingRecipient(&'static str),
}

impl Address {
    /// Parse the `recipient_type` / `recipient` pair from an inbound request.
    /// The recipient type is matched case-insensitively.
    pub fn parse(recipient_type: &str, recipient: Option<&str>) -> Result<Self, AddressError> {
        match recipient_type.to_ascii_lowercase().as_str() {
            "unicast" => recipient
                .filter(|r| !r.is_empty())
                .map(|r| Address::Unicast(r.to_string()))
                .ok_or(AddressError::MissingRecipient("unicast")),
            "multicast" => recipient
                .filter(|r| !r.is_empty())
                .map(|r| Address::Multicast(r.to_string()))
                .ok_or(AddressError::MissingRecipient("multicast")),
            "broadcast" => Ok(Address::Broadcast),
            other => Err(AddressError::UnknownRecipientType(other.to_string())),
        }
    }

    /// Label used for metrics and logs.
    pub fn mode(&self) -> &'static str {
        match self {
            Address::Unicast(_) => "unicast",
            Address::Multicast(_) => "multicast",
            Address::Broadcast => "broadcast",
        }
    }
}

/// Inbound publish request, from the HTTP API or an internal producer.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationRequest {
    /// Notification kind, e.g. "in-app"; selects which bus handlers run.
    #[serde(rename = "type")]
    pub kind: String,
    pub recipient_type: String,
    #[serde(default)]
    pub recipient: Option<String>,
    pub payload: Value,
    #[serde(default)]
    pub priority: i32,
}

/// A persisted notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub address: Address,
    pub payload: Value,
    pub priority: i32,
    pub delivered: bool,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn from_request(request: &NotificationRequest, address: Address) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: request.kind.clone(),
            address,
            payload: request.payload.clone(),
            priority: request.priority,
            delivered: false,
            read: false,
            created_at: Utc::now(),
        }
    }
}
