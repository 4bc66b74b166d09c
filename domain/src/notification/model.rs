use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Notification identity. The backend uses either numeric or string ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NotificationId {
    Number(i64),
    Text(String),
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NotificationId::Number(id) => write!(f, "{id}"),
            NotificationId::Text(id) => write!(f, "{id}"),
        }
    }
}

impl From<i64> for NotificationId {
    fn from(id: i64) -> Self {
        NotificationId::Number(id)
    }
}

impl From<&str> for NotificationId {
    fn from(id: &str) -> Self {
        NotificationId::Text(id.to_string())
    }
}

/// A single notification as shown in the dashboard's notification panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(alias = "_id")]
    pub id: NotificationId,
    #[serde(default)]
    pub message: String,
    #[serde(alias = "createdAt", alias = "created_at", default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "isRead", alias = "is_read", alias = "read", default)]
    pub is_read: bool,
}

impl Notification {
    pub fn new(id: impl Into<NotificationId>, message: &str) -> Self {
        Self {
            id: id.into(),
            message: message.to_string(),
            timestamp: Utc::now(),
            is_read: false,
        }
    }
}
