use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Notification type enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// Chat message delivered while the recipient was offline
    MessageReceived,
    /// Someone asked to connect
    ConnectionRequest,
    /// A connection request was accepted
    ConnectionAccepted,
    /// User liked a post
    PostLiked,
    /// User commented on a post
    PostCommented,
    /// Job application changed status
    ApplicationStatus,
    /// Ephemeral announcement
    Announcement,
    /// System notification
    System,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::MessageReceived => "message_received",
            NotificationType::ConnectionRequest => "connection_request",
            NotificationType::ConnectionAccepted => "connection_accepted",
            NotificationType::PostLiked => "post_liked",
            NotificationType::PostCommented => "post_commented",
            NotificationType::ApplicationStatus => "application_status",
            NotificationType::Announcement => "announcement",
            NotificationType::System => "system",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "message_received" => Ok(NotificationType::MessageReceived),
            "connection_request" => Ok(NotificationType::ConnectionRequest),
            "connection_accepted" => Ok(NotificationType::ConnectionAccepted),
            "post_liked" => Ok(NotificationType::PostLiked),
            "post_commented" => Ok(NotificationType::PostCommented),
            "application_status" => Ok(NotificationType::ApplicationStatus),
            "announcement" => Ok(NotificationType::Announcement),
            "system" => Ok(NotificationType::System),
            other => Err(format!("unknown notification type: {other}")),
        }
    }
}

/// Notification priority level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl NotificationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPriority::Low => "low",
            NotificationPriority::Normal => "normal",
            NotificationPriority::High => "high",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "low" => NotificationPriority::Low,
            "high" => NotificationPriority::High,
            _ => NotificationPriority::Normal,
        }
    }
}

/// Core notification model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,

    pub recipient_id: Uuid,

    /// Sender user ID (if applicable)
    pub sender_id: Option<Uuid>,

    pub notification_type: NotificationType,

    pub title: String,

    pub message: String,

    /// Associated object ID (post, conversation, connection request, ...)
    pub source_id: Option<Uuid>,

    /// Associated object type
    pub source_type: Option<String>,

    /// Custom data as JSON
    pub metadata: Option<serde_json::Value>,

    /// Collapsing key: `type:source:recipient`
    pub group_key: String,

    /// Number of events folded into this record
    pub group_count: u32,

    pub priority: NotificationPriority,

    pub is_read: bool,

    pub read_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    /// Bumped when a grouped event updates the record in place
    pub updated_at: DateTime<Utc>,

    pub expires_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Builds the grouping key for a notification.
pub fn group_key(
    notification_type: NotificationType,
    source_id: Option<Uuid>,
    recipient_id: Uuid,
) -> String {
    let source = source_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "none".to_string());
    format!("{}:{}:{}", notification_type.as_str(), source, recipient_id)
}

/// Request to create a notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNotificationRequest {
    pub recipient_id: Uuid,
    #[serde(default)]
    pub sender_id: Option<Uuid>,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub source_id: Option<Uuid>,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub priority: NotificationPriority,
}

/// Result of a create: a fresh row or an in-place update of a grouped one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateOutcome {
    Created,
    Grouped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_type_round_trips_through_str() {
        for t in [
            NotificationType::MessageReceived,
            NotificationType::ConnectionRequest,
            NotificationType::PostLiked,
            NotificationType::Announcement,
        ] {
            assert_eq!(t.as_str().parse::<NotificationType>().unwrap(), t);
        }
        assert!("bogus".parse::<NotificationType>().is_err());
    }

    #[test]
    fn test_group_key_separates_recipients() {
        let post = Uuid::new_v4();
        let a = group_key(NotificationType::PostLiked, Some(post), Uuid::new_v4());
        let b = group_key(NotificationType::PostLiked, Some(post), Uuid::new_v4());
        assert_ne!(a, b);
        assert!(a.starts_with("post_liked:"));
    }

    #[test]
    fn test_create_request_defaults_priority() {
        let payload = serde_json::json!({
            "recipient_id": Uuid::new_v4(),
            "notification_type": "post_liked",
            "title": "New like",
            "message": "Someone liked your post"
        });
        let req: CreateNotificationRequest = serde_json::from_value(payload).unwrap();
        assert_eq!(req.priority, NotificationPriority::Normal);
        assert!(req.sender_id.is_none());
    }
}
