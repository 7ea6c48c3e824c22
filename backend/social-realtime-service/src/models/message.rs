use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content shown in place of a soft-deleted message.
pub const DELETED_MESSAGE_TOMBSTONE: &str = "This message was deleted";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    File,
    Image,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::File => "file",
            MessageKind::Image => "image",
            MessageKind::System => "system",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "file" => MessageKind::File,
            "image" => MessageKind::Image,
            "system" => MessageKind::System,
            _ => MessageKind::Text,
        }
    }

    pub fn requires_attachment(&self) -> bool {
        matches!(self, MessageKind::File | MessageKind::Image)
    }
}

/// File metadata carried by `file` and `image` messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadReceipt {
    pub user_id: Uuid,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    /// Per-conversation, strictly increasing persistence order.
    pub sequence_number: i64,
    pub created_at: DateTime<Utc>,
    /// At most one receipt per user.
    pub read_by: Vec<ReadReceipt>,
    pub is_edited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_content: Option<String>,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_read_by(&self, user_id: Uuid) -> bool {
        self.read_by.iter().any(|r| r.user_id == user_id)
    }

    /// Counts towards `user_id`'s unread total.
    pub fn is_unread_for(&self, user_id: Uuid) -> bool {
        self.sender_id != user_id && !self.is_read_by(user_id)
    }

    /// Adds a receipt unless one already exists. Returns whether it was added.
    pub fn add_receipt(&mut self, user_id: Uuid, read_at: DateTime<Utc>) -> bool {
        if self.is_read_by(user_id) {
            return false;
        }
        self.read_by.push(ReadReceipt { user_id, read_at });
        true
    }

    pub fn apply_edit(&mut self, content: String, at: DateTime<Utc>) {
        if self.original_content.is_none() {
            self.original_content = Some(self.content.clone());
        }
        self.content = content;
        self.is_edited = true;
        self.edited_at = Some(at);
    }

    pub fn apply_soft_delete(&mut self, at: DateTime<Utc>) {
        self.content = DELETED_MESSAGE_TOMBSTONE.to_string();
        self.original_content = None;
        self.attachment = None;
        self.is_deleted = true;
        self.deleted_at = Some(at);
    }
}

/// Validated input for the message pipeline before it becomes a row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    pub attachment: Option<Attachment>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(sender_id: Uuid) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id,
            content: "hello".to_string(),
            kind: MessageKind::Text,
            attachment: None,
            sequence_number: 1,
            created_at: Utc::now(),
            read_by: Vec::new(),
            is_edited: false,
            original_content: None,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
        }
    }

    #[test]
    fn test_receipt_is_keyed_by_user() {
        let reader = Uuid::new_v4();
        let mut msg = sample(Uuid::new_v4());
        assert!(msg.add_receipt(reader, Utc::now()));
        assert!(!msg.add_receipt(reader, Utc::now()));
        assert_eq!(msg.read_by.len(), 1);
        assert!(!msg.is_unread_for(reader));
    }

    #[test]
    fn test_own_message_is_never_unread() {
        let sender = Uuid::new_v4();
        let msg = sample(sender);
        assert!(!msg.is_unread_for(sender));
    }

    #[test]
    fn test_edit_keeps_first_original() {
        let mut msg = sample(Uuid::new_v4());
        msg.apply_edit("second".into(), Utc::now());
        msg.apply_edit("third".into(), Utc::now());
        assert_eq!(msg.content, "third");
        assert_eq!(msg.original_content.as_deref(), Some("hello"));
        assert!(msg.is_edited);
    }

    #[test]
    fn test_soft_delete_keeps_receipts() {
        let reader = Uuid::new_v4();
        let mut msg = sample(Uuid::new_v4());
        msg.add_receipt(reader, Utc::now());
        msg.apply_soft_delete(Utc::now());
        assert!(msg.is_deleted);
        assert_eq!(msg.content, DELETED_MESSAGE_TOMBSTONE);
        assert!(msg.is_read_by(reader));
    }

    #[test]
    fn test_soft_delete_drops_edited_original() {
        let mut msg = sample(Uuid::new_v4());
        msg.apply_edit("redacted".into(), Utc::now());
        msg.apply_soft_delete(Utc::now());
        assert!(msg.original_content.is_none());
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("hello"));
        assert!(!json.contains("redacted"));
    }
}
