//! Server-to-client events.
//!
//! Every frame is `{"type": "<name>", "data": {...}}`. Event names are part
//! of the wire contract with the web and mobile clients.

use crate::error::AppError;
use crate::models::{Message, Notification};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsOutboundEvent {
    #[serde(rename = "connected")]
    Connected { connection_id: Uuid, user_id: Uuid },

    #[serde(rename = "notification:new")]
    NotificationNew(Notification),

    #[serde(rename = "chat:new_message")]
    NewMessage(Message),

    /// Acknowledges a `chat:send` on the sending connection.
    #[serde(rename = "chat:message_sent")]
    MessageSent {
        #[serde(skip_serializing_if = "Option::is_none")]
        client_ref: Option<String>,
        message_id: Uuid,
        sequence_number: i64,
    },

    #[serde(rename = "chat:message_updated")]
    MessageUpdated(Message),

    #[serde(rename = "chat:message_deleted")]
    MessageDeleted(Message),

    #[serde(rename = "chat:messages_read")]
    MessagesRead {
        conversation_id: Uuid,
        user_id: Uuid,
        message_ids: Vec<Uuid>,
        read_at: DateTime<Utc>,
    },

    #[serde(rename = "chat:joined")]
    Joined {
        conversation_id: Uuid,
        unread_count: u64,
    },

    #[serde(rename = "chat:left")]
    Left { conversation_id: Uuid },

    #[serde(rename = "chat:user_typing")]
    UserTyping {
        conversation_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },

    #[serde(rename = "chat:unread_count")]
    ConversationUnreadCount {
        conversation_id: Uuid,
        unread_count: u64,
    },

    #[serde(rename = "notification:unread_count")]
    NotificationUnreadCount { unread_count: u64 },

    #[serde(rename = "user:online")]
    UserOnline { user_id: Uuid },

    #[serde(rename = "user:offline")]
    UserOffline { user_id: Uuid },

    #[serde(rename = "post:updated")]
    PostUpdated {
        post_id: Uuid,
        changes: serde_json::Value,
    },

    #[serde(rename = "pong")]
    Pong,

    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl WsOutboundEvent {
    pub fn from_error(err: &AppError) -> Self {
        WsOutboundEvent::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            WsOutboundEvent::Connected { .. } => "connected",
            WsOutboundEvent::NotificationNew(_) => "notification:new",
            WsOutboundEvent::NewMessage(_) => "chat:new_message",
            WsOutboundEvent::MessageSent { .. } => "chat:message_sent",
            WsOutboundEvent::MessageUpdated(_) => "chat:message_updated",
            WsOutboundEvent::MessageDeleted(_) => "chat:message_deleted",
            WsOutboundEvent::MessagesRead { .. } => "chat:messages_read",
            WsOutboundEvent::Joined { .. } => "chat:joined",
            WsOutboundEvent::Left { .. } => "chat:left",
            WsOutboundEvent::UserTyping { .. } => "chat:user_typing",
            WsOutboundEvent::ConversationUnreadCount { .. } => "chat:unread_count",
            WsOutboundEvent::NotificationUnreadCount { .. } => "notification:unread_count",
            WsOutboundEvent::UserOnline { .. } => "user:online",
            WsOutboundEvent::UserOffline { .. } => "user:offline",
            WsOutboundEvent::PostUpdated { .. } => "post:updated",
            WsOutboundEvent::Pong => "pong",
            WsOutboundEvent::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_names() {
        let user_id = Uuid::new_v4();
        let json = WsOutboundEvent::UserOnline { user_id }.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "user:online");
        assert_eq!(value["data"]["user_id"], user_id.to_string());

        let typing = WsOutboundEvent::UserTyping {
            conversation_id: Uuid::new_v4(),
            user_id,
            is_typing: true,
        };
        let value: serde_json::Value = serde_json::to_value(&typing).unwrap();
        assert_eq!(value["type"], typing.event_name());
    }

    #[test]
    fn test_error_event_carries_code() {
        let event = WsOutboundEvent::from_error(&AppError::Unauthorized);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["data"]["code"], "UNAUTHORIZED");
    }

    #[test]
    fn test_unit_variant_serializes_without_data() {
        let value = serde_json::to_value(WsOutboundEvent::Pong).unwrap();
        assert_eq!(value["type"], "pong");
    }
}
