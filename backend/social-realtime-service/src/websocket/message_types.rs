use crate::models::{Attachment, MessageKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inbound WebSocket commands from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientCommand {
    #[serde(rename = "chat:join")]
    JoinConversation { conversation_id: Uuid },

    #[serde(rename = "chat:leave")]
    LeaveConversation { conversation_id: Uuid },

    #[serde(rename = "chat:send")]
    SendMessage {
        conversation_id: Uuid,
        content: String,
        #[serde(default)]
        kind: MessageKind,
        #[serde(default)]
        attachment: Option<Attachment>,
        /// Opaque client id echoed back in `chat:message_sent`
        #[serde(default)]
        client_ref: Option<String>,
    },

    #[serde(rename = "chat:typing")]
    Typing {
        conversation_id: Uuid,
        #[serde(default = "default_true")]
        is_typing: bool,
    },

    #[serde(rename = "chat:mark_read")]
    MarkConversationRead { conversation_id: Uuid },

    #[serde(rename = "notification:mark_read")]
    MarkNotificationRead { notification_id: Uuid },

    #[serde(rename = "notification:mark_all_read")]
    MarkAllNotificationsRead,

    #[serde(rename = "ping")]
    Ping,
}

fn default_true() -> bool {
    true
}

impl ClientCommand {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
