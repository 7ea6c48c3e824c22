//! Message pipeline.
//!
//! Persist first, fan out second. The per-conversation lock is held from the
//! durable insert until the live fan-out has been queued, so every
//! connection observes a conversation's messages in sequence-number order.

use super::conversation_service::ConversationService;
use super::notification_service::NotificationService;
use super::read_receipts::ReadReceiptService;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{Attachment, Message, MessageKind, NewMessage};
use crate::store::ChatStore;
use crate::websocket::{ChannelId, EventHub, WsOutboundEvent};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

pub const MAX_MESSAGE_CHARS: usize = 5000;
pub const MAX_HISTORY_PAGE: usize = 100;

#[derive(Debug, Clone)]
pub struct SendMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    pub attachment: Option<Attachment>,
}

struct ConversationLock<'a> {
    locks: &'a DashMap<Uuid, Arc<Mutex<()>>>,
    conversation_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ConversationLock<'_> {
    fn drop(&mut self) {
        // Releasing the guard drops its Arc; a count of one is the map's own.
        self.guard.take();
        self.locks
            .remove_if(&self.conversation_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct MessageService {
    store: Arc<dyn ChatStore>,
    hub: EventHub,
    conversations: Arc<ConversationService>,
    notifications: Arc<NotificationService>,
    read_receipts: Arc<ReadReceiptService>,
    conversation_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl MessageService {
    pub fn new(
        store: Arc<dyn ChatStore>,
        hub: EventHub,
        conversations: Arc<ConversationService>,
        notifications: Arc<NotificationService>,
        read_receipts: Arc<ReadReceiptService>,
    ) -> Self {
        Self {
            store,
            hub,
            conversations,
            notifications,
            read_receipts,
            conversation_locks: DashMap::new(),
        }
    }

    /// Serializes persist + fan-out per conversation. The map entry is
    /// removed when its last holder releases it.
    async fn lock_conversation(&self, conversation_id: Uuid) -> ConversationLock<'_> {
        let lock = self
            .conversation_locks
            .entry(conversation_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        ConversationLock {
            locks: &self.conversation_locks,
            conversation_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    pub fn locked_conversation_count(&self) -> usize {
        self.conversation_locks.len()
    }

    fn validate_content(
        kind: MessageKind,
        content: &str,
        attachment: Option<&Attachment>,
    ) -> AppResult<()> {
        if content.chars().count() > MAX_MESSAGE_CHARS {
            return Err(AppError::InvalidInput(format!(
                "message exceeds {MAX_MESSAGE_CHARS} characters"
            )));
        }
        if kind.requires_attachment() {
            match attachment {
                Some(a) if !a.url.trim().is_empty() => Ok(()),
                _ => Err(AppError::InvalidInput(format!(
                    "{} messages require an attachment",
                    kind.as_str()
                ))),
            }
        } else if content.trim().is_empty() {
            Err(AppError::InvalidInput("message content is empty".into()))
        } else {
            Ok(())
        }
    }

    /// Validate, persist, fan out, then notify offline participants.
    ///
    /// Nothing is delivered or notified unless the store accepted the
    /// message. Offline-notification failures are logged; the message is
    /// already durable and the call still succeeds.
    pub async fn send_message(&self, req: SendMessage) -> AppResult<Message> {
        let conversation = self
            .conversations
            .require_participant(req.conversation_id, req.sender_id)
            .await
            .map_err(|e| match e {
                AppError::NotFound => AppError::Unauthorized,
                other => other,
            })?;

        Self::validate_content(req.kind, &req.content, req.attachment.as_ref())?;

        let guard = self.lock_conversation(conversation.id).await;

        let message = self
            .store
            .insert_message(
                NewMessage {
                    conversation_id: req.conversation_id,
                    sender_id: req.sender_id,
                    content: req.content,
                    kind: req.kind,
                    attachment: req.attachment,
                },
                Utc::now(),
            )
            .await?;
        self.read_receipts.on_message_created(&message);

        let delivered = self.hub.publish(
            ChannelId::Conversation(conversation.id),
            &WsOutboundEvent::NewMessage(message.clone()),
            None,
        );
        let presence = self.hub.presence();
        let offline: Vec<Uuid> = conversation
            .other_participants(req.sender_id)
            .filter(|user_id| !presence.is_online(*user_id))
            .collect();
        drop(guard);

        metrics::record_message_sent();
        info!(
            message_id = %message.id,
            conversation_id = %conversation.id,
            sequence_number = message.sequence_number,
            delivered,
            offline = offline.len(),
            "message sent"
        );

        for recipient_id in offline {
            if let Err(err) = self
                .notifications
                .notify_message_received(
                    recipient_id,
                    message.sender_id,
                    conversation.id,
                    &message.content,
                )
                .await
            {
                warn!(
                    message_id = %message.id,
                    recipient_id = %recipient_id,
                    error = %err,
                    "offline notification failed"
                );
            }
        }

        Ok(message)
    }

    async fn load_own_message(&self, message_id: Uuid, user_id: Uuid) -> AppResult<Message> {
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if message.sender_id != user_id {
            return Err(AppError::Unauthorized);
        }
        self.conversations
            .require_participant(message.conversation_id, user_id)
            .await?;
        Ok(message)
    }

    /// Sender-only. Deleted messages cannot be edited.
    pub async fn edit_message(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        content: String,
    ) -> AppResult<Message> {
        let message = self.load_own_message(message_id, user_id).await?;
        if message.is_deleted {
            return Err(AppError::InvalidInput("message was deleted".into()));
        }
        if content.trim().is_empty() || content.chars().count() > MAX_MESSAGE_CHARS {
            return Err(AppError::InvalidInput("invalid message content".into()));
        }

        let _guard = self.lock_conversation(message.conversation_id).await;
        let updated = self
            .store
            .edit_message(message_id, content, Utc::now())
            .await?
            .ok_or(AppError::NotFound)?;
        self.hub.publish(
            ChannelId::Conversation(updated.conversation_id),
            &WsOutboundEvent::MessageUpdated(updated.clone()),
            None,
        );
        info!(message_id = %message_id, "message edited");
        Ok(updated)
    }

    /// Sender-only soft delete. Receipts and sequence number are kept.
    pub async fn delete_message(&self, message_id: Uuid, user_id: Uuid) -> AppResult<Message> {
        let message = self.load_own_message(message_id, user_id).await?;
        if message.is_deleted {
            return Ok(message);
        }

        let _guard = self.lock_conversation(message.conversation_id).await;
        let deleted = self
            .store
            .soft_delete_message(message_id, Utc::now())
            .await?
            .ok_or(AppError::NotFound)?;
        self.hub.publish(
            ChannelId::Conversation(deleted.conversation_id),
            &WsOutboundEvent::MessageDeleted(deleted.clone()),
            None,
        );
        info!(message_id = %message_id, "message deleted");
        Ok(deleted)
    }

    /// Page of history ending before `before` (exclusive), oldest first.
    pub async fn history(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        before: Option<i64>,
        limit: usize,
    ) -> AppResult<Vec<Message>> {
        self.conversations
            .require_participant(conversation_id, user_id)
            .await?;
        self.store
            .list_messages(conversation_id, before, limit.clamp(1, MAX_HISTORY_PAGE))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(url: &str) -> Attachment {
        Attachment {
            url: url.into(),
            file_name: "cv.pdf".into(),
            mime_type: "application/pdf".into(),
            size_bytes: 1024,
        }
    }

    #[test]
    fn test_validate_text() {
        assert!(MessageService::validate_content(MessageKind::Text, "hi", None).is_ok());
        assert!(MessageService::validate_content(MessageKind::Text, "   ", None).is_err());
        let long = "a".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(MessageService::validate_content(MessageKind::Text, &long, None).is_err());
    }

    #[test]
    fn test_validate_attachment_kinds() {
        assert!(MessageService::validate_content(MessageKind::File, "", None).is_err());
        assert!(
            MessageService::validate_content(MessageKind::File, "", Some(&attachment(""))).is_err()
        );
        assert!(MessageService::validate_content(
            MessageKind::Image,
            "",
            Some(&attachment("https://cdn.example.com/a.png"))
        )
        .is_ok());
    }
}
