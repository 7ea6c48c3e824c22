//! In-process [`ChatStore`] used when no `DATABASE_URL` is configured and by
//! the test suites. All state sits behind one `RwLock`, so every trait method
//! is atomic with respect to the others.

use super::{ChatStore, NotificationQuery};
use crate::error::{AppError, AppResult};
use crate::models::{
    direct_pair, Conversation, ConversationKind, CreateOutcome, Message, NewMessage, Notification,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    conversations: HashMap<Uuid, Conversation>,
    direct_index: HashMap<(Uuid, Uuid), Uuid>,
    /// conversation_id -> messages in sequence order
    messages: HashMap<Uuid, Vec<Message>>,
    message_index: HashMap<Uuid, Uuid>,
    notifications: HashMap<Uuid, Notification>,
}

impl Inner {
    fn message_mut(&mut self, message_id: Uuid) -> Option<&mut Message> {
        let conversation_id = *self.message_index.get(&message_id)?;
        self.messages
            .get_mut(&conversation_id)?
            .iter_mut()
            .find(|m| m.id == message_id)
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an outage: every subsequent call fails with
    /// `AppError::Persistence` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Persistence("memory store marked unavailable".into()));
        }
        Ok(())
    }

    fn new_conversation(kind: ConversationKind, mut participant_ids: Vec<Uuid>) -> Conversation {
        participant_ids.sort();
        participant_ids.dedup();
        let now = Utc::now();
        Conversation {
            id: Uuid::new_v4(),
            kind,
            participant_ids,
            last_message_id: None,
            last_activity_at: now,
            is_active: true,
            created_at: now,
        }
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn find_or_create_direct(&self, a: Uuid, b: Uuid) -> AppResult<Conversation> {
        self.check_available()?;
        let key = direct_pair(a, b);
        let mut inner = self.inner.write().await;

        if let Some(id) = inner.direct_index.get(&key).copied() {
            if let Some(existing) = inner.conversations.get_mut(&id) {
                existing.is_active = true;
                return Ok(existing.clone());
            }
        }

        let conversation = Self::new_conversation(ConversationKind::Direct, vec![key.0, key.1]);
        inner.direct_index.insert(key, conversation.id);
        inner
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn create_group(&self, participant_ids: Vec<Uuid>) -> AppResult<Conversation> {
        self.check_available()?;
        let conversation = Self::new_conversation(ConversationKind::Group, participant_ids);
        let mut inner = self.inner.write().await;
        inner
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> AppResult<Option<Conversation>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner.conversations.get(&conversation_id).cloned())
    }

    async fn list_conversations(&self, user_id: Uuid) -> AppResult<Vec<Conversation>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        let mut list: Vec<Conversation> = inner
            .conversations
            .values()
            .filter(|c| c.is_active && c.is_participant(user_id))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(list)
    }

    async fn deactivate_conversation(&self, conversation_id: Uuid) -> AppResult<()> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        let conversation = inner
            .conversations
            .get_mut(&conversation_id)
            .ok_or(AppError::NotFound)?;
        conversation.is_active = false;
        Ok(())
    }

    async fn insert_message(&self, new: NewMessage, now: DateTime<Utc>) -> AppResult<Message> {
        self.check_available()?;
        let mut inner = self.inner.write().await;

        let conversation = inner
            .conversations
            .get_mut(&new.conversation_id)
            .ok_or(AppError::NotFound)?;

        let message_id = Uuid::new_v4();
        conversation.last_message_id = Some(message_id);
        conversation.last_activity_at = now;
        conversation.is_active = true;

        let log = inner.messages.entry(new.conversation_id).or_default();
        let sequence_number = log.last().map(|m| m.sequence_number + 1).unwrap_or(1);

        let message = Message {
            id: message_id,
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            content: new.content,
            kind: new.kind,
            attachment: new.attachment,
            sequence_number,
            created_at: now,
            read_by: Vec::new(),
            is_edited: false,
            original_content: None,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
        };
        log.push(message.clone());
        inner.message_index.insert(message_id, new.conversation_id);

        Ok(message)
    }

    async fn get_message(&self, message_id: Uuid) -> AppResult<Option<Message>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        let found = inner.message_index.get(&message_id).and_then(|cid| {
            inner
                .messages
                .get(cid)
                .and_then(|log| log.iter().find(|m| m.id == message_id).cloned())
        });
        Ok(found)
    }

    async fn edit_message(
        &self,
        message_id: Uuid,
        content: String,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Message>> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        Ok(inner.message_mut(message_id).map(|m| {
            m.apply_edit(content, now);
            m.clone()
        }))
    }

    async fn soft_delete_message(
        &self,
        message_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Message>> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        Ok(inner.message_mut(message_id).map(|m| {
            if !m.is_deleted {
                m.apply_soft_delete(now);
            }
            m.clone()
        }))
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        before: Option<i64>,
        limit: usize,
    ) -> AppResult<Vec<Message>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        let Some(log) = inner.messages.get(&conversation_id) else {
            return Ok(Vec::new());
        };
        let eligible: Vec<&Message> = log
            .iter()
            .filter(|m| before.map(|b| m.sequence_number < b).unwrap_or(true))
            .collect();
        let skip = eligible.len().saturating_sub(limit);
        Ok(eligible.into_iter().skip(skip).cloned().collect())
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Uuid>> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        let Some(log) = inner.messages.get_mut(&conversation_id) else {
            return Ok(Vec::new());
        };
        let marked = log
            .iter_mut()
            .filter(|m| m.sender_id != user_id)
            .filter_map(|m| m.add_receipt(user_id, now).then_some(m.id))
            .collect();
        Ok(marked)
    }

    async fn unread_count(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<u64> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .get(&conversation_id)
            .map(|log| log.iter().filter(|m| m.is_unread_for(user_id)).count() as u64)
            .unwrap_or(0))
    }

    async fn upsert_notification(
        &self,
        candidate: Notification,
        group_since: Option<DateTime<Utc>>,
    ) -> AppResult<(Notification, CreateOutcome)> {
        self.check_available()?;
        let mut inner = self.inner.write().await;

        if let Some(since) = group_since {
            let existing = inner.notifications.values_mut().find(|n| {
                n.group_key == candidate.group_key && !n.is_read && n.created_at >= since
            });
            if let Some(existing) = existing {
                existing.title = candidate.title;
                existing.message = candidate.message;
                existing.sender_id = candidate.sender_id;
                existing.metadata = candidate.metadata;
                existing.priority = existing.priority.max(candidate.priority);
                existing.group_count += 1;
                existing.updated_at = candidate.updated_at;
                return Ok((existing.clone(), CreateOutcome::Grouped));
            }
        }

        inner.notifications.insert(candidate.id, candidate.clone());
        Ok((candidate, CreateOutcome::Created))
    }

    async fn get_notification(&self, notification_id: Uuid) -> AppResult<Option<Notification>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner.notifications.get(&notification_id).cloned())
    }

    async fn list_notifications(
        &self,
        recipient_id: Uuid,
        query: NotificationQuery,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Notification>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        let mut list: Vec<Notification> = inner
            .notifications
            .values()
            .filter(|n| n.recipient_id == recipient_id && !n.is_expired(now))
            .filter(|n| !query.unread_only || !n.is_read)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        list.truncate(query.limit);
        Ok(list)
    }

    async fn mark_notification_read(
        &self,
        notification_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Notification>> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        Ok(inner.notifications.get_mut(&notification_id).map(|n| {
            if !n.is_read {
                n.is_read = true;
                n.read_at = Some(now);
            }
            n.clone()
        }))
    }

    async fn mark_all_notifications_read(
        &self,
        recipient_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<u64> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        let mut changed = 0;
        for n in inner
            .notifications
            .values_mut()
            .filter(|n| n.recipient_id == recipient_id && !n.is_read)
        {
            n.is_read = true;
            n.read_at = Some(now);
            changed += 1;
        }
        Ok(changed)
    }

    async fn unread_notification_count(
        &self,
        recipient_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<u64> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner
            .notifications
            .values()
            .filter(|n| n.recipient_id == recipient_id && !n.is_read && !n.is_expired(now))
            .count() as u64)
    }

    async fn purge_notifications(
        &self,
        now: DateTime<Utc>,
        read_before: DateTime<Utc>,
    ) -> AppResult<u64> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        let before = inner.notifications.len();
        inner.notifications.retain(|_, n| {
            let stale_read = n.is_read && n.read_at.map(|at| at < read_before).unwrap_or(false);
            !(n.is_expired(now) || stale_read)
        });
        Ok((before - inner.notifications.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageKind;

    fn text(conversation_id: Uuid, sender_id: Uuid, content: &str) -> NewMessage {
        NewMessage {
            conversation_id,
            sender_id,
            content: content.to_string(),
            kind: MessageKind::Text,
            attachment: None,
        }
    }

    #[tokio::test]
    async fn test_find_or_create_direct_is_idempotent() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let first = store.find_or_create_direct(a, b).await.unwrap();
        let second = store.find_or_create_direct(b, a).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.list_conversations(a).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sequence_numbers_increase_per_conversation() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let c = store.find_or_create_direct(a, b).await.unwrap();
        let m1 = store.insert_message(text(c.id, a, "one"), Utc::now()).await.unwrap();
        let m2 = store.insert_message(text(c.id, b, "two"), Utc::now()).await.unwrap();
        assert_eq!(m1.sequence_number, 1);
        assert_eq!(m2.sequence_number, 2);

        let refreshed = store.get_conversation(c.id).await.unwrap().unwrap();
        assert_eq!(refreshed.last_message_id, Some(m2.id));
    }

    #[tokio::test]
    async fn test_list_messages_returns_latest_page_in_order() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let c = store.find_or_create_direct(a, b).await.unwrap();
        for i in 0..5 {
            store
                .insert_message(text(c.id, a, &format!("m{i}")), Utc::now())
                .await
                .unwrap();
        }
        let page = store.list_messages(c.id, Some(5), 2).await.unwrap();
        let seqs: Vec<i64> = page.iter().map(|m| m.sequence_number).collect();
        assert_eq!(seqs, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_writes() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let err = store
            .find_or_create_direct(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_purge_removes_expired_and_old_read() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let recipient = Uuid::new_v4();
        let make = |expires_at, read_at: Option<DateTime<Utc>>| Notification {
            id: Uuid::new_v4(),
            recipient_id: recipient,
            sender_id: None,
            notification_type: crate::models::NotificationType::System,
            title: "t".into(),
            message: "m".into(),
            source_id: None,
            source_type: None,
            metadata: None,
            group_key: Uuid::new_v4().to_string(),
            group_count: 1,
            priority: Default::default(),
            is_read: read_at.is_some(),
            read_at,
            created_at: now,
            updated_at: now,
            expires_at,
        };
        let expired = make(Some(now - chrono::Duration::seconds(1)), None);
        let old_read = make(None, Some(now - chrono::Duration::days(40)));
        let fresh = make(None, None);
        for n in [expired, old_read, fresh.clone()] {
            store.upsert_notification(n, None).await.unwrap();
        }

        let removed = store
            .purge_notifications(now, now - chrono::Duration::days(30))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert!(store.get_notification(fresh.id).await.unwrap().is_some());
    }
}
