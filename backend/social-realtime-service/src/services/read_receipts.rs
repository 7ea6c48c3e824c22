//! Read/unread reconciliation.
//!
//! Receipts are durable and append-only per (message, user). Unread counts
//! are cached per (conversation, user); a new message or a mark-read drops
//! the conversation's entries, and a count computed across such an
//! invalidation is never stored.

use crate::error::AppResult;
use crate::models::Message;
use crate::store::ChatStore;
use crate::websocket::{EventHub, WsOutboundEvent};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Upper bound on cached counts; the cache is cleared when it is reached.
const MAX_CACHED_COUNTS: usize = 10_000;

#[derive(Debug, Clone)]
pub struct MarkReadResult {
    /// Messages that received a receipt in this call.
    pub message_ids: Vec<Uuid>,
    pub read_at: DateTime<Utc>,
}

pub struct ReadReceiptService {
    store: Arc<dyn ChatStore>,
    hub: EventHub,
    /// Bumped on every invalidation.
    epoch: AtomicU64,
    unread_cache: DashMap<(Uuid, Uuid), u64>,
}

impl ReadReceiptService {
    pub fn new(store: Arc<dyn ChatStore>, hub: EventHub) -> Self {
        Self {
            store,
            hub,
            epoch: AtomicU64::new(0),
            unread_cache: DashMap::new(),
        }
    }

    fn invalidate(&self, conversation_id: Uuid) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.unread_cache
            .retain(|(cached_conversation, _), _| *cached_conversation != conversation_id);
    }

    pub fn cached_count_len(&self) -> usize {
        self.unread_cache.len()
    }

    /// Marks everything in the conversation not sent by `user_id` as read by
    /// them. Idempotent: a second call appends nothing and emits nothing.
    /// Participants' live connections get one `chat:messages_read`.
    pub async fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        participants: &[Uuid],
    ) -> AppResult<MarkReadResult> {
        self.mark_conversation_read_at(conversation_id, user_id, participants, Utc::now())
            .await
    }

    pub async fn mark_conversation_read_at(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        participants: &[Uuid],
        now: DateTime<Utc>,
    ) -> AppResult<MarkReadResult> {
        let message_ids = self
            .store
            .mark_conversation_read(conversation_id, user_id, now)
            .await?;

        if !message_ids.is_empty() {
            self.invalidate(conversation_id);
            let event = WsOutboundEvent::MessagesRead {
                conversation_id,
                user_id,
                message_ids: message_ids.clone(),
                read_at: now,
            };
            let delivered = self
                .hub
                .send_to_users(participants.iter().copied(), &event);
            debug!(
                conversation_id = %conversation_id,
                user_id = %user_id,
                marked = message_ids.len(),
                delivered,
                "conversation marked read"
            );
        }

        Ok(MarkReadResult {
            message_ids,
            read_at: now,
        })
    }

    /// Count of messages not sent by and not yet read by `user_id`.
    pub async fn unread_count_for(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<u64> {
        let key = (conversation_id, user_id);
        if let Some(count) = self.unread_cache.get(&key) {
            return Ok(*count);
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let count = self.store.unread_count(conversation_id, user_id).await?;
        if self.unread_cache.len() >= MAX_CACHED_COUNTS {
            self.unread_cache.clear();
        }
        // The epoch is checked under the entry's shard lock, so an
        // invalidation either is seen here or removes this entry after.
        if let Entry::Vacant(slot) = self.unread_cache.entry(key) {
            if self.epoch.load(Ordering::SeqCst) == epoch {
                slot.insert(count);
            }
        }
        Ok(count)
    }

    /// Called once a new message is durable.
    pub fn on_message_created(&self, message: &Message) {
        self.invalidate(message.conversation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageKind, NewMessage};
    use crate::store::MemoryStore;
    use crate::websocket::{ConnectionId, PresenceRegistry, RoomRouter};
    use tokio::sync::mpsc;

    async fn send(store: &MemoryStore, conversation_id: Uuid, sender_id: Uuid) -> Message {
        store
            .insert_message(
                NewMessage {
                    conversation_id,
                    sender_id,
                    content: "hello".into(),
                    kind: MessageKind::Text,
                    attachment: None,
                },
                Utc::now(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_unread_cache_is_invalidated() {
        let store = MemoryStore::new();
        let shared: Arc<dyn ChatStore> = Arc::new(store.clone());
        let presence = Arc::new(PresenceRegistry::new());
        let rooms = Arc::new(RoomRouter::new(shared.clone()));
        let service = ReadReceiptService::new(shared, EventHub::new(presence, rooms));

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let conversation = store.find_or_create_direct(a, b).await.unwrap();

        assert_eq!(service.unread_count_for(conversation.id, b).await.unwrap(), 0);
        let message = send(&store, conversation.id, a).await;
        service.on_message_created(&message);
        assert_eq!(service.unread_count_for(conversation.id, b).await.unwrap(), 1);
        assert_eq!(service.unread_count_for(conversation.id, a).await.unwrap(), 0);

        let result = service
            .mark_conversation_read(conversation.id, b, &conversation.participant_ids)
            .await
            .unwrap();
        assert_eq!(result.message_ids, vec![message.id]);
        assert_eq!(service.unread_count_for(conversation.id, b).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent_and_emits_once() {
        let store = MemoryStore::new();
        let shared: Arc<dyn ChatStore> = Arc::new(store.clone());
        let presence = Arc::new(PresenceRegistry::new());
        let rooms = Arc::new(RoomRouter::new(shared.clone()));
        let service = ReadReceiptService::new(shared, EventHub::new(presence.clone(), rooms));

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let conversation = store.find_or_create_direct(a, b).await.unwrap();
        send(&store, conversation.id, a).await;
        send(&store, conversation.id, a).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        presence.register(a, ConnectionId::new(), tx);

        let first = service
            .mark_conversation_read(conversation.id, b, &conversation.participant_ids)
            .await
            .unwrap();
        assert_eq!(first.message_ids.len(), 2);
        let second = service
            .mark_conversation_read(conversation.id, b, &conversation.participant_ids)
            .await
            .unwrap();
        assert!(second.message_ids.is_empty());

        assert!(matches!(
            rx.try_recv(),
            Ok(WsOutboundEvent::MessagesRead { user_id, .. }) if user_id == b
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalidation_drops_cached_counts() {
        let store = MemoryStore::new();
        let shared: Arc<dyn ChatStore> = Arc::new(store.clone());
        let presence = Arc::new(PresenceRegistry::new());
        let rooms = Arc::new(RoomRouter::new(shared.clone()));
        let service = ReadReceiptService::new(shared, EventHub::new(presence, rooms));

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let busy = store.find_or_create_direct(a, b).await.unwrap();
        let quiet = store.find_or_create_direct(a, Uuid::new_v4()).await.unwrap();

        service.unread_count_for(busy.id, a).await.unwrap();
        service.unread_count_for(busy.id, b).await.unwrap();
        service.unread_count_for(quiet.id, a).await.unwrap();
        assert_eq!(service.cached_count_len(), 3);

        let message = send(&store, busy.id, a).await;
        service.on_message_created(&message);
        assert_eq!(service.cached_count_len(), 1);
        assert_eq!(service.unread_count_for(busy.id, b).await.unwrap(), 1);
    }
}
