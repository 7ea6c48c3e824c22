//! Room router: connection membership in user and conversation channels.
//!
//! Conversation membership is authorized against the store on every join so
//! a participant change takes effect on the next attempt. Channel entries are
//! dropped once their last member leaves.

use super::ConnectionId;
use crate::error::{AppError, AppResult};
use crate::models::Conversation;
use crate::store::ChatStore;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelId {
    /// Private channel of one user, across all of their devices.
    User(Uuid),
    Conversation(Uuid),
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::User(id) => write!(f, "user:{id}"),
            ChannelId::Conversation(id) => write!(f, "conversation:{id}"),
        }
    }
}

pub struct RoomRouter {
    store: Arc<dyn ChatStore>,
    channels: DashMap<ChannelId, HashSet<ConnectionId>>,
    memberships: DashMap<ConnectionId, HashSet<ChannelId>>,
}

impl RoomRouter {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self {
            store,
            channels: DashMap::new(),
            memberships: DashMap::new(),
        }
    }

    pub fn join_user_channel(&self, connection_id: ConnectionId, user_id: Uuid) {
        self.add(connection_id, ChannelId::User(user_id));
    }

    /// Joins the conversation channel if `user_id` currently participates.
    /// Joining twice is harmless.
    pub async fn join_conversation(
        &self,
        connection_id: ConnectionId,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<Conversation> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .filter(|c| c.is_participant(user_id))
            .ok_or(AppError::Unauthorized)?;

        self.add(connection_id, ChannelId::Conversation(conversation_id));
        Ok(conversation)
    }

    /// Idempotent.
    pub fn leave_conversation(&self, connection_id: ConnectionId, conversation_id: Uuid) {
        self.remove(connection_id, ChannelId::Conversation(conversation_id));
    }

    /// Drops every membership of the connection.
    pub fn leave_all(&self, connection_id: ConnectionId) {
        let Some((_, channels)) = self.memberships.remove(&connection_id) else {
            return;
        };
        for channel in channels {
            self.remove_from_channel(connection_id, channel);
        }
    }

    pub fn members(&self, channel: ChannelId) -> Vec<ConnectionId> {
        self.channels
            .get(&channel)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, connection_id: ConnectionId, channel: ChannelId) -> bool {
        self.channels
            .get(&channel)
            .map(|set| set.contains(&connection_id))
            .unwrap_or(false)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn add(&self, connection_id: ConnectionId, channel: ChannelId) {
        self.channels.entry(channel).or_default().insert(connection_id);
        self.memberships
            .entry(connection_id)
            .or_default()
            .insert(channel);
        debug!(connection_id = %connection_id, channel = %channel, "joined channel");
    }

    fn remove(&self, connection_id: ConnectionId, channel: ChannelId) {
        if let Entry::Occupied(mut entry) = self.memberships.entry(connection_id) {
            entry.get_mut().remove(&channel);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
        self.remove_from_channel(connection_id, channel);
    }

    fn remove_from_channel(&self, connection_id: ConnectionId, channel: ChannelId) {
        if let Entry::Occupied(mut entry) = self.channels.entry(channel) {
            if entry.get_mut().remove(&connection_id) {
                debug!(connection_id = %connection_id, channel = %channel, "left channel");
            }
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_join_requires_participation() {
        let store = Arc::new(MemoryStore::new());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let outsider = Uuid::new_v4();
        let conversation = store.find_or_create_direct(a, b).await.unwrap();
        let router = RoomRouter::new(store);

        let c1 = ConnectionId::new();
        router.join_conversation(c1, a, conversation.id).await.unwrap();
        assert!(router.is_member(c1, ChannelId::Conversation(conversation.id)));

        let c2 = ConnectionId::new();
        let err = router
            .join_conversation(c2, outsider, conversation.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
        assert!(!router.is_member(c2, ChannelId::Conversation(conversation.id)));

        let err = router
            .join_conversation(c2, a, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[tokio::test]
    async fn test_leave_is_idempotent_and_cleans_up() {
        let store = Arc::new(MemoryStore::new());
        let a = Uuid::new_v4();
        let conversation = store
            .find_or_create_direct(a, Uuid::new_v4())
            .await
            .unwrap();
        let router = RoomRouter::new(store);
        let connection = ConnectionId::new();

        router.join_user_channel(connection, a);
        router
            .join_conversation(connection, a, conversation.id)
            .await
            .unwrap();
        assert_eq!(router.channel_count(), 2);

        router.leave_conversation(connection, conversation.id);
        router.leave_conversation(connection, conversation.id);
        assert!(router
            .members(ChannelId::Conversation(conversation.id))
            .is_empty());
        assert_eq!(router.channel_count(), 1);

        router.leave_all(connection);
        router.leave_all(connection);
        assert_eq!(router.channel_count(), 0);
    }
}
