use crate::error::{AppError, AppResult};
use crate::models::{Conversation, ConversationSummary};
use crate::store::ChatStore;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub struct ConversationService {
    store: Arc<dyn ChatStore>,
}

impl ConversationService {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// Returns the one direct conversation between the two users, creating
    /// it on first use.
    pub async fn find_or_create_direct(
        &self,
        user_a: Uuid,
        user_b: Uuid,
    ) -> AppResult<Conversation> {
        if user_a == user_b {
            return Err(AppError::InvalidInput(
                "cannot open a conversation with yourself".into(),
            ));
        }
        self.store.find_or_create_direct(user_a, user_b).await
    }

    pub async fn create_group(&self, creator: Uuid, members: Vec<Uuid>) -> AppResult<Conversation> {
        let participants: BTreeSet<Uuid> = members.into_iter().chain([creator]).collect();
        if participants.len() < 2 {
            return Err(AppError::InvalidInput(
                "a group needs at least two participants".into(),
            ));
        }
        let conversation = self
            .store
            .create_group(participants.into_iter().collect())
            .await?;
        info!(
            conversation_id = %conversation.id,
            participants = conversation.participant_ids.len(),
            "group conversation created"
        );
        Ok(conversation)
    }

    /// Loads the conversation and checks `user_id` participates in it.
    pub async fn require_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Conversation> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if !conversation.is_participant(user_id) {
            return Err(AppError::Unauthorized);
        }
        Ok(conversation)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> AppResult<Vec<ConversationSummary>> {
        let conversations = self.store.list_conversations(user_id).await?;
        let mut summaries = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let unread_count = self.store.unread_count(conversation.id, user_id).await?;
            summaries.push(ConversationSummary {
                conversation,
                unread_count,
            });
        }
        Ok(summaries)
    }

    /// Hides the conversation from listings; history stays readable and a
    /// new direct message reactivates it.
    pub async fn deactivate(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<()> {
        self.require_participant(conversation_id, user_id).await?;
        self.store.deactivate_conversation(conversation_id).await?;
        info!(conversation_id = %conversation_id, user_id = %user_id, "conversation deactivated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn service() -> ConversationService {
        ConversationService::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_direct_with_self_is_rejected() {
        let user = Uuid::new_v4();
        let err = service().find_or_create_direct(user, user).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_require_participant() {
        let service = service();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let conversation = service.find_or_create_direct(a, b).await.unwrap();

        assert!(service.require_participant(conversation.id, b).await.is_ok());
        assert!(matches!(
            service
                .require_participant(conversation.id, Uuid::new_v4())
                .await,
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            service.require_participant(Uuid::new_v4(), a).await,
            Err(AppError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_group_includes_creator_once() {
        let service = service();
        let creator = Uuid::new_v4();
        let other = Uuid::new_v4();
        let group = service
            .create_group(creator, vec![other, creator, other])
            .await
            .unwrap();
        assert_eq!(group.participant_ids.len(), 2);
        assert!(group.is_participant(creator));

        assert!(service.create_group(creator, vec![creator]).await.is_err());
    }
}
