//! # Persistence collaborator
//!
//! Every durable mutation of conversations, messages and notifications goes
//! through [`ChatStore`]. Implementations must make each method atomic with
//! respect to concurrent callers: find-or-create, receipt append and the
//! grouped notification upsert are all single logical operations.

use crate::error::AppResult;
use crate::models::{Conversation, CreateOutcome, Message, NewMessage, Notification};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Filter for notification listings.
#[derive(Debug, Clone, Copy)]
pub struct NotificationQuery {
    pub unread_only: bool,
    pub limit: usize,
}

impl Default for NotificationQuery {
    fn default() -> Self {
        Self {
            unread_only: false,
            limit: 50,
        }
    }
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    // ---- conversations ----

    /// Returns the single direct conversation for the unordered pair, creating
    /// it if it does not exist. Reactivates a deactivated one.
    async fn find_or_create_direct(&self, a: Uuid, b: Uuid) -> AppResult<Conversation>;

    async fn create_group(&self, participant_ids: Vec<Uuid>) -> AppResult<Conversation>;

    async fn get_conversation(&self, conversation_id: Uuid) -> AppResult<Option<Conversation>>;

    /// Active conversations the user participates in, most recent activity first.
    async fn list_conversations(&self, user_id: Uuid) -> AppResult<Vec<Conversation>>;

    async fn deactivate_conversation(&self, conversation_id: Uuid) -> AppResult<()>;

    // ---- messages ----

    /// Persists a message, assigning the next per-conversation sequence
    /// number and bumping the conversation's last activity.
    async fn insert_message(&self, new: NewMessage, now: DateTime<Utc>) -> AppResult<Message>;

    async fn get_message(&self, message_id: Uuid) -> AppResult<Option<Message>>;

    async fn edit_message(
        &self,
        message_id: Uuid,
        content: String,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Message>>;

    async fn soft_delete_message(
        &self,
        message_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Message>>;

    /// Messages ordered by sequence number ascending. `before` is exclusive.
    async fn list_messages(
        &self,
        conversation_id: Uuid,
        before: Option<i64>,
        limit: usize,
    ) -> AppResult<Vec<Message>>;

    /// Appends a receipt for `user_id` to every message sent by someone else
    /// that has none yet. Returns the ids that received a new receipt.
    async fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Uuid>>;

    async fn unread_count(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<u64>;

    // ---- notifications ----

    /// Inserts `candidate`, unless `group_since` is set and an unread
    /// notification with the same group key was created at or after it; in
    /// that case the existing record is updated in place and returned.
    async fn upsert_notification(
        &self,
        candidate: Notification,
        group_since: Option<DateTime<Utc>>,
    ) -> AppResult<(Notification, CreateOutcome)>;

    async fn get_notification(&self, notification_id: Uuid) -> AppResult<Option<Notification>>;

    /// Newest first. Expired notifications are excluded.
    async fn list_notifications(
        &self,
        recipient_id: Uuid,
        query: NotificationQuery,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Notification>>;

    /// Idempotent: an already-read notification keeps its original `read_at`.
    async fn mark_notification_read(
        &self,
        notification_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Notification>>;

    /// Returns how many notifications changed state.
    async fn mark_all_notifications_read(
        &self,
        recipient_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<u64>;

    /// Live count of unread, unexpired notifications.
    async fn unread_notification_count(
        &self,
        recipient_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<u64>;

    /// Deletes expired notifications and read ones whose `read_at` is older
    /// than `read_before`. Returns the number removed.
    async fn purge_notifications(
        &self,
        now: DateTime<Utc>,
        read_before: DateTime<Utc>,
    ) -> AppResult<u64>;
}
