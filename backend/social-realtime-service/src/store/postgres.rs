//! PostgreSQL-backed [`ChatStore`] (tokio-postgres + deadpool).
//!
//! Sequence numbers come from `conversation_counters` in the same statement
//! as the insert; grouped notification upserts serialize on a transaction
//! scoped advisory lock keyed by the group key.

use super::{ChatStore, NotificationQuery};
use crate::error::{AppError, AppResult};
use crate::models::{
    direct_pair, Attachment, Conversation, ConversationKind, CreateOutcome, Message, MessageKind,
    NewMessage, Notification, NotificationPriority, NotificationType, ReadReceipt,
    DELETED_MESSAGE_TOMBSTONE,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, Pool, PoolConfig, Runtime};
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../migrations/0001_realtime_core.sql");

const CONVERSATION_COLUMNS: &str =
    "id, kind, participant_ids, last_message_id, last_activity_at, is_active, created_at";

const MESSAGE_SELECT: &str = r#"
    SELECT m.id, m.conversation_id, m.sender_id, m.content, m.kind, m.attachment,
           m.sequence_number, m.created_at, m.is_edited, m.original_content, m.edited_at,
           m.is_deleted, m.deleted_at,
           COALESCE(
               (SELECT json_agg(json_build_object('user_id', r.user_id, 'read_at', r.read_at)
                                ORDER BY r.read_at)
                  FROM message_reads r
                 WHERE r.message_id = m.id),
               '[]'::json
           ) AS read_by
      FROM messages m
"#;

const NOTIFICATION_COLUMNS: &str = "id, recipient_id, sender_id, notification_type, title, message, \
     source_id, source_type, metadata, group_key, group_count, priority, is_read, read_at, \
     created_at, updated_at, expires_at";

#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Builds the pool and applies the schema.
    pub async fn connect(database_url: &str, max_connections: usize) -> AppResult<Self> {
        let mut cfg = Config::new();
        cfg.url = Some(database_url.to_string());
        cfg.pool = Some(PoolConfig::new(max_connections));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| AppError::StartServer(format!("create pool: {e}")))?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> AppResult<()> {
        let client = self.pool.get().await?;
        client.batch_execute(SCHEMA).await?;
        tracing::info!("realtime schema applied");
        Ok(())
    }

    fn conversation_from_row(row: &Row) -> Conversation {
        let kind: String = row.get("kind");
        Conversation {
            id: row.get("id"),
            kind: ConversationKind::from_db(&kind),
            participant_ids: row.get("participant_ids"),
            last_message_id: row.get("last_message_id"),
            last_activity_at: row.get("last_activity_at"),
            is_active: row.get("is_active"),
            created_at: row.get("created_at"),
        }
    }

    fn message_from_row(row: &Row) -> AppResult<Message> {
        let kind: String = row.get("kind");
        let attachment: Option<serde_json::Value> = row.get("attachment");
        let attachment = attachment
            .map(serde_json::from_value::<Attachment>)
            .transpose()
            .map_err(|e| AppError::Persistence(format!("decode attachment: {e}")))?;
        let read_by: serde_json::Value = row.get("read_by");
        let read_by: Vec<ReadReceipt> = serde_json::from_value(read_by)
            .map_err(|e| AppError::Persistence(format!("decode read receipts: {e}")))?;

        Ok(Message {
            id: row.get("id"),
            conversation_id: row.get("conversation_id"),
            sender_id: row.get("sender_id"),
            content: row.get("content"),
            kind: MessageKind::from_db(&kind),
            attachment,
            sequence_number: row.get("sequence_number"),
            created_at: row.get("created_at"),
            read_by,
            is_edited: row.get("is_edited"),
            original_content: row.get("original_content"),
            edited_at: row.get("edited_at"),
            is_deleted: row.get("is_deleted"),
            deleted_at: row.get("deleted_at"),
        })
    }

    fn notification_from_row(row: &Row) -> AppResult<Notification> {
        let type_str: String = row.get("notification_type");
        let notification_type = type_str
            .parse::<NotificationType>()
            .map_err(AppError::Persistence)?;
        let priority: String = row.get("priority");
        let group_count: i32 = row.get("group_count");

        Ok(Notification {
            id: row.get("id"),
            recipient_id: row.get("recipient_id"),
            sender_id: row.get("sender_id"),
            notification_type,
            title: row.get("title"),
            message: row.get("message"),
            source_id: row.get("source_id"),
            source_type: row.get("source_type"),
            metadata: row.get("metadata"),
            group_key: row.get("group_key"),
            group_count: group_count.max(0) as u32,
            priority: NotificationPriority::from_db(&priority),
            is_read: row.get("is_read"),
            read_at: row.get("read_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            expires_at: row.get("expires_at"),
        })
    }

    async fn fetch_message(&self, message_id: Uuid) -> AppResult<Option<Message>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(&format!("{MESSAGE_SELECT} WHERE m.id = $1"), &[&message_id])
            .await?;
        row.as_ref().map(Self::message_from_row).transpose()
    }
}

#[async_trait]
impl ChatStore for PgStore {
    async fn find_or_create_direct(&self, a: Uuid, b: Uuid) -> AppResult<Conversation> {
        let (low, high) = direct_pair(a, b);
        let direct_key = format!("{low}:{high}");
        let participants = vec![low, high];
        let client = self.pool.get().await?;

        let row = client
            .query_one(
                &format!(
                    r#"
                    INSERT INTO conversations (id, kind, participant_ids, direct_key)
                    VALUES ($1, 'direct', $2, $3)
                    ON CONFLICT (direct_key) DO UPDATE SET is_active = TRUE
                    RETURNING {CONVERSATION_COLUMNS}
                    "#
                ),
                &[&Uuid::new_v4(), &participants, &direct_key],
            )
            .await?;

        Ok(Self::conversation_from_row(&row))
    }

    async fn create_group(&self, mut participant_ids: Vec<Uuid>) -> AppResult<Conversation> {
        participant_ids.sort();
        participant_ids.dedup();
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                &format!(
                    "INSERT INTO conversations (id, kind, participant_ids) VALUES ($1, 'group', $2) \
                     RETURNING {CONVERSATION_COLUMNS}"
                ),
                &[&Uuid::new_v4(), &participant_ids],
            )
            .await?;
        Ok(Self::conversation_from_row(&row))
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> AppResult<Option<Conversation>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"),
                &[&conversation_id],
            )
            .await?;
        Ok(row.as_ref().map(Self::conversation_from_row))
    }

    async fn list_conversations(&self, user_id: Uuid) -> AppResult<Vec<Conversation>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations \
                     WHERE is_active AND $1 = ANY(participant_ids) \
                     ORDER BY last_activity_at DESC"
                ),
                &[&user_id],
            )
            .await?;
        Ok(rows.iter().map(Self::conversation_from_row).collect())
    }

    async fn deactivate_conversation(&self, conversation_id: Uuid) -> AppResult<()> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE conversations SET is_active = FALSE WHERE id = $1",
                &[&conversation_id],
            )
            .await?;
        if updated == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn insert_message(&self, new: NewMessage, now: DateTime<Utc>) -> AppResult<Message> {
        let id = Uuid::new_v4();
        let attachment = new
            .attachment
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| AppError::InvalidInput(format!("attachment: {e}")))?;

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(
                r#"
                WITH next AS (
                    INSERT INTO conversation_counters (conversation_id, last_seq)
                    VALUES ($2, 1)
                    ON CONFLICT (conversation_id)
                    DO UPDATE SET last_seq = conversation_counters.last_seq + 1
                    RETURNING last_seq
                )
                INSERT INTO messages (
                    id, conversation_id, sender_id, content, kind, attachment,
                    sequence_number, created_at
                )
                SELECT $1, $2, $3, $4, $5, $6, next.last_seq, $7
                  FROM next
                 WHERE EXISTS (SELECT 1 FROM conversations WHERE id = $2)
                RETURNING sequence_number
                "#,
                &[
                    &id,
                    &new.conversation_id,
                    &new.sender_id,
                    &new.content,
                    &new.kind.as_str(),
                    &attachment,
                    &now,
                ],
            )
            .await?
            .ok_or(AppError::NotFound)?;
        let sequence_number: i64 = row.get(0);

        tx.execute(
            "UPDATE conversations SET last_message_id = $1, last_activity_at = $2, is_active = TRUE \
             WHERE id = $3",
            &[&id, &now, &new.conversation_id],
        )
        .await?;
        tx.commit().await?;

        Ok(Message {
            id,
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
        })
    }

    async fn get_message(&self, message_id: Uuid) -> AppResult<Option<Message>> {
        self.fetch_message(message_id).await
    }

    async fn edit_message(
        &self,
        message_id: Uuid,
        content: String,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Message>> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                r#"
                UPDATE messages
                   SET original_content = COALESCE(original_content, content),
                       content = $2,
                       is_edited = TRUE,
                       edited_at = $3
                 WHERE id = $1
                "#,
                &[&message_id, &content, &now],
            )
            .await?;
        if updated == 0 {
            return Ok(None);
        }
        drop(client);
        self.fetch_message(message_id).await
    }

    async fn soft_delete_message(
        &self,
        message_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Message>> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                UPDATE messages
                   SET content = $2, original_content = NULL, attachment = NULL,
                       is_deleted = TRUE, deleted_at = $3
                 WHERE id = $1 AND NOT is_deleted
                "#,
                &[&message_id, &DELETED_MESSAGE_TOMBSTONE, &now],
            )
            .await?;
        drop(client);
        self.fetch_message(message_id).await
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        before: Option<i64>,
        limit: usize,
    ) -> AppResult<Vec<Message>> {
        let client = self.pool.get().await?;
        let limit = limit as i64;
        let rows = client
            .query(
                &format!(
                    "SELECT * FROM ({MESSAGE_SELECT} \
                       WHERE m.conversation_id = $1 AND ($2::BIGINT IS NULL OR m.sequence_number < $2) \
                       ORDER BY m.sequence_number DESC LIMIT $3) page \
                     ORDER BY sequence_number ASC"
                ),
                &[&conversation_id, &before, &limit],
            )
            .await?;
        rows.iter().map(Self::message_from_row).collect()
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Uuid>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                INSERT INTO message_reads (message_id, user_id, read_at)
                SELECT m.id, $2, $3
                  FROM messages m
                 WHERE m.conversation_id = $1 AND m.sender_id <> $2
                ON CONFLICT (message_id, user_id) DO NOTHING
                RETURNING message_id
                "#,
                &[&conversation_id, &user_id, &now],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn unread_count(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<u64> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                r#"
                SELECT COUNT(*)
                  FROM messages m
                 WHERE m.conversation_id = $1
                   AND m.sender_id <> $2
                   AND NOT EXISTS (
                       SELECT 1 FROM message_reads r
                        WHERE r.message_id = m.id AND r.user_id = $2
                   )
                "#,
                &[&conversation_id, &user_id],
            )
            .await?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u64)
    }

    async fn upsert_notification(
        &self,
        candidate: Notification,
        group_since: Option<DateTime<Utc>>,
    ) -> AppResult<(Notification, CreateOutcome)> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        if let Some(since) = group_since {
            tx.execute(
                "SELECT pg_advisory_xact_lock(hashtext($1))",
                &[&candidate.group_key],
            )
            .await?;

            let updated = tx
                .query_opt(
                    &format!(
                        r#"
                        UPDATE notifications
                           SET title = $2, message = $3, sender_id = $4, metadata = $5,
                               group_count = group_count + 1, updated_at = $6,
                               priority = CASE WHEN $7 = 'high' OR priority = 'high' THEN 'high'
                                               WHEN $7 = 'normal' OR priority = 'normal' THEN 'normal'
                                               ELSE 'low' END
                         WHERE id = (
                               SELECT id FROM notifications
                                WHERE group_key = $1 AND NOT is_read AND created_at >= $8
                                ORDER BY created_at DESC
                                LIMIT 1
                                FOR UPDATE)
                        RETURNING {NOTIFICATION_COLUMNS}
                        "#
                    ),
                    &[
                        &candidate.group_key,
                        &candidate.title,
                        &candidate.message,
                        &candidate.sender_id,
                        &candidate.metadata,
                        &candidate.updated_at,
                        &candidate.priority.as_str(),
                        &since,
                    ],
                )
                .await?;

            if let Some(row) = updated {
                let notification = Self::notification_from_row(&row)?;
                tx.commit().await?;
                return Ok((notification, CreateOutcome::Grouped));
            }
        }

        let group_count = candidate.group_count as i32;
        tx.execute(
            &format!(
                "INSERT INTO notifications ({NOTIFICATION_COLUMNS}) VALUES \
                 ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
            ),
            &[
                &candidate.id,
                &candidate.recipient_id,
                &candidate.sender_id,
                &candidate.notification_type.as_str(),
                &candidate.title,
                &candidate.message,
                &candidate.source_id,
                &candidate.source_type,
                &candidate.metadata,
                &candidate.group_key,
                &group_count,
                &candidate.priority.as_str(),
                &candidate.is_read,
                &candidate.read_at,
                &candidate.created_at,
                &candidate.updated_at,
                &candidate.expires_at,
            ],
        )
        .await?;
        tx.commit().await?;

        Ok((candidate, CreateOutcome::Created))
    }

    async fn get_notification(&self, notification_id: Uuid) -> AppResult<Option<Notification>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = $1"),
                &[&notification_id],
            )
            .await?;
        row.as_ref().map(Self::notification_from_row).transpose()
    }

    async fn list_notifications(
        &self,
        recipient_id: Uuid,
        query: NotificationQuery,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Notification>> {
        let client = self.pool.get().await?;
        let limit = query.limit as i64;
        let rows = client
            .query(
                &format!(
                    "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
                     WHERE recipient_id = $1 \
                       AND (expires_at IS NULL OR expires_at > $2) \
                       AND (NOT $3 OR NOT is_read) \
                     ORDER BY updated_at DESC LIMIT $4"
                ),
                &[&recipient_id, &now, &query.unread_only, &limit],
            )
            .await?;
        rows.iter().map(Self::notification_from_row).collect()
    }

    async fn mark_notification_read(
        &self,
        notification_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Notification>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "UPDATE notifications \
                        SET is_read = TRUE, read_at = COALESCE(read_at, $2) \
                      WHERE id = $1 \
                  RETURNING {NOTIFICATION_COLUMNS}"
                ),
                &[&notification_id, &now],
            )
            .await?;
        row.as_ref().map(Self::notification_from_row).transpose()
    }

    async fn mark_all_notifications_read(
        &self,
        recipient_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<u64> {
        let client = self.pool.get().await?;
        let changed = client
            .execute(
                "UPDATE notifications SET is_read = TRUE, read_at = $2 \
                 WHERE recipient_id = $1 AND NOT is_read",
                &[&recipient_id, &now],
            )
            .await?;
        Ok(changed)
    }

    async fn unread_notification_count(
        &self,
        recipient_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<u64> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM notifications \
                 WHERE recipient_id = $1 AND NOT is_read \
                   AND (expires_at IS NULL OR expires_at > $2)",
                &[&recipient_id, &now],
            )
            .await?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u64)
    }

    async fn purge_notifications(
        &self,
        now: DateTime<Utc>,
        read_before: DateTime<Utc>,
    ) -> AppResult<u64> {
        let client = self.pool.get().await?;
        let removed = client
            .execute(
                "DELETE FROM notifications \
                 WHERE (expires_at IS NOT NULL AND expires_at <= $1) \
                    OR (is_read AND read_at < $2)",
                &[&now, &read_before],
            )
            .await?;
        Ok(removed)
    }
}
