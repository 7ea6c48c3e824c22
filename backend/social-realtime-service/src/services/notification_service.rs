/// Notification engine
///
/// Creates, groups, expires and delivers notifications:
/// 1. Computes the group key and, for aggregate types, folds events into an
///    existing unread record created inside the grouping window
/// 2. Stamps expiry for time-limited types
/// 3. Pushes `notification:new` to the recipient's devices when online
/// 4. Tracks read state and the live unread count
use crate::config::NotificationPolicy;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{
    group_key, CreateNotificationRequest, CreateOutcome, Notification, NotificationType,
};
use crate::store::{ChatStore, NotificationQuery};
use crate::websocket::{EventHub, WsOutboundEvent};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub struct NotificationService {
    store: Arc<dyn ChatStore>,
    hub: EventHub,
    policy: NotificationPolicy,
}

impl NotificationService {
    pub fn new(store: Arc<dyn ChatStore>, hub: EventHub, policy: NotificationPolicy) -> Self {
        Self { store, hub, policy }
    }

    pub fn policy(&self) -> &NotificationPolicy {
        &self.policy
    }

    /// Create and store a notification, grouping when eligible
    pub async fn create_notification(
        &self,
        req: CreateNotificationRequest,
    ) -> AppResult<Notification> {
        let (notification, _) = self.create_notification_at(req, Utc::now()).await?;
        Ok(notification)
    }

    pub async fn create_notification_at(
        &self,
        req: CreateNotificationRequest,
        now: DateTime<Utc>,
    ) -> AppResult<(Notification, CreateOutcome)> {
        if req.title.trim().is_empty() {
            return Err(AppError::InvalidInput("title must not be empty".into()));
        }

        let key = group_key(req.notification_type, req.source_id, req.recipient_id);
        let group_since = self
            .policy
            .is_groupable(req.notification_type)
            .then(|| now - self.policy.grouping_window);
        let expires_at = self
            .policy
            .ttl_for(req.notification_type)
            .map(|ttl| now + ttl);

        let candidate = Notification {
            id: Uuid::new_v4(),
            recipient_id: req.recipient_id,
            sender_id: req.sender_id,
            notification_type: req.notification_type,
            title: req.title,
            message: req.message,
            source_id: req.source_id,
            source_type: req.source_type,
            metadata: req.metadata,
            group_key: key,
            group_count: 1,
            priority: req.priority,
            is_read: false,
            read_at: None,
            created_at: now,
            updated_at: now,
            expires_at,
        };

        let (notification, outcome) = self.store.upsert_notification(candidate, group_since).await?;

        let outcome_label = match outcome {
            CreateOutcome::Created => "created",
            CreateOutcome::Grouped => "grouped",
        };
        metrics::record_notification(outcome_label);
        info!(
            notification_id = %notification.id,
            recipient_id = %notification.recipient_id,
            notification_type = %notification.notification_type,
            group_count = notification.group_count,
            outcome = outcome_label,
            "notification stored"
        );

        if self.hub.presence().is_online(notification.recipient_id) {
            let delivered = self.hub.send_to_user(
                notification.recipient_id,
                &WsOutboundEvent::NotificationNew(notification.clone()),
            );
            debug!(notification_id = %notification.id, delivered, "notification pushed live");
        }

        Ok((notification, outcome))
    }

    /// Offline fallback for a chat message.
    pub async fn notify_message_received(
        &self,
        recipient_id: Uuid,
        sender_id: Uuid,
        conversation_id: Uuid,
        preview: &str,
    ) -> AppResult<Notification> {
        self.create_notification(CreateNotificationRequest {
            recipient_id,
            sender_id: Some(sender_id),
            notification_type: NotificationType::MessageReceived,
            title: "New message".to_string(),
            message: preview_of(preview),
            source_id: Some(conversation_id),
            source_type: Some("conversation".to_string()),
            metadata: None,
            priority: Default::default(),
        })
        .await
    }

    pub async fn get_notification(
        &self,
        notification_id: Uuid,
        recipient_id: Uuid,
    ) -> AppResult<Notification> {
        let notification = self
            .store
            .get_notification(notification_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if notification.recipient_id != recipient_id {
            return Err(AppError::Unauthorized);
        }
        Ok(notification)
    }

    pub async fn list_notifications(
        &self,
        recipient_id: Uuid,
        query: NotificationQuery,
    ) -> AppResult<Vec<Notification>> {
        self.store
            .list_notifications(recipient_id, query, Utc::now())
            .await
    }

    /// Idempotent; only the recipient may mark their notification.
    pub async fn mark_read(
        &self,
        notification_id: Uuid,
        recipient_id: Uuid,
    ) -> AppResult<Notification> {
        self.mark_read_at(notification_id, recipient_id, Utc::now())
            .await
    }

    pub async fn mark_read_at(
        &self,
        notification_id: Uuid,
        recipient_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Notification> {
        let existing = self.get_notification(notification_id, recipient_id).await?;
        if existing.is_read {
            return Ok(existing);
        }
        let updated = self
            .store
            .mark_notification_read(notification_id, now)
            .await?
            .ok_or(AppError::NotFound)?;
        self.push_unread_count(recipient_id, now).await;
        Ok(updated)
    }

    pub async fn mark_all_read(&self, recipient_id: Uuid) -> AppResult<u64> {
        let now = Utc::now();
        let changed = self
            .store
            .mark_all_notifications_read(recipient_id, now)
            .await?;
        if changed > 0 {
            self.push_unread_count(recipient_id, now).await;
        }
        info!(recipient_id = %recipient_id, changed, "notifications marked read");
        Ok(changed)
    }

    pub async fn get_unread_count(&self, recipient_id: Uuid) -> AppResult<u64> {
        self.store
            .unread_notification_count(recipient_id, Utc::now())
            .await
    }

    /// Removes expired notifications and read ones past retention.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let read_before = now - self.policy.read_retention;
        let removed = self.store.purge_notifications(now, read_before).await?;
        if removed > 0 {
            info!(removed, "notifications purged");
        }
        Ok(removed)
    }

    /// Keeps badges in sync across the recipient's devices.
    async fn push_unread_count(&self, recipient_id: Uuid, now: DateTime<Utc>) {
        if !self.hub.presence().is_online(recipient_id) {
            return;
        }
        match self.store.unread_notification_count(recipient_id, now).await {
            Ok(unread_count) => {
                self.hub.send_to_user(
                    recipient_id,
                    &WsOutboundEvent::NotificationUnreadCount { unread_count },
                );
            }
            Err(err) => debug!(error = %err, "unread count refresh skipped"),
        }
    }
}

const PREVIEW_CHARS: usize = 100;

fn preview_of(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() <= PREVIEW_CHARS {
        return trimmed.to_string();
    }
    let mut preview: String = trimmed.chars().take(PREVIEW_CHARS).collect();
    preview.push('…');
    preview
}
