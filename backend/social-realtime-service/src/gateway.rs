//! Socket gateway: connection lifecycle plus dispatch of typed client
//! commands to the owning component.

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::services::{
    ConversationService, MessageService, NotificationService, ReadReceiptService, SendMessage,
};
use crate::websocket::{
    ChannelId, ClientCommand, ConnectionId, EventHub, EventSender, PresenceTransition,
    WsOutboundEvent,
};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub struct Gateway {
    hub: EventHub,
    conversations: Arc<ConversationService>,
    messages: Arc<MessageService>,
    notifications: Arc<NotificationService>,
    read_receipts: Arc<ReadReceiptService>,
}

impl Gateway {
    pub fn new(
        hub: EventHub,
        conversations: Arc<ConversationService>,
        messages: Arc<MessageService>,
        notifications: Arc<NotificationService>,
        read_receipts: Arc<ReadReceiptService>,
    ) -> Self {
        Self {
            hub,
            conversations,
            messages,
            notifications,
            read_receipts,
        }
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn conversations(&self) -> &Arc<ConversationService> {
        &self.conversations
    }

    pub fn messages(&self) -> &Arc<MessageService> {
        &self.messages
    }

    pub fn notifications(&self) -> &Arc<NotificationService> {
        &self.notifications
    }

    pub fn read_receipts(&self) -> &Arc<ReadReceiptService> {
        &self.read_receipts
    }

    /// Registers an authenticated connection and joins its user channel.
    /// Other clients see `user:online` when this is the user's first device.
    pub fn connect(&self, user_id: Uuid, sender: EventSender) -> ConnectionId {
        let connection_id = ConnectionId::new();
        let presence = self.hub.presence();

        let transition = presence.register(user_id, connection_id, sender);
        self.hub.rooms().join_user_channel(connection_id, user_id);
        metrics::set_presence(presence.online_user_count(), presence.connection_count());

        self.hub.send_to_connection(
            connection_id,
            WsOutboundEvent::Connected {
                connection_id: connection_id.as_uuid(),
                user_id,
            },
        );
        if transition == PresenceTransition::CameOnline {
            self.hub
                .broadcast(&WsOutboundEvent::UserOnline { user_id }, Some(connection_id));
        }

        info!(user_id = %user_id, connection_id = %connection_id, "client connected");
        connection_id
    }

    /// Cleanup for a closed transport. Safe to call more than once.
    ///
    /// Presence goes first: a join that lands after `leave_all` sees the
    /// connection unregistered and undoes its own membership.
    pub fn disconnect(&self, connection_id: ConnectionId) {
        let presence = self.hub.presence();
        let unregistered = presence.unregister(connection_id);
        self.hub.rooms().leave_all(connection_id);
        let Some((user_id, went_offline)) = unregistered else {
            return;
        };
        metrics::set_presence(presence.online_user_count(), presence.connection_count());

        if went_offline {
            self.hub
                .broadcast(&WsOutboundEvent::UserOffline { user_id }, None);
        }
        info!(
            user_id = %user_id,
            connection_id = %connection_id,
            went_offline,
            "client disconnected"
        );
    }

    /// Joins the conversation channel and marks its messages read, since
    /// joining a conversation view counts as viewing it.
    pub async fn join_conversation(
        &self,
        connection_id: ConnectionId,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<WsOutboundEvent> {
        let conversation = self
            .hub
            .rooms()
            .join_conversation(connection_id, user_id, conversation_id)
            .await?;
        if self.hub.presence().user_of(connection_id).is_none() {
            self.hub
                .rooms()
                .leave_conversation(connection_id, conversation_id);
            return Err(AppError::NotFound);
        }
        if let Err(err) = self
            .read_receipts
            .mark_conversation_read(conversation_id, user_id, &conversation.participant_ids)
            .await
        {
            self.hub
                .rooms()
                .leave_conversation(connection_id, conversation_id);
            return Err(err);
        }
        let unread_count = self
            .read_receipts
            .unread_count_for(conversation_id, user_id)
            .await?;
        Ok(WsOutboundEvent::Joined {
            conversation_id,
            unread_count,
        })
    }

    pub async fn mark_conversation_read(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<Vec<Uuid>> {
        let conversation = self
            .conversations
            .require_participant(conversation_id, user_id)
            .await?;
        let result = self
            .read_receipts
            .mark_conversation_read(conversation_id, user_id, &conversation.participant_ids)
            .await?;
        Ok(result.message_ids)
    }

    /// Only connections joined to the conversation may signal typing; the
    /// signal goes to the other members.
    pub fn typing(
        &self,
        connection_id: ConnectionId,
        user_id: Uuid,
        conversation_id: Uuid,
        is_typing: bool,
    ) -> AppResult<()> {
        let channel = ChannelId::Conversation(conversation_id);
        if !self.hub.rooms().is_member(connection_id, channel) {
            return Err(AppError::Unauthorized);
        }
        self.hub.publish(
            channel,
            &WsOutboundEvent::UserTyping {
                conversation_id,
                user_id,
                is_typing,
            },
            Some(connection_id),
        );
        Ok(())
    }

    /// Runs one client command. The returned event, if any, is the reply
    /// for the issuing connection only.
    pub async fn dispatch(
        &self,
        connection_id: ConnectionId,
        user_id: Uuid,
        command: ClientCommand,
    ) -> AppResult<Option<WsOutboundEvent>> {
        match command {
            ClientCommand::JoinConversation { conversation_id } => self
                .join_conversation(connection_id, user_id, conversation_id)
                .await
                .map(Some),

            ClientCommand::LeaveConversation { conversation_id } => {
                self.hub
                    .rooms()
                    .leave_conversation(connection_id, conversation_id);
                Ok(Some(WsOutboundEvent::Left { conversation_id }))
            }

            ClientCommand::SendMessage {
                conversation_id,
                content,
                kind,
                attachment,
                client_ref,
            } => {
                let message = self
                    .messages
                    .send_message(SendMessage {
                        conversation_id,
                        sender_id: user_id,
                        content,
                        kind,
                        attachment,
                    })
                    .await?;
                Ok(Some(WsOutboundEvent::MessageSent {
                    client_ref,
                    message_id: message.id,
                    sequence_number: message.sequence_number,
                }))
            }

            ClientCommand::Typing {
                conversation_id,
                is_typing,
            } => {
                self.typing(connection_id, user_id, conversation_id, is_typing)?;
                Ok(None)
            }

            ClientCommand::MarkConversationRead { conversation_id } => {
                let marked = self.mark_conversation_read(user_id, conversation_id).await?;
                debug!(conversation_id = %conversation_id, marked = marked.len(), "mark read");
                let unread_count = self
                    .read_receipts
                    .unread_count_for(conversation_id, user_id)
                    .await?;
                Ok(Some(WsOutboundEvent::ConversationUnreadCount {
                    conversation_id,
                    unread_count,
                }))
            }

            ClientCommand::MarkNotificationRead { notification_id } => {
                self.notifications
                    .mark_read(notification_id, user_id)
                    .await?;
                Ok(None)
            }

            ClientCommand::MarkAllNotificationsRead => {
                self.notifications.mark_all_read(user_id).await?;
                let unread_count = self.notifications.get_unread_count(user_id).await?;
                Ok(Some(WsOutboundEvent::NotificationUnreadCount { unread_count }))
            }

            ClientCommand::Ping => Ok(Some(WsOutboundEvent::Pong)),
        }
    }
}
