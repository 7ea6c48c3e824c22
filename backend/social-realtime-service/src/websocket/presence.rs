//! Presence registry: which users are online and through which connections.
//!
//! A user is online iff at least one live connection is registered for them.
//! Per-user mutations go through the `DashMap` entry API so the
//! came-online / went-offline transitions are decided atomically with the
//! membership change.

use super::events::WsOutboundEvent;
use super::{ConnectionId, DeliveryError, EventSender};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

struct ConnectionHandle {
    user_id: Uuid,
    sender: EventSender,
}

/// Result of registering a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceTransition {
    /// First connection for the user.
    CameOnline,
    AlreadyOnline,
}

#[derive(Default)]
pub struct PresenceRegistry {
    users: DashMap<Uuid, HashSet<ConnectionId>>,
    connections: DashMap<ConnectionId, ConnectionHandle>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        user_id: Uuid,
        connection_id: ConnectionId,
        sender: EventSender,
    ) -> PresenceTransition {
        self.connections
            .insert(connection_id, ConnectionHandle { user_id, sender });

        let mut entry = self.users.entry(user_id).or_default();
        entry.insert(connection_id);
        let transition = if entry.len() == 1 {
            PresenceTransition::CameOnline
        } else {
            PresenceTransition::AlreadyOnline
        };

        debug!(
            user_id = %user_id,
            connection_id = %connection_id,
            connections = entry.len(),
            "connection registered"
        );
        transition
    }

    /// Removes the connection. Returns its owner and whether that was the
    /// owner's last connection. Unknown ids are a no-op.
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<(Uuid, bool)> {
        let (_, handle) = self.connections.remove(&connection_id)?;
        let user_id = handle.user_id;

        let went_offline = match self.users.entry(user_id) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().remove(&connection_id);
                if entry.get().is_empty() {
                    entry.remove();
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => false,
        };

        debug!(
            user_id = %user_id,
            connection_id = %connection_id,
            went_offline,
            "connection unregistered"
        );
        Some((user_id, went_offline))
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.users.contains_key(&user_id)
    }

    pub fn connections_for(&self, user_id: Uuid) -> Vec<ConnectionId> {
        self.users
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn user_of(&self, connection_id: ConnectionId) -> Option<Uuid> {
        self.connections.get(&connection_id).map(|h| h.user_id)
    }

    pub fn online_user_count(&self) -> usize {
        self.users.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Every connection except `except`.
    pub fn all_connections_except(&self, except: Option<ConnectionId>) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .map(|entry| *entry.key())
            .filter(|id| Some(*id) != except)
            .collect()
    }

    pub fn send(
        &self,
        connection_id: ConnectionId,
        event: WsOutboundEvent,
    ) -> Result<(), DeliveryError> {
        let handle = self
            .connections
            .get(&connection_id)
            .ok_or(DeliveryError::UnknownConnection(connection_id))?;
        handle
            .sender
            .send(event)
            .map_err(|_| DeliveryError::ChannelClosed(connection_id))
    }
}
