use super::events::WsOutboundEvent;
use super::presence::PresenceRegistry;
use super::rooms::{ChannelId, RoomRouter};
use super::ConnectionId;
use crate::metrics;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Fans events out to live connections.
///
/// Delivery is best-effort: a failed push is logged and counted, never
/// propagated, so callers can treat fan-out as infallible.
#[derive(Clone)]
pub struct EventHub {
    presence: Arc<PresenceRegistry>,
    rooms: Arc<RoomRouter>,
}

impl EventHub {
    pub fn new(presence: Arc<PresenceRegistry>, rooms: Arc<RoomRouter>) -> Self {
        Self { presence, rooms }
    }

    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.presence
    }

    pub fn rooms(&self) -> &Arc<RoomRouter> {
        &self.rooms
    }

    /// Sends to one connection. Returns whether it was delivered.
    pub fn send_to_connection(&self, connection_id: ConnectionId, event: WsOutboundEvent) -> bool {
        let name = event.event_name();
        match self.presence.send(connection_id, event) {
            Ok(()) => true,
            Err(err) => {
                warn!(event = name, error = %err, "live delivery failed");
                metrics::record_push_failure();
                false
            }
        }
    }

    /// Sends to every member of the channel except `except`. Returns the
    /// number of connections reached.
    pub fn publish(
        &self,
        channel: ChannelId,
        event: &WsOutboundEvent,
        except: Option<ConnectionId>,
    ) -> usize {
        let targets = self
            .rooms
            .members(channel)
            .into_iter()
            .filter(|id| Some(*id) != except);
        self.deliver(targets, event)
    }

    pub fn send_to_user(&self, user_id: Uuid, event: &WsOutboundEvent) -> usize {
        self.publish(ChannelId::User(user_id), event, None)
    }

    /// Every live connection of every listed user, each connection once.
    pub fn send_to_users(
        &self,
        user_ids: impl IntoIterator<Item = Uuid>,
        event: &WsOutboundEvent,
    ) -> usize {
        let targets: HashSet<ConnectionId> = user_ids
            .into_iter()
            .flat_map(|user_id| self.presence.connections_for(user_id))
            .collect();
        self.deliver(targets, event)
    }

    /// Every live connection except `except`.
    pub fn broadcast(&self, event: &WsOutboundEvent, except: Option<ConnectionId>) -> usize {
        let targets = self.presence.all_connections_except(except);
        self.deliver(targets, event)
    }

    fn deliver(
        &self,
        targets: impl IntoIterator<Item = ConnectionId>,
        event: &WsOutboundEvent,
    ) -> usize {
        targets
            .into_iter()
            .filter(|id| self.send_to_connection(*id, event.clone()))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use tokio::sync::mpsc;

    fn hub() -> EventHub {
        let presence = Arc::new(PresenceRegistry::new());
        let rooms = Arc::new(RoomRouter::new(Arc::new(MemoryStore::new())));
        EventHub::new(presence, rooms)
    }

    #[test]
    fn test_send_to_user_reaches_every_device() {
        let hub = hub();
        let user = Uuid::new_v4();
        let mut receivers = Vec::new();
        for _ in 0..2 {
            let (tx, rx) = mpsc::unbounded_channel();
            let connection = ConnectionId::new();
            hub.presence().register(user, connection, tx);
            hub.rooms().join_user_channel(connection, user);
            receivers.push(rx);
        }

        let delivered = hub.send_to_user(user, &WsOutboundEvent::Pong);
        assert_eq!(delivered, 2);
        for rx in receivers.iter_mut() {
            assert!(matches!(rx.try_recv(), Ok(WsOutboundEvent::Pong)));
        }
    }

    #[test]
    fn test_broadcast_skips_excluded_and_survives_dead_channels() {
        let hub = hub();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        hub.presence().register(Uuid::new_v4(), a, tx_a);
        hub.presence().register(Uuid::new_v4(), b, tx_b);
        drop(rx_b);

        assert_eq!(hub.broadcast(&WsOutboundEvent::Pong, Some(a)), 0);
        assert!(rx_a.try_recv().is_err());

        assert_eq!(hub.broadcast(&WsOutboundEvent::Pong, None), 1);
        assert!(rx_a.try_recv().is_ok());
    }
}
