use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

pub mod broadcast;
pub mod events;
pub mod message_types;
pub mod presence;
pub mod rooms;
pub mod session;

pub use broadcast::EventHub;
pub use events::WsOutboundEvent;
pub use message_types::ClientCommand;
pub use presence::{PresenceRegistry, PresenceTransition};
pub use rooms::{ChannelId, RoomRouter};

/// Unique identifier for one live client connection
///
/// Allocated per WebSocket session so a user's devices are tracked and
/// cleaned up independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Outbound half of a connection's event queue
pub type EventSender = UnboundedSender<WsOutboundEvent>;

/// Live delivery to one connection failed. Never fatal to the operation that
/// produced the event; the durable record stays authoritative.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),

    #[error("connection {0} channel closed")]
    ChannelClosed(ConnectionId),
}
