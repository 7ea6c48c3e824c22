use crate::{
    auth::TokenVerifier,
    config::{NotificationPolicy, WebSocketConfig},
    gateway::Gateway,
    services::{ConversationService, MessageService, NotificationService, ReadReceiptService},
    store::ChatStore,
    websocket::{EventHub, PresenceRegistry, RoomRouter},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub websocket: WebSocketConfig,
}

impl AppState {
    /// Wires the presence registry, room router and services around one
    /// store. Each call produces an independent set of in-memory tables.
    pub fn build(
        store: Arc<dyn ChatStore>,
        verifier: Arc<dyn TokenVerifier>,
        policy: NotificationPolicy,
        websocket: WebSocketConfig,
    ) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let rooms = Arc::new(RoomRouter::new(store.clone()));
        let hub = EventHub::new(presence, rooms);

        let conversations = Arc::new(ConversationService::new(store.clone()));
        let notifications = Arc::new(NotificationService::new(
            store.clone(),
            hub.clone(),
            policy,
        ));
        let read_receipts = Arc::new(ReadReceiptService::new(store.clone(), hub.clone()));
        let messages = Arc::new(MessageService::new(
            store,
            hub.clone(),
            conversations.clone(),
            notifications.clone(),
            read_receipts.clone(),
        ));

        let gateway = Arc::new(Gateway::new(
            hub,
            conversations,
            messages,
            notifications,
            read_receipts,
        ));

        Self {
            gateway,
            verifier,
            websocket,
        }
    }
}
