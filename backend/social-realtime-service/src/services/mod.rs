pub mod conversation_service;
pub mod message_service;
pub mod notification_service;
pub mod read_receipts;

pub use conversation_service::ConversationService;
pub use message_service::{MessageService, SendMessage};
pub use notification_service::NotificationService;
pub use read_receipts::{MarkReadResult, ReadReceiptService};
