pub mod conversation;
pub mod message;
pub mod notification;

pub use conversation::{direct_pair, Conversation, ConversationKind, ConversationSummary};
pub use message::{
    Attachment, Message, MessageKind, NewMessage, ReadReceipt, DELETED_MESSAGE_TOMBSTONE,
};
pub use notification::{
    group_key, CreateNotificationRequest, CreateOutcome, Notification, NotificationPriority,
    NotificationType,
};
