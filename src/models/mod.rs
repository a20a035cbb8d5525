pub mod conversation;
pub mod message;

pub use conversation::{
    Conversation, ConversationMetadata, ConversationStatus, ConversationType, Participant,
    Priority, TenantRole, UserRole, MAX_PARTICIPANTS,
};
pub use message::{
    Attachment, EditRecord, Message, MessageContent, MessageStatus, MessageType, Reaction,
    ReadReceipt,
};
