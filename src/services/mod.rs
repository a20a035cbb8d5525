pub mod collaborators;
pub mod conversation_service;
pub mod file_service;
pub mod message_service;
pub mod search_service;
pub mod thread_service;

pub use conversation_service::ConversationService;
pub use file_service::FileService;
pub use message_service::MessageService;
pub use search_service::SearchService;
pub use thread_service::ThreadService;
