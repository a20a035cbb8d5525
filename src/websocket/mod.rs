pub mod events;
pub mod handlers;
pub mod presence;
pub mod registry;
pub mod typing;

pub use presence::PresenceTracker;
pub use registry::{Room, SessionRegistry};
pub use typing::TypingTracker;
