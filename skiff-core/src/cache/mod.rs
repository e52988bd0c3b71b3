// ABOUTME: In-memory stores for messages, users, and attachments
// ABOUTME: Each store runs a background sweep enforcing age and capacity bounds

pub mod attachment;
pub mod message;
pub mod user;

pub use attachment::{AttachmentCache, CachedAttachment};
pub use message::{CachedMessage, MessageCache, MessageOrigin};
pub use user::{UserCache, UserInfo};
