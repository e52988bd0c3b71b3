// ABOUTME: Platform-agnostic adapter runtime shared by every platform bridge
// ABOUTME: Caches, conversation tracking, rate limiting, event models, and the PlatformClient seam

pub mod attachments;
pub mod cache;
pub mod config;
pub mod conversation;
pub mod emoji;
pub mod error;
pub mod events;
pub mod history;
pub mod ids;
pub mod rate_limiter;
pub mod traits;

pub use config::Config;
pub use error::{AdapterError, Result};
