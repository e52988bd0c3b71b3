// ABOUTME: Platform client implementations behind the PlatformClient trait
// ABOUTME: The factory selects one by adapter_type at startup

pub mod factory;
pub mod mock;
#[cfg(feature = "telegram")]
pub mod telegram;

pub use factory::create_platform_client;
pub use mock::MockPlatformClient;
#[cfg(feature = "telegram")]
pub use telegram::TelegramClient;
