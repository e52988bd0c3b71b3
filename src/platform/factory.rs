// ABOUTME: Constructs the platform client selected by adapter.adapter_type
// ABOUTME: Unknown types fail fast at startup

use anyhow::Result;
use std::sync::Arc;

use skiff_core::config::Config;
use skiff_core::traits::PlatformClient;

use crate::platform::mock::MockPlatformClient;

/// Build the platform client for the configured adapter type.
pub fn create_platform_client(config: &Config) -> Result<Arc<dyn PlatformClient>> {
    match config.adapter.adapter_type.as_str() {
        "mock" => Ok(Arc::new(MockPlatformClient::new())),
        #[cfg(feature = "telegram")]
        "telegram" => {
            let telegram = config
                .telegram
                .clone()
                .ok_or_else(|| anyhow::anyhow!("[telegram] config section is required"))?;
            Ok(Arc::new(crate::platform::telegram::TelegramClient::new(
                telegram,
            )))
        }
        other => anyhow::bail!("Unknown adapter_type: {}", other),
    }
}
