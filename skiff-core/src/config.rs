// ABOUTME: Configuration parsing from TOML file into typed per-category sections
// ABOUTME: Categories are required; individual keys default when omitted

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub adapter: AdapterConfig,
    pub caching: CachingConfig,
    pub attachments: AttachmentConfig,
    pub rate_limit: RateLimitConfig,
    pub event_bus: EventBusConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Which platform implementation to run ("telegram", "mock", ...)
    pub adapter_type: String,
    #[serde(default = "default_adapter_name")]
    pub adapter_name: String,
    #[serde(default = "default_adapter_id")]
    pub adapter_id: String,
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    #[serde(default = "default_max_history_limit")]
    pub max_history_limit: usize,
    #[serde(default = "default_max_pagination_iterations")]
    pub max_pagination_iterations: usize,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_connection_check_interval_secs")]
    pub connection_check_interval_secs: u64,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Optional overlay file mapping platform emoji names to standard ones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji_mappings: Option<PathBuf>,
    /// Drop reaction deltas performed by the adapter's own user
    #[serde(default = "default_true")]
    pub filter_self_reactions: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachingConfig {
    #[serde(default = "default_max_messages_per_conversation")]
    pub max_messages_per_conversation: usize,
    #[serde(default = "default_max_total_messages")]
    pub max_total_messages: usize,
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: u64,
    #[serde(default = "default_cache_maintenance_interval_secs")]
    pub cache_maintenance_interval_secs: u64,
    #[serde(default = "default_true")]
    pub cache_fetched_history: bool,
    #[serde(default = "default_max_users")]
    pub max_users: usize,
    #[serde(default = "default_user_max_age_hours")]
    pub user_max_age_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentConfig {
    pub storage_dir: PathBuf,
    #[serde(default = "default_attachment_max_age_days")]
    pub max_age_days: u64,
    #[serde(default = "default_max_total_attachments")]
    pub max_total_attachments: usize,
    #[serde(default = "default_cleanup_interval_hours")]
    pub cleanup_interval_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_global_rpm")]
    pub global_rpm: u32,
    #[serde(default = "default_per_conversation_rpm")]
    pub per_conversation_rpm: u32,
    #[serde(default = "default_message_rpm")]
    pub message_rpm: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    #[serde(default = "default_bus_host")]
    pub host: String,
    #[serde(default = "default_bus_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    #[serde(default)]
    pub allowed_users: Vec<i64>,
    #[serde(default)]
    pub allowed_chats: Vec<i64>,
}

// Custom Debug impl to redact the bot token
impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"[REDACTED]")
            .field("allowed_users", &self.allowed_users)
            .field("allowed_chats", &self.allowed_chats)
            .finish()
    }
}

fn default_adapter_name() -> String {
    "skiff".to_string()
}

fn default_adapter_id() -> String {
    "skiff-0".to_string()
}

fn default_max_message_length() -> usize {
    1999
}

fn default_max_history_limit() -> usize {
    100
}

fn default_max_pagination_iterations() -> usize {
    5
}

fn default_max_file_size_mb() -> u64 {
    8
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_connection_check_interval_secs() -> u64 {
    60
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_max_messages_per_conversation() -> usize {
    100
}

fn default_max_total_messages() -> usize {
    1000
}

fn default_max_age_hours() -> u64 {
    24
}

fn default_cache_maintenance_interval_secs() -> u64 {
    300
}

fn default_max_users() -> usize {
    500
}

fn default_user_max_age_hours() -> u64 {
    24
}

fn default_attachment_max_age_days() -> u64 {
    30
}

fn default_max_total_attachments() -> usize {
    1000
}

fn default_cleanup_interval_hours() -> u64 {
    1
}

fn default_global_rpm() -> u32 {
    120
}

fn default_per_conversation_rpm() -> u32 {
    60
}

fn default_message_rpm() -> u32 {
    60
}

fn default_bus_host() -> String {
    "127.0.0.1".to_string()
}

fn default_bus_port() -> u16 {
    8081
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (used by tests).
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.adapter.adapter_type.is_empty() {
            anyhow::bail!("adapter.adapter_type must not be empty");
        }
        if self.adapter.max_message_length == 0 {
            anyhow::bail!("adapter.max_message_length must be positive");
        }
        if self.rate_limit.global_rpm == 0
            || self.rate_limit.per_conversation_rpm == 0
            || self.rate_limit.message_rpm == 0
        {
            anyhow::bail!("rate_limit values must be positive");
        }
        if self.attachments.storage_dir.as_os_str().is_empty() {
            anyhow::bail!("attachments.storage_dir must not be empty");
        }
        if self.adapter.adapter_type == "telegram" && self.telegram.is_none() {
            anyhow::bail!("adapter_type is telegram but [telegram] section is missing");
        }
        Ok(())
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.adapter.max_file_size_mb * 1024 * 1024
    }
}
