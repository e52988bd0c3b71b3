// ABOUTME: PlatformClient trait and the normalized raw-event model every platform produces
// ABOUTME: Polling and push transports both emit into the same single-consumer channel

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;

use crate::error::Result;

/// Platform-normalized identity of a message author.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawSender {
    pub user_id: String,
    pub display_name: Option<String>,
    pub username: Option<String>,
    pub is_bot: bool,
}

/// Reference to an attachment as the platform describes it, before download.
#[derive(Debug, Clone)]
pub struct RawAttachment {
    /// Platform-specific handle used for downloading
    pub source_id: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub size: Option<u64>,
}

/// What kind of chat context a conversation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    Group,
    Channel,
}

impl ConversationKind {
    pub fn is_direct(&self) -> bool {
        matches!(self, ConversationKind::Direct)
    }
}

/// A message in platform-normalized form. Platform clients translate their
/// SDK types into this before anything else sees them.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// The platform's native conversation identifier (e.g. "guild/channel")
    pub platform_conversation_id: String,
    pub conversation_kind: ConversationKind,
    pub conversation_name: Option<String>,
    pub server_id: Option<String>,
    pub server_name: Option<String>,
    pub message_id: String,
    pub thread_id: Option<String>,
    pub reply_to_message_id: Option<String>,
    pub sender: RawSender,
    pub text: Option<String>,
    pub timestamp_ms: i64,
    pub edit_timestamp_ms: Option<i64>,
    /// True when this is an echo of a message the adapter itself sent
    pub from_self: bool,
    /// Mentioned user ids, or the literal "all"
    pub mentions: Vec<String>,
    /// Current reaction state (emoji -> reacting user ids). `None` means the
    /// event carried no reaction information at all.
    pub reactions: Option<HashMap<String, HashSet<String>>>,
    pub pinned: Option<bool>,
    pub attachments: Vec<RawAttachment>,
}

impl RawMessage {
    /// Minimal message used pervasively by tests.
    pub fn text_message(
        platform_conversation_id: impl Into<String>,
        message_id: impl Into<String>,
        user_id: impl Into<String>,
        text: impl Into<String>,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            platform_conversation_id: platform_conversation_id.into(),
            conversation_kind: ConversationKind::Group,
            conversation_name: None,
            server_id: None,
            server_name: None,
            message_id: message_id.into(),
            thread_id: None,
            reply_to_message_id: None,
            sender: RawSender {
                user_id: user_id.into(),
                display_name: None,
                username: None,
                is_bot: false,
            },
            text: Some(text.into()),
            timestamp_ms,
            edit_timestamp_ms: None,
            from_self: false,
            mentions: Vec::new(),
            reactions: None,
            pinned: None,
            attachments: Vec::new(),
        }
    }
}

/// One event from the platform session, already normalized.
///
/// Platforms that merge reactions/pins into generic "message updated" events
/// deliver those as `EditedMessage` carrying the merged state; the
/// conversation manager diffs out what actually changed.
#[derive(Debug, Clone)]
pub enum RawEvent {
    NewMessage(RawMessage),
    EditedMessage(RawMessage),
    DeletedMessages {
        platform_conversation_id: String,
        message_ids: Vec<String>,
    },
    /// Per-user reaction diff, for platforms that report reactions as
    /// dedicated events rather than merged message updates.
    ReactionChange {
        platform_conversation_id: String,
        message_id: String,
        user_id: Option<String>,
        added: Vec<String>,
        removed: Vec<String>,
    },
    PinChange {
        platform_conversation_id: String,
        message_id: String,
        pinned: bool,
    },
    ConversationRenamed {
        platform_conversation_id: String,
        conversation_name: Option<String>,
        server_id: Option<String>,
        server_name: Option<String>,
    },
}

/// Per-platform feature variance consulted by the processors.
#[derive(Debug, Clone, Copy)]
pub struct PlatformCapabilities {
    pub supports_pins: bool,
    pub supports_reactions: bool,
    /// Whether an edit event may add attachments
    pub attachments_on_edit: bool,
    /// Whether the incoming stream echoes the adapter's own sends.
    /// When false, the outgoing processor records sent messages directly.
    pub echoes_own_messages: bool,
    /// Whether `upload_attachment` already delivers the file to the
    /// conversation (its ref is then a message id).
    pub uploads_deliver: bool,
}

impl Default for PlatformCapabilities {
    fn default() -> Self {
        Self {
            supports_pins: true,
            supports_reactions: true,
            attachments_on_edit: false,
            echoes_own_messages: true,
            uploads_deliver: true,
        }
    }
}

/// Options for an outbound send beyond the text itself.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub thread_id: Option<String>,
    pub mentions: Vec<String>,
    /// Refs previously returned by `upload_attachment`. Platforms whose
    /// upload already delivers the file ignore these.
    pub attachment_refs: Vec<String>,
}

/// The narrow seam between the shared runtime and a platform SDK.
///
/// Webhook-only, polling, and socket-mode transports all fit behind this;
/// reconnection policy is the implementation's responsibility, and
/// `is_alive` must report the session state faithfully.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    async fn is_alive(&self) -> bool;

    /// Single-consumer channel of normalized platform events.
    async fn stream_events(&self) -> Result<mpsc::Receiver<RawEvent>>;

    fn capabilities(&self) -> PlatformCapabilities;

    /// The adapter's own user id on the platform (for loopback detection).
    fn bot_user_id(&self) -> &str;

    /// Send a message; returns the platform ids of the created messages.
    async fn send_message(
        &self,
        platform_conversation_id: &str,
        text: &str,
        opts: &SendOptions,
    ) -> Result<Vec<String>>;

    async fn edit_message(
        &self,
        platform_conversation_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<()>;

    async fn delete_message(
        &self,
        platform_conversation_id: &str,
        message_id: &str,
    ) -> Result<()>;

    async fn add_reaction(
        &self,
        platform_conversation_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<()>;

    async fn remove_reaction(
        &self,
        platform_conversation_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<()>;

    async fn pin_message(
        &self,
        platform_conversation_id: &str,
        message_id: &str,
    ) -> Result<()>;

    async fn unpin_message(
        &self,
        platform_conversation_id: &str,
        message_id: &str,
    ) -> Result<()>;

    /// Fetch message history, newest-last. `before`/`after` are ms since epoch.
    async fn fetch_history(
        &self,
        platform_conversation_id: &str,
        limit: usize,
        before_ms: Option<i64>,
        after_ms: Option<i64>,
    ) -> Result<Vec<RawMessage>>;

    async fn download_attachment(&self, attachment: &RawAttachment) -> Result<Vec<u8>>;

    /// Upload a file; returns a platform ref. For platforms where uploading
    /// is itself a send, the ref is the delivered message id.
    async fn upload_attachment(
        &self,
        platform_conversation_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<String>;
}
