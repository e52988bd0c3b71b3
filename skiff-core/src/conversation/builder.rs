// ABOUTME: Builds CachedMessage values from platform-normalized raw messages
// ABOUTME: Part of the platform capability pack consumed by the ConversationManager

use std::collections::HashMap;
use std::collections::HashSet;

use crate::cache::message::{CachedMessage, MessageOrigin};
use crate::cache::user::UserInfo;
use crate::traits::RawMessage;

/// Step-wise construction of a cached message from a raw platform message.
pub struct MessageBuilder {
    message: CachedMessage,
}

impl MessageBuilder {
    pub fn from_raw(raw: &RawMessage, conversation_id: &str) -> Self {
        let origin = if raw.from_self {
            MessageOrigin::Framework
        } else {
            MessageOrigin::Platform
        };
        Self {
            message: CachedMessage {
                message_id: raw.message_id.clone(),
                conversation_id: conversation_id.to_string(),
                thread_id: None,
                reply_to_message_id: raw.reply_to_message_id.clone(),
                sender_id: raw.sender.user_id.clone(),
                sender_name: sender_display_name(raw),
                text: raw.text.clone(),
                timestamp_ms: raw.timestamp_ms,
                edit_timestamp_ms: raw.edit_timestamp_ms,
                edited: raw.edit_timestamp_ms.is_some(),
                origin,
                is_direct_message: raw.conversation_kind.is_direct(),
                is_pinned: raw.pinned.unwrap_or(false),
                mentions: raw.mentions.clone(),
                reactions: raw.reactions.clone().unwrap_or_default(),
                attachments: HashSet::new(),
            },
        }
    }

    /// Prefer the cached user identity over what the event carried.
    pub fn with_sender(mut self, user: &UserInfo) -> Self {
        self.message.sender_id = user.user_id.clone();
        self.message.sender_name = user.mention_name().to_string();
        self
    }

    pub fn with_thread(mut self, thread_id: Option<String>) -> Self {
        self.message.thread_id = thread_id;
        self
    }

    pub fn with_attachment_ids(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.message.attachments.extend(ids);
        self
    }

    pub fn build(self) -> CachedMessage {
        self.message
    }
}

fn sender_display_name(raw: &RawMessage) -> String {
    raw.sender
        .display_name
        .clone()
        .or_else(|| raw.sender.username.clone())
        .unwrap_or_else(|| {
            if raw.sender.user_id.is_empty() {
                "Unknown User".to_string()
            } else {
                raw.sender.user_id.clone()
            }
        })
}

/// Framework-originated message recorded directly (no platform echo).
pub fn framework_message(
    conversation_id: &str,
    message_id: &str,
    text: &str,
    thread_id: Option<String>,
    bot_user_id: &str,
    is_direct: bool,
    timestamp_ms: i64,
) -> CachedMessage {
    CachedMessage {
        message_id: message_id.to_string(),
        conversation_id: conversation_id.to_string(),
        thread_id,
        reply_to_message_id: None,
        sender_id: bot_user_id.to_string(),
        sender_name: bot_user_id.to_string(),
        text: Some(text.to_string()),
        timestamp_ms,
        edit_timestamp_ms: None,
        edited: false,
        origin: MessageOrigin::Framework,
        is_direct_message: is_direct,
        is_pinned: false,
        mentions: Vec::new(),
        reactions: HashMap::new(),
        attachments: HashSet::new(),
    }
}
