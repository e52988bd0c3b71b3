// ABOUTME: Maps framework bot_response operations onto platform client calls
// ABOUTME: Validates, rate-limits, splits over-length sends, and gates on capabilities

use std::sync::Arc;

use skiff_core::attachments::{encode_base64, load_attachment, Uploader};
use skiff_core::config::Config;
use skiff_core::conversation::manager::ConversationManager;
use skiff_core::conversation::ConversationInfo;
use skiff_core::emoji::EmojiConverter;
use skiff_core::error::{AdapterError, Result};
use skiff_core::events::outgoing::{
    EditMessageData, FetchAttachmentData, FetchHistoryData, MessageRefData, OutgoingEvent,
    ReactionData, ResponseData, SendMessageData,
};
use skiff_core::history::{HistoryFetcher, HistoryRequest};
use skiff_core::rate_limiter::{RateLimiter, RequestKind};
use skiff_core::traits::{PlatformCapabilities, PlatformClient, SendOptions};

/// Executes framework-initiated operations against the platform.
pub struct OutgoingEventProcessor {
    client: Arc<dyn PlatformClient>,
    manager: Arc<ConversationManager>,
    uploader: Uploader,
    history: Arc<HistoryFetcher>,
    rate_limiter: Arc<RateLimiter>,
    emoji: Arc<EmojiConverter>,
    capabilities: PlatformCapabilities,
    max_message_length: usize,
}

impl OutgoingEventProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        client: Arc<dyn PlatformClient>,
        manager: Arc<ConversationManager>,
        history: Arc<HistoryFetcher>,
        rate_limiter: Arc<RateLimiter>,
        emoji: Arc<EmojiConverter>,
    ) -> Self {
        let capabilities = client.capabilities();
        Self {
            uploader: Uploader::new(client.clone(), rate_limiter.clone()),
            client,
            manager,
            history,
            rate_limiter,
            emoji,
            capabilities,
            max_message_length: config.adapter.max_message_length,
        }
    }

    pub async fn process_event(&self, event: OutgoingEvent) -> Result<ResponseData> {
        match event {
            OutgoingEvent::SendMessage(data) => self.handle_send_message(data).await,
            OutgoingEvent::EditMessage(data) => self.handle_edit_message(data).await,
            OutgoingEvent::DeleteMessage(data) => self.handle_delete_message(data).await,
            OutgoingEvent::AddReaction(data) => self.handle_reaction(data, true).await,
            OutgoingEvent::RemoveReaction(data) => self.handle_reaction(data, false).await,
            OutgoingEvent::FetchHistory(data) => self.handle_fetch_history(data).await,
            OutgoingEvent::FetchAttachment(data) => self.handle_fetch_attachment(data).await,
            OutgoingEvent::PinMessage(data) => self.handle_pin(data, true).await,
            OutgoingEvent::UnpinMessage(data) => self.handle_pin(data, false).await,
        }
    }

    async fn handle_send_message(&self, data: SendMessageData) -> Result<ResponseData> {
        let conversation = self.find_conversation(&data.conversation_id)?;
        if data.text.is_empty() && data.attachments.is_empty() {
            return Err(AdapterError::Validation(
                "send_message needs text or attachments".to_string(),
            ));
        }

        let refs = self
            .uploader
            .upload_all(&conversation.platform_conversation_id, &data.attachments)
            .await?;
        let mut message_ids = if self.capabilities.uploads_deliver {
            refs.clone()
        } else {
            Vec::new()
        };

        let chunks = if data.text.is_empty() {
            Vec::new()
        } else {
            split_long_message(&data.text, self.max_message_length)
        };
        let mut recorded: Vec<(String, String)> = Vec::new();

        for (index, chunk) in chunks.iter().enumerate() {
            self.rate_limiter
                .limit_request(RequestKind::Message, Some(&data.conversation_id))
                .await;
            let attachment_refs = if !self.capabilities.uploads_deliver && index == 0 {
                refs.clone()
            } else {
                Vec::new()
            };
            let ids = self
                .client
                .send_message(
                    &conversation.platform_conversation_id,
                    chunk,
                    &SendOptions {
                        thread_id: data.thread_id.clone(),
                        mentions: data.mentions.clone(),
                        attachment_refs,
                    },
                )
                .await?;
            for id in &ids {
                recorded.push((id.clone(), chunk.clone()));
            }
            message_ids.extend(ids);
        }

        // Platforms without self-echo never deliver these back to us, so
        // the manager records them directly as framework-origin.
        if !self.capabilities.echoes_own_messages {
            self.manager
                .record_outgoing_messages(&data.conversation_id, &recorded, data.thread_id.clone())
                .await;
        }
        Ok(ResponseData::MessageIds(message_ids))
    }

    async fn handle_edit_message(&self, data: EditMessageData) -> Result<ResponseData> {
        let conversation = self.find_conversation(&data.conversation_id)?;
        if data.text.chars().count() > self.max_message_length {
            // Edits are never silently split
            return Err(AdapterError::Validation(format!(
                "edit_message text exceeds max_message_length ({})",
                self.max_message_length
            )));
        }
        if !data.attachments.is_empty() && !self.capabilities.attachments_on_edit {
            return Err(AdapterError::Validation(
                "attachments are not supported on edit_message for this platform".to_string(),
            ));
        }
        if !data.attachments.is_empty() {
            self.uploader
                .upload_all(&conversation.platform_conversation_id, &data.attachments)
                .await?;
        }

        self.rate_limiter
            .limit_request(RequestKind::Message, Some(&data.conversation_id))
            .await;
        self.client
            .edit_message(
                &conversation.platform_conversation_id,
                &data.message_id,
                &data.text,
            )
            .await?;

        if !self.capabilities.echoes_own_messages {
            self.manager
                .apply_framework_edit(&data.conversation_id, &data.message_id, &data.text)
                .await;
        }
        Ok(ResponseData::None)
    }

    async fn handle_delete_message(&self, data: MessageRefData) -> Result<ResponseData> {
        let conversation = self.find_conversation(&data.conversation_id)?;
        self.rate_limiter
            .limit_request(RequestKind::General, Some(&data.conversation_id))
            .await;
        self.client
            .delete_message(&conversation.platform_conversation_id, &data.message_id)
            .await?;

        if !self.capabilities.echoes_own_messages {
            self.manager
                .apply_framework_delete(&data.conversation_id, &data.message_id)
                .await;
        }
        Ok(ResponseData::None)
    }

    async fn handle_reaction(&self, data: ReactionData, add: bool) -> Result<ResponseData> {
        let conversation = self.find_conversation(&data.conversation_id)?;
        if !self.capabilities.supports_reactions {
            return Err(AdapterError::Permanent(
                "reactions unsupported on this platform".to_string(),
            ));
        }
        self.rate_limiter
            .limit_request(RequestKind::General, Some(&data.conversation_id))
            .await;
        let emoji = self.emoji.to_unicode(&data.emoji);
        if add {
            self.client
                .add_reaction(
                    &conversation.platform_conversation_id,
                    &data.message_id,
                    &emoji,
                )
                .await?;
        } else {
            self.client
                .remove_reaction(
                    &conversation.platform_conversation_id,
                    &data.message_id,
                    &emoji,
                )
                .await?;
        }
        Ok(ResponseData::None)
    }

    async fn handle_pin(&self, data: MessageRefData, pin: bool) -> Result<ResponseData> {
        let conversation = self.find_conversation(&data.conversation_id)?;
        if !self.capabilities.supports_pins {
            // Stable contract for platforms without a pin API
            return Err(AdapterError::Permanent(
                "pin/unpin unsupported on this platform".to_string(),
            ));
        }
        self.rate_limiter
            .limit_request(RequestKind::General, Some(&data.conversation_id))
            .await;
        if pin {
            self.client
                .pin_message(&conversation.platform_conversation_id, &data.message_id)
                .await?;
        } else {
            self.client
                .unpin_message(&conversation.platform_conversation_id, &data.message_id)
                .await?;
        }
        if !self.capabilities.echoes_own_messages {
            self.manager
                .apply_framework_pin(&data.conversation_id, &data.message_id, pin)
                .await;
        }
        Ok(ResponseData::None)
    }

    async fn handle_fetch_history(&self, data: FetchHistoryData) -> Result<ResponseData> {
        self.find_conversation(&data.conversation_id)?;
        self.rate_limiter
            .limit_request(RequestKind::General, Some(&data.conversation_id))
            .await;
        let history = self
            .history
            .fetch_validated(HistoryRequest {
                conversation_id: data.conversation_id.clone(),
                before: data.before,
                after: data.after,
                limit: data.limit,
                exclude_message_id: None,
            })
            .await?;
        Ok(ResponseData::History(history))
    }

    /// Cache-only: content comes from disk, never from the platform.
    async fn handle_fetch_attachment(&self, data: FetchAttachmentData) -> Result<ResponseData> {
        let cache = self.manager.attachment_cache();
        let attachment = cache.get(&data.attachment_id).ok_or_else(|| {
            AdapterError::Attachment(format!("attachment {} not found", data.attachment_id))
        })?;
        if !attachment.processable {
            return Err(AdapterError::Attachment(format!(
                "attachment {} was not processable",
                data.attachment_id
            )));
        }
        let bytes = load_attachment(cache.storage_dir(), &attachment).await?;
        Ok(ResponseData::Content(encode_base64(&bytes)))
    }

    fn find_conversation(&self, conversation_id: &str) -> Result<ConversationInfo> {
        self.manager
            .get_conversation(conversation_id)
            .ok_or_else(|| AdapterError::ConversationNotFound(conversation_id.to_string()))
    }
}

/// Split text into chunks of at most `max_length` codepoints, preferring
/// sentence endings, then newlines, then spaces. Chunks always concatenate
/// back to the original text.
pub fn split_long_message(text: &str, max_length: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_length {
        return vec![text.to_string()];
    }

    let mut parts = Vec::new();
    let mut start = 0;
    while chars.len() - start > max_length {
        let window_end = start + max_length;
        let mut cut = None;

        // Sentence ending in the tail of the window
        let floor = window_end.saturating_sub(200).max(start + 1);
        for i in (floor..window_end).rev() {
            if matches!(chars[i - 1], '.' | '!' | '?') && chars[i].is_whitespace() {
                cut = Some(i + 1);
                break;
            }
        }

        if cut.is_none() {
            if let Some(pos) = (start..window_end).rev().find(|&i| chars[i] == '\n') {
                if pos > start + max_length / 2 {
                    cut = Some(pos + 1);
                }
            }
        }
        if cut.is_none() {
            cut = (start + max_length / 2..window_end)
                .rev()
                .find(|&i| chars[i] == ' ')
                .map(|pos| pos + 1);
        }

        let cut = cut.unwrap_or(window_end);
        parts.push(chars[start..cut].iter().collect());
        start = cut;
    }
    if start < chars.len() {
        parts.push(chars[start..].iter().collect());
    }
    parts
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_short_text_unchanged() {
        assert_eq!(split_long_message("hello", 100), vec!["hello"]);
    }

    #[test]
    fn test_split_exact_limit() {
        let text = "a".repeat(100);
        assert_eq!(split_long_message(&text, 100).len(), 1);
    }

    #[test]
    fn test_split_boundary_free_is_exact_ceil() {
        let text = "a".repeat(3000);
        let parts = split_long_message(&text, 1999);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].chars().count(), 1999);
        assert_eq!(parts[1].chars().count(), 1001);
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn test_split_prefers_sentence_boundary() {
        let text = format!("{}. {}", "a".repeat(90), "b".repeat(90));
        let parts = split_long_message(&text, 100);
        assert_eq!(parts.len(), 2);
        assert!(parts[0].ends_with(". "));
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn test_split_prefers_space_over_hard_cut() {
        let text = format!("{} {}", "a".repeat(80), "b".repeat(80));
        let parts = split_long_message(&text, 100);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].chars().count(), 81);
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn test_split_concat_always_reproduces_input() {
        let text = "word ".repeat(1000);
        let parts = split_long_message(&text, 333);
        assert!(parts.iter().all(|p| p.chars().count() <= 333));
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn test_split_counts_codepoints_not_bytes() {
        // Multibyte characters; byte-based slicing would panic or overcount
        let text = "é".repeat(150);
        let parts = split_long_message(&text, 100);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].chars().count(), 100);
        assert_eq!(parts.concat(), text);
    }
}
