// ABOUTME: Telegram PlatformClient using teloxide with long polling
// ABOUTME: Normalizes updates into RawEvents; uploads deliver directly, sends are not echoed

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    AllowedUpdate, ChatKind, FileId, InputFile, MediaKind, MessageId, MessageKind, ReactionType,
    ThreadId, UpdateKind,
};
use tokio::sync::{mpsc, Mutex};

use skiff_core::config::TelegramConfig;
use skiff_core::error::{AdapterError, Result};
use skiff_core::traits::{
    ConversationKind, PlatformCapabilities, PlatformClient, RawAttachment, RawEvent, RawMessage,
    RawSender, SendOptions,
};

pub struct TelegramClient {
    bot: Bot,
    config: TelegramConfig,
    bot_user_id: OnceLock<String>,
    alive: AtomicBool,
    poller: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl TelegramClient {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            bot: Bot::new(&config.bot_token),
            config,
            bot_user_id: OnceLock::new(),
            alive: AtomicBool::new(false),
            poller: Mutex::new(None),
        }
    }

    fn chat_id(platform_conversation_id: &str) -> Result<ChatId> {
        platform_conversation_id
            .parse::<i64>()
            .map(ChatId)
            .map_err(|e| {
                AdapterError::Validation(format!(
                    "Invalid Telegram chat ID '{}': {}",
                    platform_conversation_id, e
                ))
            })
    }

    fn message_id(message_id: &str) -> Result<MessageId> {
        message_id
            .parse::<i32>()
            .map(MessageId)
            .map_err(|e| {
                AdapterError::Validation(format!("Invalid Telegram message ID '{}': {}", message_id, e))
            })
    }
}

fn map_request_error(e: teloxide::RequestError) -> AdapterError {
    match e {
        teloxide::RequestError::Network(e) => AdapterError::Transient(e.to_string()),
        teloxide::RequestError::Io(e) => AdapterError::Transient(e.to_string()),
        teloxide::RequestError::RetryAfter(after) => {
            AdapterError::Transient(format!("rate limited by Telegram: retry after {:?}", after))
        }
        other => AdapterError::Permanent(other.to_string()),
    }
}

/// Build a normalized message from a Telegram update, or None for
/// service/unsupported messages.
fn raw_from_message(bot_user_id: &str, message: &Message, edited: bool) -> Option<RawMessage> {
    let common = match &message.kind {
        MessageKind::Common(common) => common,
        _ => return None,
    };

    let (text, attachments) = match &common.media_kind {
        MediaKind::Text(text) => (Some(text.text.clone()), Vec::new()),
        MediaKind::Document(doc) => (
            doc.caption.clone(),
            vec![RawAttachment {
                source_id: doc.document.file.id.to_string(),
                filename: doc
                    .document
                    .file_name
                    .clone()
                    .or_else(|| Some("document".to_string())),
                content_type: doc.document.mime_type.as_ref().map(|m| m.to_string()),
                size: Some(doc.document.file.size as u64),
            }],
        ),
        MediaKind::Photo(photo) => (
            photo.caption.clone(),
            // Use the largest photo size
            photo
                .photo
                .last()
                .map(|p| RawAttachment {
                    source_id: p.file.id.to_string(),
                    filename: Some("photo.jpg".to_string()),
                    content_type: Some("image/jpeg".to_string()),
                    size: Some(p.file.size as u64),
                })
                .into_iter()
                .collect(),
        ),
        _ => return None,
    };

    let from = message.from.as_ref()?;
    let display_name = {
        let mut parts: Vec<String> = vec![from.first_name.clone()];
        if let Some(last) = &from.last_name {
            parts.push(last.clone());
        }
        Some(parts.join(" "))
    };

    // Only text mentions carry a resolvable user id
    let mentions = match &common.media_kind {
        MediaKind::Text(text) => text
            .entities
            .iter()
            .filter_map(|entity| match &entity.kind {
                teloxide::types::MessageEntityKind::TextMention { user } => {
                    Some(user.id.0.to_string())
                }
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    let is_private = matches!(message.chat.kind, ChatKind::Private(_));
    let conversation_kind = match &message.chat.kind {
        ChatKind::Private(_) => ConversationKind::Direct,
        ChatKind::Public(public) => match public.kind {
            teloxide::types::PublicChatKind::Channel(_) => ConversationKind::Channel,
            _ => ConversationKind::Group,
        },
    };

    Some(RawMessage {
        platform_conversation_id: message.chat.id.0.to_string(),
        conversation_kind,
        conversation_name: if is_private {
            None
        } else {
            message.chat.title().map(str::to_string)
        },
        server_id: None,
        server_name: None,
        message_id: message.id.0.to_string(),
        thread_id: message.thread_id.map(|t| t.0 .0.to_string()),
        reply_to_message_id: message.reply_to_message().map(|m| m.id.0.to_string()),
        sender: RawSender {
            user_id: from.id.0.to_string(),
            display_name,
            username: from.username.clone(),
            is_bot: from.is_bot,
        },
        text,
        timestamp_ms: message.date.timestamp_millis(),
        edit_timestamp_ms: if edited {
            common.edit_date.map(|d| d.timestamp_millis())
        } else {
            None
        },
        from_self: from.id.0.to_string() == bot_user_id,
        mentions,
        reactions: None,
        pinned: None,
        attachments,
    })
}

fn reaction_emojis(reactions: &[ReactionType]) -> Vec<String> {
    reactions
        .iter()
        .filter_map(|r| match r {
            ReactionType::Emoji { emoji } => Some(emoji.clone()),
            _ => None,
        })
        .collect()
}

#[async_trait]
impl PlatformClient for TelegramClient {
    async fn connect(&self) -> Result<()> {
        let me = self.bot.get_me().await.map_err(map_request_error)?;
        let user_id = me.id.0.to_string();
        let _ = self.bot_user_id.set(user_id.clone());
        self.alive.store(true, Ordering::SeqCst);
        tracing::info!(
            bot_username = %me.username(),
            bot_id = %user_id,
            "Telegram bot authenticated"
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(poller) = self.poller.lock().await.take() {
            poller.abort();
        }
        tracing::info!(platform = "telegram", "Disconnected");
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        if !self.alive.load(Ordering::SeqCst) {
            return false;
        }
        self.bot.get_me().await.is_ok()
    }

    async fn stream_events(&self) -> Result<mpsc::Receiver<RawEvent>> {
        let (tx, rx) = mpsc::channel(256);
        let bot = self.bot.clone();
        let bot_user_id = self
            .bot_user_id
            .get()
            .cloned()
            .ok_or(AdapterError::NotConnected)?;
        let allowed_users = self.config.allowed_users.clone();
        let allowed_chats = self.config.allowed_chats.clone();

        // Long polling task; retried errors keep the offset
        let handle = tokio::spawn(async move {
            let mut offset: i32 = 0;

            loop {
                let updates = match bot
                    .get_updates()
                    .offset(offset)
                    .timeout(30)
                    .allowed_updates(vec![
                        AllowedUpdate::Message,
                        AllowedUpdate::EditedMessage,
                        AllowedUpdate::MessageReaction,
                    ])
                    .await
                {
                    Ok(updates) => updates,
                    Err(e) => {
                        tracing::warn!(
                            platform = "telegram",
                            error = %e,
                            "Long polling error, retrying in 5s"
                        );
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                for update in &updates {
                    offset = update.id.as_offset();

                    let event = match &update.kind {
                        UpdateKind::Message(message) => match &message.kind {
                            MessageKind::Pinned(pinned) => Some(RawEvent::PinChange {
                                platform_conversation_id: message.chat.id.0.to_string(),
                                message_id: pinned.pinned.id().0.to_string(),
                                pinned: true,
                            }),
                            _ => raw_from_message(&bot_user_id, message, false)
                                .map(RawEvent::NewMessage),
                        },
                        UpdateKind::EditedMessage(message) => {
                            raw_from_message(&bot_user_id, message, true)
                                .map(RawEvent::EditedMessage)
                        }
                        UpdateKind::MessageReaction(reaction) => {
                            let old = reaction_emojis(&reaction.old_reaction);
                            let new = reaction_emojis(&reaction.new_reaction);
                            let added: Vec<String> =
                                new.iter().filter(|e| !old.contains(e)).cloned().collect();
                            let removed: Vec<String> =
                                old.iter().filter(|e| !new.contains(e)).cloned().collect();
                            Some(RawEvent::ReactionChange {
                                platform_conversation_id: reaction.chat.id.0.to_string(),
                                message_id: reaction.message_id.0.to_string(),
                                user_id: reaction.user().as_ref().map(|u| u.id.0.to_string()),
                                added,
                                removed,
                            })
                        }
                        _ => None,
                    };
                    let Some(event) = event else { continue };

                    // Allowlists: empty means allow all
                    if let RawEvent::NewMessage(message) | RawEvent::EditedMessage(message) = &event
                    {
                        let user_id: i64 = message.sender.user_id.parse().unwrap_or(0);
                        if !allowed_users.is_empty() && !allowed_users.contains(&user_id) {
                            continue;
                        }
                        let chat_id: i64 =
                            message.platform_conversation_id.parse().unwrap_or(0);
                        if !allowed_chats.is_empty() && !allowed_chats.contains(&chat_id) {
                            continue;
                        }
                    }

                    if tx.send(event).await.is_err() {
                        tracing::warn!(platform = "telegram", "Event stream receiver dropped");
                        return;
                    }
                }
            }
        });
        *self.poller.lock().await = Some(handle);
        Ok(rx)
    }

    fn capabilities(&self) -> PlatformCapabilities {
        PlatformCapabilities {
            supports_pins: true,
            supports_reactions: true,
            attachments_on_edit: false,
            // getUpdates never delivers the bot's own messages
            echoes_own_messages: false,
            uploads_deliver: true,
        }
    }

    fn bot_user_id(&self) -> &str {
        self.bot_user_id.get().map(String::as_str).unwrap_or("")
    }

    async fn send_message(
        &self,
        platform_conversation_id: &str,
        text: &str,
        opts: &SendOptions,
    ) -> Result<Vec<String>> {
        let chat_id = Self::chat_id(platform_conversation_id)?;
        let mut request = self.bot.send_message(chat_id, text);
        if let Some(thread_id) = &opts.thread_id {
            let id = thread_id.parse::<i32>().map_err(|e| {
                AdapterError::Validation(format!("Invalid Telegram thread ID '{}': {}", thread_id, e))
            })?;
            request = request.message_thread_id(ThreadId(MessageId(id)));
        }
        let message = request.await.map_err(map_request_error)?;
        Ok(vec![message.id.0.to_string()])
    }

    async fn edit_message(
        &self,
        platform_conversation_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<()> {
        let chat_id = Self::chat_id(platform_conversation_id)?;
        self.bot
            .edit_message_text(chat_id, Self::message_id(message_id)?, text)
            .await
            .map_err(map_request_error)?;
        Ok(())
    }

    async fn delete_message(&self, platform_conversation_id: &str, message_id: &str) -> Result<()> {
        let chat_id = Self::chat_id(platform_conversation_id)?;
        self.bot
            .delete_message(chat_id, Self::message_id(message_id)?)
            .await
            .map_err(map_request_error)?;
        Ok(())
    }

    async fn add_reaction(
        &self,
        platform_conversation_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<()> {
        let chat_id = Self::chat_id(platform_conversation_id)?;
        self.bot
            .set_message_reaction(chat_id, Self::message_id(message_id)?)
            .reaction(vec![ReactionType::Emoji {
                emoji: emoji.to_string(),
            }])
            .await
            .map_err(map_request_error)?;
        Ok(())
    }

    async fn remove_reaction(
        &self,
        platform_conversation_id: &str,
        message_id: &str,
        _emoji: &str,
    ) -> Result<()> {
        // setMessageReaction replaces the bot's reactions wholesale
        let chat_id = Self::chat_id(platform_conversation_id)?;
        self.bot
            .set_message_reaction(chat_id, Self::message_id(message_id)?)
            .reaction(Vec::new())
            .await
            .map_err(map_request_error)?;
        Ok(())
    }

    async fn pin_message(&self, platform_conversation_id: &str, message_id: &str) -> Result<()> {
        let chat_id = Self::chat_id(platform_conversation_id)?;
        self.bot
            .pin_chat_message(chat_id, Self::message_id(message_id)?)
            .await
            .map_err(map_request_error)?;
        Ok(())
    }

    async fn unpin_message(&self, platform_conversation_id: &str, message_id: &str) -> Result<()> {
        let chat_id = Self::chat_id(platform_conversation_id)?;
        self.bot
            .unpin_chat_message(chat_id)
            .message_id(Self::message_id(message_id)?)
            .await
            .map_err(map_request_error)?;
        Ok(())
    }

    async fn fetch_history(
        &self,
        _platform_conversation_id: &str,
        _limit: usize,
        _before_ms: Option<i64>,
        _after_ms: Option<i64>,
    ) -> Result<Vec<RawMessage>> {
        // The Bot API has no history read; the history fetcher serves its
        // cache tier instead.
        Err(AdapterError::Permanent(
            "history unsupported by the Telegram Bot API".to_string(),
        ))
    }

    async fn download_attachment(&self, attachment: &RawAttachment) -> Result<Vec<u8>> {
        let file = self
            .bot
            .get_file(FileId(attachment.source_id.clone()))
            .await
            .map_err(map_request_error)?;

        let mut data = Vec::new();
        self.bot
            .download_file(&file.path, &mut data)
            .await
            .map_err(|e| AdapterError::Transient(format!("Failed to download file: {}", e)))?;
        Ok(data)
    }

    async fn upload_attachment(
        &self,
        platform_conversation_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<String> {
        let chat_id = Self::chat_id(platform_conversation_id)?;
        let input = InputFile::memory(bytes.to_vec()).file_name(filename.to_string());
        let message = if mime_guess::from_path(filename)
            .first_or_octet_stream()
            .type_()
            == mime_guess::mime::IMAGE
        {
            self.bot
                .send_photo(chat_id, input)
                .await
                .map_err(map_request_error)?
        } else {
            self.bot
                .send_document(chat_id, input)
                .await
                .map_err(map_request_error)?
        };
        Ok(message.id.0.to_string())
    }
}

// =============================================================================
// Tests
// =============================================================================
