// ABOUTME: Turns raw platform events into normalized bot_request events
// ABOUTME: Downloads attachments, resolves users, honors the history-first rule

use chrono::Utc;
use std::sync::Arc;

use skiff_core::attachments::Downloader;
use skiff_core::cache::user::{UserCache, UserInfo};
use skiff_core::config::Config;
use skiff_core::conversation::manager::{
    ConversationManager, DeleteCtx, NewMessageCtx, PinCtx, ReactionCtx, RenameCtx, UpdateCtx,
};
use skiff_core::conversation::ConversationDelta;
use skiff_core::emoji::EmojiConverter;
use skiff_core::events::incoming::{BotRequest, IncomingEventBuilder, IncomingEventType};
use skiff_core::history::{HistoryFetcher, HistoryRequest};
use skiff_core::traits::{PlatformCapabilities, RawEvent, RawMessage};

/// Dispatches each normalized platform event through preprocessing, the
/// conversation manager, and the delta fan-out.
pub struct IncomingEventProcessor {
    manager: Arc<ConversationManager>,
    downloader: Arc<Downloader>,
    history: Arc<HistoryFetcher>,
    user_cache: Arc<UserCache>,
    emoji: Arc<EmojiConverter>,
    builder: IncomingEventBuilder,
    capabilities: PlatformCapabilities,
    max_history_limit: usize,
}

impl IncomingEventProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        manager: Arc<ConversationManager>,
        downloader: Arc<Downloader>,
        history: Arc<HistoryFetcher>,
        user_cache: Arc<UserCache>,
        emoji: Arc<EmojiConverter>,
        capabilities: PlatformCapabilities,
    ) -> Self {
        Self {
            manager,
            downloader,
            history,
            user_cache,
            emoji,
            builder: IncomingEventBuilder::new(
                config.adapter.adapter_type.as_str(),
                config.adapter.adapter_name.as_str(),
                config.adapter.adapter_id.as_str(),
            ),
            capabilities,
            max_history_limit: config.adapter.max_history_limit,
        }
    }

    pub fn event_builder(&self) -> &IncomingEventBuilder {
        &self.builder
    }

    /// Process one platform event into the bot_request events to emit, in
    /// emission order.
    pub async fn process_event(&self, event: RawEvent) -> Vec<BotRequest> {
        match event {
            RawEvent::NewMessage(message) => self.handle_new_message(message).await,
            RawEvent::EditedMessage(message) => self.handle_edited_message(message).await,
            RawEvent::DeletedMessages {
                platform_conversation_id,
                message_ids,
            } => {
                let delta = self
                    .manager
                    .delete_from_conversation(DeleteCtx {
                        platform_conversation_id,
                        message_ids,
                    })
                    .await;
                self.delta_events(delta, None).await
            }
            RawEvent::ReactionChange {
                platform_conversation_id,
                message_id,
                user_id,
                added,
                removed,
            } => {
                let delta = self
                    .manager
                    .reaction_change(ReactionCtx {
                        platform_conversation_id,
                        message_id,
                        user_id,
                        added: added.iter().map(|e| self.emoji.to_standard(e)).collect(),
                        removed: removed.iter().map(|e| self.emoji.to_standard(e)).collect(),
                    })
                    .await;
                self.delta_events(delta, None).await
            }
            RawEvent::PinChange {
                platform_conversation_id,
                message_id,
                pinned,
            } => {
                let delta = self
                    .manager
                    .pin_change(PinCtx {
                        platform_conversation_id,
                        message_id,
                        pinned,
                    })
                    .await;
                self.delta_events(delta, None).await
            }
            RawEvent::ConversationRenamed {
                platform_conversation_id,
                conversation_name,
                server_id,
                server_name,
            } => {
                let delta = self
                    .manager
                    .rename_conversation(RenameCtx {
                        platform_conversation_id,
                        conversation_name,
                        server_id,
                        server_name,
                    })
                    .await;
                self.delta_events(delta, None).await
            }
        }
    }

    async fn handle_new_message(&self, mut message: RawMessage) -> Vec<BotRequest> {
        self.preprocess(&mut message);
        let conversation_id = self.manager.canonical_id(&message.platform_conversation_id);
        let attachments = if message.attachments.is_empty() {
            Vec::new()
        } else {
            self.downloader
                .process_attachments(&conversation_id, &message)
                .await
        };

        let trigger = (message.message_id.clone(), message.timestamp_ms);
        let delta = self
            .manager
            .add_to_conversation(NewMessageCtx {
                message,
                attachments,
                history_backfill: false,
            })
            .await;
        self.delta_events(delta, Some(trigger)).await
    }

    async fn handle_edited_message(&self, mut message: RawMessage) -> Vec<BotRequest> {
        self.preprocess(&mut message);
        let conversation_id = self.manager.canonical_id(&message.platform_conversation_id);
        let attachments = if self.capabilities.attachments_on_edit && !message.attachments.is_empty()
        {
            self.downloader
                .process_attachments(&conversation_id, &message)
                .await
        } else {
            Vec::new()
        };

        let delta = self
            .manager
            .update_conversation(UpdateCtx {
                message,
                attachments,
            })
            .await;
        self.delta_events(delta, None).await
    }

    /// Preprocessing shared by new and edited messages: user cache upkeep,
    /// mention normalization to `<@display_name>`, and reaction names to
    /// standard shortcodes.
    fn preprocess(&self, message: &mut RawMessage) {
        if !message.sender.user_id.is_empty() {
            self.user_cache.upsert(UserInfo {
                user_id: message.sender.user_id.clone(),
                display_name: message.sender.display_name.clone(),
                username: message.sender.username.clone(),
                is_bot: message.sender.is_bot,
                last_seen: Utc::now(),
            });
        }

        let mut normalized = Vec::with_capacity(message.mentions.len());
        for mention in &message.mentions {
            if mention == "all" {
                normalized.push("all".to_string());
                continue;
            }
            let display = self
                .user_cache
                .get(mention)
                .map(|u| u.mention_name().to_string())
                .unwrap_or_else(|| mention.clone());
            if let Some(text) = message.text.as_mut() {
                *text = text.replace(
                    &format!("<@{}>", mention),
                    &format!("<@{}>", display),
                );
            }
            normalized.push(display);
        }
        message.mentions = normalized;

        if let Some(reactions) = message.reactions.take() {
            message.reactions = Some(
                reactions
                    .into_iter()
                    .map(|(emoji, users)| (self.emoji.to_standard(&emoji), users))
                    .collect(),
            );
        }
    }

    /// Convert a delta into ordered bot_request events. For a brand-new
    /// conversation the history is fetched and delivered first, then the
    /// triggering message (the history-first rule).
    async fn delta_events(
        &self,
        delta: ConversationDelta,
        trigger: Option<(String, i64)>,
    ) -> Vec<BotRequest> {
        let mut events = Vec::new();
        if delta.is_empty() {
            return events;
        }

        if delta.fetch_history {
            let (exclude, before) = match &trigger {
                Some((id, ts)) => (Some(id.clone()), Some(*ts)),
                None => (None, Some(Utc::now().timestamp_millis())),
            };
            let history = self
                .history
                .fetch(HistoryRequest {
                    conversation_id: delta.conversation_id.clone(),
                    before,
                    after: None,
                    limit: Some(self.max_history_limit),
                    exclude_message_id: exclude,
                })
                .await;
            events.push(
                self.builder
                    .conversation_started(&delta.conversation_id, &history),
            );
        }

        for message in &delta.added_messages {
            events.push(self.builder.message_received(message));
        }
        for message in &delta.updated_messages {
            events.push(self.builder.message_updated(message));
        }
        for message_id in &delta.deleted_message_ids {
            events.push(
                self.builder
                    .message_deleted(message_id, &delta.conversation_id),
            );
        }
        for reaction in &delta.added_reactions {
            events.push(self.builder.reaction_update(
                IncomingEventType::ReactionAdded,
                &delta.conversation_id,
                reaction,
            ));
        }
        for reaction in &delta.removed_reactions {
            events.push(self.builder.reaction_update(
                IncomingEventType::ReactionRemoved,
                &delta.conversation_id,
                reaction,
            ));
        }
        for message_id in &delta.pinned_message_ids {
            events.push(self.builder.pin_status_update(
                IncomingEventType::MessagePinned,
                &delta.conversation_id,
                message_id,
            ));
        }
        for message_id in &delta.unpinned_message_ids {
            events.push(self.builder.pin_status_update(
                IncomingEventType::MessageUnpinned,
                &delta.conversation_id,
                message_id,
            ));
        }
        if delta.renamed {
            events.push(self.builder.conversation_updated(
                &delta.conversation_id,
                delta.conversation_name.as_deref(),
                delta.server_name.as_deref(),
            ));
        }
        events
    }
}
