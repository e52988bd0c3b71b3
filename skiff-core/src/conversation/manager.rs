// ABOUTME: Authoritative in-memory state of conversations, threads, and their messages
// ABOUTME: All mutation happens under a per-conversation striped lock; deltas describe what changed

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use tokio::sync::Mutex;

use crate::cache::attachment::AttachmentCache;
use crate::cache::message::{CachedMessage, MessageCache, MessageOrigin};
use crate::cache::user::UserCache;
use crate::config::Config;
use crate::conversation::builder::{framework_message, MessageBuilder};
use crate::conversation::delta::{ConversationDelta, ReactionDelta};
use crate::conversation::threads::ThreadTracker;
use crate::conversation::types::ConversationInfo;
use crate::events::incoming::{AttachmentPayload, MessagePayload, SenderInfo};
use crate::ids;
use crate::traits::RawMessage;

/// A new platform message, with its attachments already downloaded.
#[derive(Debug)]
pub struct NewMessageCtx {
    pub message: RawMessage,
    pub attachments: Vec<AttachmentPayload>,
    /// True while backfilling fetched history into the caches
    pub history_backfill: bool,
}

/// A platform-merged update event: may carry a text edit, reaction state,
/// pin state, or any combination.
#[derive(Debug)]
pub struct UpdateCtx {
    pub message: RawMessage,
    pub attachments: Vec<AttachmentPayload>,
}

#[derive(Debug)]
pub struct DeleteCtx {
    pub platform_conversation_id: String,
    pub message_ids: Vec<String>,
}

#[derive(Debug)]
pub struct PinCtx {
    pub platform_conversation_id: String,
    pub message_id: String,
    pub pinned: bool,
}

#[derive(Debug)]
pub struct RenameCtx {
    pub platform_conversation_id: String,
    pub conversation_name: Option<String>,
    pub server_id: Option<String>,
    pub server_name: Option<String>,
}

/// Per-user reaction diff from a dedicated platform reaction event.
#[derive(Debug)]
pub struct ReactionCtx {
    pub platform_conversation_id: String,
    pub message_id: String,
    pub user_id: Option<String>,
    /// Standard shortcodes
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Messages moving to a different conversation (topic moves, group upgrades).
#[derive(Debug)]
pub struct MigrateCtx {
    pub old_platform_conversation_id: String,
    /// Template message carrying the new conversation's identity
    pub message: RawMessage,
    pub message_ids: Vec<String>,
}

/// The single authority over conversation state.
///
/// Every mutating entry point serializes on a striped per-conversation lock,
/// so incoming events for one conversation apply in arrival order while
/// distinct conversations proceed independently. All other components only
/// read through the snapshot accessors.
pub struct ConversationManager {
    adapter_type: String,
    filter_self_reactions: bool,
    bot_user_id: RwLock<String>,
    conversations: RwLock<HashMap<String, ConversationInfo>>,
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    message_cache: Arc<MessageCache>,
    attachment_cache: Arc<AttachmentCache>,
    user_cache: Arc<UserCache>,
}

impl ConversationManager {
    pub fn new(
        config: &Config,
        message_cache: Arc<MessageCache>,
        attachment_cache: Arc<AttachmentCache>,
        user_cache: Arc<UserCache>,
    ) -> Self {
        Self {
            adapter_type: config.adapter.adapter_type.clone(),
            filter_self_reactions: config.adapter.filter_self_reactions,
            bot_user_id: RwLock::new(String::new()),
            conversations: RwLock::new(HashMap::new()),
            locks: StdMutex::new(HashMap::new()),
            message_cache,
            attachment_cache,
            user_cache,
        }
    }

    /// Record the adapter's own platform identity once connected.
    pub fn set_bot_user_id(&self, user_id: &str) {
        *self.bot_user_id.write().unwrap() = user_id.to_string();
    }

    pub fn bot_user_id(&self) -> String {
        self.bot_user_id.read().unwrap().clone()
    }

    pub fn message_cache(&self) -> &Arc<MessageCache> {
        &self.message_cache
    }

    pub fn attachment_cache(&self) -> &Arc<AttachmentCache> {
        &self.attachment_cache
    }

    /// The canonical id exchanged with the framework for a platform id.
    pub fn canonical_id(&self, platform_conversation_id: &str) -> String {
        ids::conversation_id(&self.adapter_type, platform_conversation_id)
    }

    pub fn get_conversation(&self, conversation_id: &str) -> Option<ConversationInfo> {
        self.conversations
            .read()
            .unwrap()
            .get(conversation_id)
            .cloned()
    }

    pub fn conversation_exists(&self, conversation_id: &str) -> bool {
        self.conversations
            .read()
            .unwrap()
            .contains_key(conversation_id)
    }

    /// Create a new conversation or add a message to an existing one.
    pub async fn add_to_conversation(&self, ctx: NewMessageCtx) -> ConversationDelta {
        let NewMessageCtx {
            message,
            attachments,
            history_backfill,
        } = ctx;
        if message.platform_conversation_id.is_empty() || message.message_id.is_empty() {
            return ConversationDelta::default();
        }

        let conversation_id = self.canonical_id(&message.platform_conversation_id);
        let _guard = self.lock_conversation(&conversation_id).await;

        // 1. Resolve or create the conversation.
        self.ensure_conversation(&conversation_id, &message);

        // 2. Locate or register the message's thread.
        let replied = message
            .reply_to_message_id
            .as_deref()
            .and_then(|id| self.message_cache.get(&conversation_id, id));
        let thread_id = self.with_conversation_mut(&conversation_id, |conv| {
            ThreadTracker::register(conv, &message, replied.as_ref())
        });

        // 3. Build the cached message.
        let mut builder =
            MessageBuilder::from_raw(&message, &conversation_id).with_thread(thread_id.flatten());
        if let Some(user) = self.user_cache.get(&message.sender.user_id) {
            builder = builder.with_sender(&user);
        }
        let cached = builder
            .with_attachment_ids(attachments.iter().map(|a| a.attachment_id.clone()))
            .build();

        // 4 happened upstream: attachments are downloaded before this call.
        // 5. Insert and refresh conversation bookkeeping.
        let inserted = self.message_cache.insert(cached.clone());

        let mut delta = self
            .with_conversation_mut(&conversation_id, |conv| {
                conv.touch();
                conv.known_members.insert(cached.sender_id.clone());
                for attachment in &attachments {
                    conv.attachments.insert(attachment.attachment_id.clone());
                }
                if cached.is_pinned {
                    conv.pinned_messages.insert(cached.message_id.clone());
                }
                if conv.server_id.is_none() && message.server_id.is_some() {
                    conv.server_id = message.server_id.clone();
                    conv.server_name = message.server_name.clone();
                }
                if conv.conversation_name.is_none() {
                    conv.conversation_name = message
                        .conversation_name
                        .clone()
                        .or_else(|| self.direct_conversation_name(conv));
                }
                self.new_delta(conv, history_backfill)
            })
            .unwrap_or_default();
        delta.message_id = Some(cached.message_id.clone());

        // 6. Describe what changed. Re-delivery of a known message reports
        // nothing; framework-origin messages stay silent outside backfill.
        if !inserted {
            return ConversationDelta::for_conversation(conversation_id.as_str());
        }
        let has_content = cached.text.as_deref().is_some_and(|t| !t.is_empty())
            || !attachments.is_empty();
        if has_content && (history_backfill || !cached.is_from_framework()) {
            let mentions = if history_backfill {
                Vec::new()
            } else {
                cached.mentions.clone()
            };
            delta
                .added_messages
                .push(self.payload_for(&cached, attachments, mentions));
        }
        delta
    }

    /// Apply a platform-merged update: diffs the incoming state against the
    /// cached message and synthesizes distinct edit/reaction/pin deltas.
    pub async fn update_conversation(&self, ctx: UpdateCtx) -> ConversationDelta {
        let UpdateCtx {
            message,
            attachments,
        } = ctx;
        let conversation_id = self.canonical_id(&message.platform_conversation_id);
        if !self.conversation_exists(&conversation_id) {
            return ConversationDelta::default();
        }
        let _guard = self.lock_conversation(&conversation_id).await;

        let Some(existing) = self.message_cache.get(&conversation_id, &message.message_id) else {
            return ConversationDelta::default();
        };

        let mut delta = self
            .with_conversation_mut(&conversation_id, |conv| self.new_delta(conv, false))
            .unwrap_or_default();
        delta.message_id = Some(message.message_id.clone());
        let suppress = existing.is_from_framework();

        // Text edit
        let text_changed = message.text.is_some() && message.text != existing.text;
        let attachments_added = !attachments.is_empty();
        if text_changed || attachments_added {
            let edit_timestamp = message
                .edit_timestamp_ms
                .unwrap_or_else(|| Utc::now().timestamp_millis());
            let updated = self.message_cache.update(
                &conversation_id,
                &message.message_id,
                |cached| {
                    if text_changed {
                        cached.text = message.text.clone();
                        cached.edited = true;
                        cached.edit_timestamp_ms = Some(edit_timestamp);
                        if !message.mentions.is_empty() {
                            cached.mentions = message.mentions.clone();
                        }
                    }
                    cached
                        .attachments
                        .extend(attachments.iter().map(|a| a.attachment_id.clone()));
                },
            );
            if attachments_added {
                self.with_conversation_mut(&conversation_id, |conv| {
                    for attachment in &attachments {
                        conv.attachments.insert(attachment.attachment_id.clone());
                    }
                });
            }
            if let Some(updated) = updated {
                if !suppress {
                    let mentions = updated.mentions.clone();
                    delta
                        .updated_messages
                        .push(self.payload_for(&updated, attachments, mentions));
                }
            }
        }

        // Reaction diff, only when the event carried reaction state
        if let Some(new_reactions) = &message.reactions {
            let (added, removed) =
                diff_reactions(&message.message_id, &existing.reactions, new_reactions);
            self.message_cache
                .update(&conversation_id, &message.message_id, |cached| {
                    cached.reactions = new_reactions.clone();
                });
            if !suppress {
                let bot_user_id = self.bot_user_id();
                let keep = |r: &ReactionDelta| {
                    !(self.filter_self_reactions
                        && !bot_user_id.is_empty()
                        && r.user_id.as_deref() == Some(bot_user_id.as_str()))
                };
                delta.added_reactions = added.into_iter().filter(|r| keep(r)).collect();
                delta.removed_reactions = removed.into_iter().filter(|r| keep(r)).collect();
            }
        }

        // Pin state folded into the update
        if let Some(pinned) = message.pinned {
            if pinned != existing.is_pinned {
                self.apply_pin_state(&conversation_id, &message.message_id, pinned);
                if !suppress {
                    if pinned {
                        delta.pinned_message_ids.push(message.message_id.clone());
                    } else {
                        delta.unpinned_message_ids.push(message.message_id.clone());
                    }
                }
            }
        }

        delta
    }

    /// Handle message deletion. Unknown conversations or message ids
    /// produce an empty delta, never an error.
    pub async fn delete_from_conversation(&self, ctx: DeleteCtx) -> ConversationDelta {
        let conversation_id = self.canonical_id(&ctx.platform_conversation_id);
        if !self.conversation_exists(&conversation_id) {
            return ConversationDelta::default();
        }
        let _guard = self.lock_conversation(&conversation_id).await;

        let mut delta = self
            .with_conversation_mut(&conversation_id, |conv| self.new_delta(conv, false))
            .unwrap_or_default();

        for message_id in &ctx.message_ids {
            let Some(cached) = self.message_cache.get(&conversation_id, message_id) else {
                continue;
            };
            self.with_conversation_mut(&conversation_id, |conv| {
                ThreadTracker::unregister(conv, &cached);
                conv.pinned_messages.remove(message_id);
            });
            self.message_cache.remove(&conversation_id, message_id);
            if !cached.is_from_framework() {
                delta.deleted_message_ids.push(message_id.clone());
            }
        }
        delta
    }

    /// Apply a per-user reaction diff from a dedicated reaction event.
    pub async fn reaction_change(&self, ctx: ReactionCtx) -> ConversationDelta {
        let conversation_id = self.canonical_id(&ctx.platform_conversation_id);
        if !self.conversation_exists(&conversation_id) {
            return ConversationDelta::default();
        }
        let _guard = self.lock_conversation(&conversation_id).await;

        let Some(existing) = self.message_cache.get(&conversation_id, &ctx.message_id) else {
            return ConversationDelta::default();
        };

        self.message_cache
            .update(&conversation_id, &ctx.message_id, |cached| {
                for emoji in &ctx.added {
                    let users = cached.reactions.entry(emoji.clone()).or_default();
                    if let Some(user) = &ctx.user_id {
                        users.insert(user.clone());
                    }
                }
                for emoji in &ctx.removed {
                    if let Some(users) = cached.reactions.get_mut(emoji) {
                        if let Some(user) = &ctx.user_id {
                            users.remove(user);
                        }
                        if users.is_empty() {
                            cached.reactions.remove(emoji);
                        }
                    }
                }
            });

        let mut delta = self
            .with_conversation_mut(&conversation_id, |conv| self.new_delta(conv, false))
            .unwrap_or_default();
        delta.message_id = Some(ctx.message_id.clone());

        if existing.is_from_framework() {
            return delta;
        }
        let bot_user_id = self.bot_user_id();
        if self.filter_self_reactions
            && !bot_user_id.is_empty()
            && ctx.user_id.as_deref() == Some(bot_user_id.as_str())
        {
            return delta;
        }
        for emoji in ctx.added {
            delta.added_reactions.push(ReactionDelta {
                message_id: ctx.message_id.clone(),
                emoji,
                user_id: ctx.user_id.clone(),
            });
        }
        for emoji in ctx.removed {
            delta.removed_reactions.push(ReactionDelta {
                message_id: ctx.message_id.clone(),
                emoji,
                user_id: ctx.user_id.clone(),
            });
        }
        delta
    }

    /// Standalone pin/unpin event (platforms that signal pins separately).
    pub async fn pin_change(&self, ctx: PinCtx) -> ConversationDelta {
        let conversation_id = self.canonical_id(&ctx.platform_conversation_id);
        if !self.conversation_exists(&conversation_id) {
            return ConversationDelta::default();
        }
        let _guard = self.lock_conversation(&conversation_id).await;

        let cached = self.message_cache.get(&conversation_id, &ctx.message_id);
        let already = cached
            .as_ref()
            .map(|c| c.is_pinned)
            .unwrap_or_else(|| {
                self.get_conversation(&conversation_id)
                    .map(|c| c.pinned_messages.contains(&ctx.message_id))
                    .unwrap_or(false)
            });

        let mut delta = self
            .with_conversation_mut(&conversation_id, |conv| self.new_delta(conv, false))
            .unwrap_or_default();
        delta.message_id = Some(ctx.message_id.clone());

        if already == ctx.pinned {
            return delta;
        }
        self.apply_pin_state(&conversation_id, &ctx.message_id, ctx.pinned);

        if cached.is_some_and(|c| c.is_from_framework()) {
            return delta;
        }
        if ctx.pinned {
            delta.pinned_message_ids.push(ctx.message_id.clone());
        } else {
            delta.unpinned_message_ids.push(ctx.message_id.clone());
        }
        delta
    }

    /// Conversation or server rename.
    pub async fn rename_conversation(&self, ctx: RenameCtx) -> ConversationDelta {
        let conversation_id = self.canonical_id(&ctx.platform_conversation_id);
        if !self.conversation_exists(&conversation_id) {
            return ConversationDelta::default();
        }
        let _guard = self.lock_conversation(&conversation_id).await;

        self.with_conversation_mut(&conversation_id, |conv| {
            let mut changed = false;
            if let Some(name) = &ctx.conversation_name {
                if conv.conversation_name.as_deref() != Some(name) {
                    conv.conversation_name = Some(name.clone());
                    changed = true;
                }
            }
            if let Some(server_name) = &ctx.server_name {
                let same_server =
                    ctx.server_id.is_none() || conv.server_id == ctx.server_id;
                if same_server && conv.server_name.as_deref() != Some(server_name) {
                    conv.server_name = Some(server_name.clone());
                    changed = true;
                }
            }
            let mut delta = self.new_delta(conv, false);
            delta.renamed = changed;
            delta
        })
        .unwrap_or_default()
    }

    /// Move cached messages to another conversation (topic moves, group
    /// upgrades). Returns the delta for the old conversation (deletions)
    /// and for the new one (additions, possibly a conversation start).
    pub async fn migrate_between_conversations(
        &self,
        ctx: MigrateCtx,
    ) -> (ConversationDelta, ConversationDelta) {
        let old_id = self.canonical_id(&ctx.old_platform_conversation_id);
        let new_id = self.canonical_id(&ctx.message.platform_conversation_id);
        if old_id == new_id || !self.conversation_exists(&old_id) {
            return (ConversationDelta::default(), ConversationDelta::default());
        }

        // Lock both conversations in a stable order.
        let (first, second) = if old_id < new_id {
            (old_id.clone(), new_id.clone())
        } else {
            (new_id.clone(), old_id.clone())
        };
        let _first = self.lock_conversation(&first).await;
        let _second = self.lock_conversation(&second).await;

        self.ensure_conversation(&new_id, &ctx.message);

        let mut old_delta = self
            .with_conversation_mut(&old_id, |conv| self.new_delta(conv, false))
            .unwrap_or_default();
        let mut new_delta = self
            .with_conversation_mut(&new_id, |conv| self.new_delta(conv, false))
            .unwrap_or_default();

        for message_id in &ctx.message_ids {
            let Some(cached) = self.message_cache.get(&old_id, message_id) else {
                continue;
            };
            self.with_conversation_mut(&old_id, |conv| {
                ThreadTracker::unregister(conv, &cached);
                conv.pinned_messages.remove(message_id);
            });
            if !self.message_cache.migrate(&old_id, &new_id, message_id) {
                continue;
            }
            self.with_conversation_mut(&new_id, |conv| {
                conv.touch();
                conv.known_members.insert(cached.sender_id.clone());
            });
            if !cached.is_from_framework() {
                old_delta.deleted_message_ids.push(message_id.clone());
                if let Some(moved) = self.message_cache.get(&new_id, message_id) {
                    let attachments = self.attachment_payloads(&moved);
                    let mentions = moved.mentions.clone();
                    new_delta
                        .added_messages
                        .push(self.payload_for(&moved, attachments, mentions));
                }
            }
        }
        (old_delta, new_delta)
    }

    /// Record messages the framework sent on a platform that does not echo
    /// them back, so later edits and deletes resolve.
    pub async fn record_outgoing_messages(
        &self,
        conversation_id: &str,
        entries: &[(String, String)],
        thread_id: Option<String>,
    ) {
        let Some(conversation) = self.get_conversation(conversation_id) else {
            return;
        };
        let _guard = self.lock_conversation(conversation_id).await;
        let bot_user_id = self.bot_user_id();
        let now_ms = Utc::now().timestamp_millis();
        for (message_id, text) in entries {
            let message = framework_message(
                conversation_id,
                message_id,
                text,
                thread_id.clone(),
                &bot_user_id,
                conversation.is_direct(),
                now_ms,
            );
            self.message_cache.insert(message);
        }
        self.with_conversation_mut(conversation_id, |conv| conv.touch());
    }

    /// Keep the cache consistent after a framework-initiated edit on a
    /// platform without self-echo.
    pub async fn apply_framework_edit(&self, conversation_id: &str, message_id: &str, text: &str) {
        let _guard = self.lock_conversation(conversation_id).await;
        self.message_cache.update(conversation_id, message_id, |m| {
            m.text = Some(text.to_string());
            m.edited = true;
            m.edit_timestamp_ms = Some(Utc::now().timestamp_millis());
        });
    }

    pub async fn apply_framework_delete(&self, conversation_id: &str, message_id: &str) {
        let _guard = self.lock_conversation(conversation_id).await;
        if let Some(cached) = self.message_cache.get(conversation_id, message_id) {
            self.with_conversation_mut(conversation_id, |conv| {
                ThreadTracker::unregister(conv, &cached);
                conv.pinned_messages.remove(message_id);
            });
            self.message_cache.remove(conversation_id, message_id);
        }
    }

    pub async fn apply_framework_pin(&self, conversation_id: &str, message_id: &str, pinned: bool) {
        let _guard = self.lock_conversation(conversation_id).await;
        self.apply_pin_state(conversation_id, message_id, pinned);
    }

    /// Wire-shaped snapshot of a conversation's cached messages, oldest
    /// first, attachment content never inlined. Used by the history fetcher.
    pub fn conversation_payloads(&self, conversation_id: &str) -> Vec<MessagePayload> {
        self.message_cache
            .conversation_messages(conversation_id)
            .into_iter()
            .filter(|m| {
                m.text.as_deref().is_some_and(|t| !t.is_empty()) || !m.attachments.is_empty()
            })
            .map(|m| {
                let attachments = self.attachment_payloads(&m);
                self.payload_for(&m, attachments, Vec::new())
            })
            .collect()
    }

    /// Wire form of a raw message without caching it (history served
    /// straight from the platform when `cache_fetched_history` is off).
    pub fn payload_from_raw(&self, raw: &RawMessage) -> MessagePayload {
        let conversation_id = self.canonical_id(&raw.platform_conversation_id);
        let cached = MessageBuilder::from_raw(raw, &conversation_id).build();
        self.payload_for(&cached, Vec::new(), Vec::new())
    }

    fn attachment_payloads(&self, message: &CachedMessage) -> Vec<AttachmentPayload> {
        message
            .attachments
            .iter()
            .filter_map(|id| self.attachment_cache.get(id))
            .map(|a| AttachmentPayload {
                attachment_id: a.attachment_id,
                attachment_type: a.attachment_type,
                file_extension: a.file_extension,
                size: a.size,
                processable: a.processable,
                content: None,
            })
            .collect()
    }

    fn payload_for(
        &self,
        cached: &CachedMessage,
        attachments: Vec<AttachmentPayload>,
        mentions: Vec<String>,
    ) -> MessagePayload {
        MessagePayload {
            message_id: cached.message_id.clone(),
            conversation_id: cached.conversation_id.clone(),
            sender: SenderInfo {
                user_id: cached.sender_id.clone(),
                display_name: cached.sender_name.clone(),
            },
            text: cached.text.clone().unwrap_or_default(),
            thread_id: cached.thread_id.clone(),
            is_direct_message: cached.is_direct_message,
            timestamp: cached.timestamp_ms,
            edit_timestamp: cached.edit_timestamp_ms,
            edited: cached.edited,
            attachments,
            mentions,
        }
    }

    fn ensure_conversation(&self, conversation_id: &str, message: &RawMessage) -> bool {
        let mut conversations = self.conversations.write().unwrap();
        if conversations.contains_key(conversation_id) {
            return false;
        }
        let mut conversation = ConversationInfo::new(
            conversation_id,
            message.platform_conversation_id.as_str(),
            message.conversation_kind,
        );
        conversation.conversation_name = message.conversation_name.clone();
        conversation.server_id = message.server_id.clone();
        conversation.server_name = message.server_name.clone();
        conversations.insert(conversation_id.to_string(), conversation);
        tracing::info!(conversation_id, "Tracking new conversation");
        true
    }

    /// Delta pre-filled with conversation metadata; consumes `just_started`.
    fn new_delta(&self, conversation: &mut ConversationInfo, backfill: bool) -> ConversationDelta {
        let mut delta = ConversationDelta::for_conversation(conversation.conversation_id.as_str());
        delta.conversation_name = conversation.conversation_name.clone();
        delta.server_name = conversation.server_name.clone();
        delta.history_backfill = backfill;
        if conversation.just_started {
            delta.fetch_history = true;
            conversation.just_started = false;
        }
        delta
    }

    fn direct_conversation_name(&self, conversation: &ConversationInfo) -> Option<String> {
        if !conversation.is_direct() {
            return None;
        }
        let mut name = String::from("DM");
        let mut members: Vec<&String> = conversation.known_members.iter().collect();
        members.sort();
        for member in members {
            if let Some(user) = self.user_cache.get(member) {
                if user.is_bot {
                    continue;
                }
                name.push('_');
                name.push_str(&user.mention_name().replace(' ', "_"));
            }
        }
        Some(name)
    }

    fn apply_pin_state(&self, conversation_id: &str, message_id: &str, pinned: bool) {
        self.message_cache
            .update(conversation_id, message_id, |m| m.is_pinned = pinned);
        self.with_conversation_mut(conversation_id, |conv| {
            if pinned {
                conv.pinned_messages.insert(message_id.to_string());
            } else {
                conv.pinned_messages.remove(message_id);
            }
        });
    }

    fn with_conversation_mut<T>(
        &self,
        conversation_id: &str,
        f: impl FnOnce(&mut ConversationInfo) -> T,
    ) -> Option<T> {
        let mut conversations = self.conversations.write().unwrap();
        conversations.get_mut(conversation_id).map(f)
    }

    async fn lock_conversation(&self, conversation_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let slot = {
            let mut locks = self.locks.lock().unwrap();
            locks
                .entry(conversation_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }
}

fn diff_reactions(
    message_id: &str,
    old: &HashMap<String, HashSet<String>>,
    new: &HashMap<String, HashSet<String>>,
) -> (Vec<ReactionDelta>, Vec<ReactionDelta>) {
    let mut added = Vec::new();
    let mut removed = Vec::new();

    for (emoji, users) in new {
        match old.get(emoji) {
            None if users.is_empty() => added.push(ReactionDelta {
                message_id: message_id.to_string(),
                emoji: emoji.clone(),
                user_id: None,
            }),
            None => {
                for user in users {
                    added.push(ReactionDelta {
                        message_id: message_id.to_string(),
                        emoji: emoji.clone(),
                        user_id: Some(user.clone()),
                    });
                }
            }
            Some(old_users) => {
                for user in users.difference(old_users) {
                    added.push(ReactionDelta {
                        message_id: message_id.to_string(),
                        emoji: emoji.clone(),
                        user_id: Some(user.clone()),
                    });
                }
            }
        }
    }

    for (emoji, old_users) in old {
        match new.get(emoji) {
            None if old_users.is_empty() => removed.push(ReactionDelta {
                message_id: message_id.to_string(),
                emoji: emoji.clone(),
                user_id: None,
            }),
            None => {
                for user in old_users {
                    removed.push(ReactionDelta {
                        message_id: message_id.to_string(),
                        emoji: emoji.clone(),
                        user_id: Some(user.clone()),
                    });
                }
            }
            Some(new_users) => {
                for user in old_users.difference(new_users) {
                    removed.push(ReactionDelta {
                        message_id: message_id.to_string(),
                        emoji: emoji.clone(),
                        user_id: Some(user.clone()),
                    });
                }
            }
        }
    }

    (added, removed)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ConversationManager {
        let config = Config::from_toml(
            r#"
            [adapter]
            adapter_type = "mock"

            [caching]

            [attachments]
            storage_dir = "/tmp/skiff-test-attachments"

            [rate_limit]

            [event_bus]
        "#,
        )
        .unwrap();
        let message_cache = Arc::new(MessageCache::new(&config.caching));
        let attachment_cache = Arc::new(AttachmentCache::new(&config.attachments));
        let user_cache = Arc::new(UserCache::new(&config.caching));
        let manager =
            ConversationManager::new(&config, message_cache, attachment_cache, user_cache);
        manager.set_bot_user_id("bot-self");
        manager
    }

    fn new_ctx(message: RawMessage) -> NewMessageCtx {
        NewMessageCtx {
            message,
            attachments: Vec::new(),
            history_backfill: false,
        }
    }

    #[tokio::test]
    async fn test_first_message_starts_conversation() {
        let manager = manager();
        let delta = manager
            .add_to_conversation(new_ctx(RawMessage::text_message("g/c", "m1", "u1", "hi", 1000)))
            .await;

        assert!(delta.fetch_history);
        assert_eq!(delta.added_messages.len(), 1);
        assert_eq!(delta.added_messages[0].text, "hi");

        let conversation = manager.get_conversation(&delta.conversation_id).unwrap();
        assert!(!conversation.just_started);
        assert_eq!(conversation.platform_conversation_id, "g/c");
        assert!(conversation.known_members.contains("u1"));
    }

    #[tokio::test]
    async fn test_second_message_does_not_restart() {
        let manager = manager();
        manager
            .add_to_conversation(new_ctx(RawMessage::text_message("g/c", "m1", "u1", "hi", 1000)))
            .await;
        let delta = manager
            .add_to_conversation(new_ctx(RawMessage::text_message("g/c", "m2", "u2", "yo", 2000)))
            .await;
        assert!(!delta.fetch_history);
        assert_eq!(delta.added_messages.len(), 1);
    }

    #[tokio::test]
    async fn test_redelivery_produces_empty_delta() {
        let manager = manager();
        manager
            .add_to_conversation(new_ctx(RawMessage::text_message("g/c", "m1", "u1", "hi", 1000)))
            .await;
        let delta = manager
            .add_to_conversation(new_ctx(RawMessage::text_message("g/c", "m1", "u1", "hi", 1000)))
            .await;
        assert!(delta.is_empty(), "re-delivered event must yield an empty delta");
    }

    #[tokio::test]
    async fn test_self_message_cached_but_silent() {
        let manager = manager();
        let mut echo = RawMessage::text_message("g/c", "m1", "bot-self", "posted by us", 1000);
        echo.from_self = true;
        let delta = manager.add_to_conversation(new_ctx(echo)).await;

        assert!(delta.added_messages.is_empty());
        let cached = manager
            .message_cache()
            .get(&delta.conversation_id, "m1")
            .unwrap();
        assert_eq!(cached.origin, MessageOrigin::Framework);
    }

    #[tokio::test]
    async fn test_backfill_includes_self_messages() {
        let manager = manager();
        manager
            .add_to_conversation(new_ctx(RawMessage::text_message("g/c", "m0", "u1", "hi", 500)))
            .await;
        let mut echo = RawMessage::text_message("g/c", "m1", "bot-self", "ours", 1000);
        echo.from_self = true;
        let delta = manager
            .add_to_conversation(NewMessageCtx {
                message: echo,
                attachments: Vec::new(),
                history_backfill: true,
            })
            .await;
        assert_eq!(delta.added_messages.len(), 1);
    }

    #[tokio::test]
    async fn test_edit_produces_updated_message() {
        let manager = manager();
        let delta = manager
            .add_to_conversation(new_ctx(RawMessage::text_message("g/c", "m1", "u1", "hi", 1000)))
            .await;

        let mut edit = RawMessage::text_message("g/c", "m1", "u1", "hello there", 1000);
        edit.edit_timestamp_ms = Some(2000);
        let update = manager
            .update_conversation(UpdateCtx {
                message: edit,
                attachments: Vec::new(),
            })
            .await;

        assert_eq!(update.updated_messages.len(), 1);
        assert_eq!(update.updated_messages[0].text, "hello there");
        assert_eq!(update.updated_messages[0].edit_timestamp, Some(2000));
        let cached = manager.message_cache().get(&delta.conversation_id, "m1").unwrap();
        assert!(cached.edited);
    }

    #[tokio::test]
    async fn test_merged_update_synthesizes_reactions() {
        let manager = manager();
        manager
            .add_to_conversation(new_ctx(RawMessage::text_message("g/c", "m1", "u1", "hi", 1000)))
            .await;

        // Same text, new reaction state: this is a reaction, not an edit
        let mut update = RawMessage::text_message("g/c", "m1", "u1", "hi", 1000);
        update.reactions = Some(HashMap::from([(
            "+1".to_string(),
            HashSet::from(["u2".to_string()]),
        )]));
        let delta = manager
            .update_conversation(UpdateCtx {
                message: update,
                attachments: Vec::new(),
            })
            .await;

        assert!(delta.updated_messages.is_empty());
        assert_eq!(delta.added_reactions.len(), 1);
        assert_eq!(delta.added_reactions[0].emoji, "+1");
        assert_eq!(delta.added_reactions[0].user_id.as_deref(), Some("u2"));

        // Reaction withdrawn
        let mut update = RawMessage::text_message("g/c", "m1", "u1", "hi", 1000);
        update.reactions = Some(HashMap::new());
        let delta = manager
            .update_conversation(UpdateCtx {
                message: update,
                attachments: Vec::new(),
            })
            .await;
        assert_eq!(delta.removed_reactions.len(), 1);
    }

    #[tokio::test]
    async fn test_bot_reactions_filtered() {
        let manager = manager();
        manager
            .add_to_conversation(new_ctx(RawMessage::text_message("g/c", "m1", "u1", "hi", 1000)))
            .await;

        let mut update = RawMessage::text_message("g/c", "m1", "u1", "hi", 1000);
        update.reactions = Some(HashMap::from([(
            "+1".to_string(),
            HashSet::from(["bot-self".to_string(), "u2".to_string()]),
        )]));
        let delta = manager
            .update_conversation(UpdateCtx {
                message: update,
                attachments: Vec::new(),
            })
            .await;
        assert_eq!(delta.added_reactions.len(), 1);
        assert_eq!(delta.added_reactions[0].user_id.as_deref(), Some("u2"));
    }

    #[tokio::test]
    async fn test_pin_flag_in_update() {
        let manager = manager();
        manager
            .add_to_conversation(new_ctx(RawMessage::text_message("g/c", "m1", "u1", "hi", 1000)))
            .await;

        let mut update = RawMessage::text_message("g/c", "m1", "u1", "hi", 1000);
        update.pinned = Some(true);
        let delta = manager
            .update_conversation(UpdateCtx {
                message: update,
                attachments: Vec::new(),
            })
            .await;
        assert_eq!(delta.pinned_message_ids, vec!["m1"]);

        let conversation = manager.get_conversation(&delta.conversation_id).unwrap();
        assert!(conversation.pinned_messages.contains("m1"));
    }

    #[tokio::test]
    async fn test_delete_unknown_never_fails() {
        let manager = manager();
        let delta = manager
            .delete_from_conversation(DeleteCtx {
                platform_conversation_id: "nowhere".to_string(),
                message_ids: vec!["m1".to_string()],
            })
            .await;
        assert!(delta.is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_everywhere() {
        let manager = manager();
        let mut msg = RawMessage::text_message("g/c", "m1", "u1", "hi", 1000);
        msg.pinned = Some(true);
        let added = manager.add_to_conversation(new_ctx(msg)).await;

        let delta = manager
            .delete_from_conversation(DeleteCtx {
                platform_conversation_id: "g/c".to_string(),
                message_ids: vec!["m1".to_string(), "unknown".to_string()],
            })
            .await;

        assert_eq!(delta.deleted_message_ids, vec!["m1"]);
        assert!(manager.message_cache().get(&added.conversation_id, "m1").is_none());
        let conversation = manager.get_conversation(&added.conversation_id).unwrap();
        assert!(conversation.pinned_messages.is_empty());
    }

    #[tokio::test]
    async fn test_delete_of_framework_message_is_silent() {
        let manager = manager();
        let mut echo = RawMessage::text_message("g/c", "m1", "bot-self", "ours", 1000);
        echo.from_self = true;
        manager.add_to_conversation(new_ctx(echo)).await;

        let delta = manager
            .delete_from_conversation(DeleteCtx {
                platform_conversation_id: "g/c".to_string(),
                message_ids: vec!["m1".to_string()],
            })
            .await;
        assert!(delta.deleted_message_ids.is_empty());
    }

    #[tokio::test]
    async fn test_rename_emits_once() {
        let manager = manager();
        manager
            .add_to_conversation(new_ctx(RawMessage::text_message("g/c", "m1", "u1", "hi", 1000)))
            .await;

        let delta = manager
            .rename_conversation(RenameCtx {
                platform_conversation_id: "g/c".to_string(),
                conversation_name: Some("general".to_string()),
                server_id: None,
                server_name: None,
            })
            .await;
        assert!(delta.renamed);
        assert_eq!(delta.conversation_name.as_deref(), Some("general"));

        // Same name again: nothing changed
        let delta = manager
            .rename_conversation(RenameCtx {
                platform_conversation_id: "g/c".to_string(),
                conversation_name: Some("general".to_string()),
                server_id: None,
                server_name: None,
            })
            .await;
        assert!(!delta.renamed);
    }

    #[tokio::test]
    async fn test_migrate_moves_messages() {
        let manager = manager();
        manager
            .add_to_conversation(new_ctx(RawMessage::text_message("s/old", "m1", "u1", "a", 1000)))
            .await;
        manager
            .add_to_conversation(new_ctx(RawMessage::text_message("s/old", "m2", "u1", "b", 2000)))
            .await;

        let (old_delta, new_delta) = manager
            .migrate_between_conversations(MigrateCtx {
                old_platform_conversation_id: "s/old".to_string(),
                message: RawMessage::text_message("s/new", "m2", "u1", "b", 2000),
                message_ids: vec!["m1".to_string(), "m2".to_string()],
            })
            .await;

        assert_eq!(old_delta.deleted_message_ids.len(), 2);
        assert_eq!(new_delta.added_messages.len(), 2);
        assert!(new_delta.fetch_history, "new conversation should bootstrap");

        let new_id = manager.canonical_id("s/new");
        assert_eq!(manager.message_cache().conversation_messages(&new_id).len(), 2);
        let old_id = manager.canonical_id("s/old");
        assert!(manager.message_cache().conversation_messages(&old_id).is_empty());
    }

    #[tokio::test]
    async fn test_record_outgoing_messages() {
        let manager = manager();
        let delta = manager
            .add_to_conversation(new_ctx(RawMessage::text_message("g/c", "m1", "u1", "hi", 1000)))
            .await;

        manager
            .record_outgoing_messages(
                &delta.conversation_id,
                &[("p1".to_string(), "chunk one".to_string())],
                None,
            )
            .await;
        let cached = manager.message_cache().get(&delta.conversation_id, "p1").unwrap();
        assert!(cached.is_from_framework());
        assert_eq!(cached.sender_id, "bot-self");
    }

    #[tokio::test]
    async fn test_canonical_id_distinct_from_platform_id() {
        let manager = manager();
        let delta = manager
            .add_to_conversation(new_ctx(RawMessage::text_message("g/c", "m1", "u1", "hi", 1000)))
            .await;
        assert_ne!(delta.conversation_id, "g/c");
        let conversation = manager.get_conversation(&delta.conversation_id).unwrap();
        assert_eq!(conversation.platform_conversation_id, "g/c");
    }

    #[test]
    fn test_diff_reactions_anonymous() {
        let old = HashMap::new();
        let new = HashMap::from([("heart".to_string(), HashSet::new())]);
        let (added, removed) = diff_reactions("m1", &old, &new);
        assert_eq!(added.len(), 1);
        assert!(added[0].user_id.is_none());
        assert!(removed.is_empty());
    }
}
