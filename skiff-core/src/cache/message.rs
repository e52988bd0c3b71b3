// ABOUTME: Bounded in-memory message store keyed by conversation then message id
// ABOUTME: Sweeps evict oldest-first by age, per-conversation cap, and global cap

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::CachingConfig;

/// Who produced a message: the platform, or the framework through us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrigin {
    Platform,
    Framework,
}

#[derive(Debug, Clone)]
pub struct CachedMessage {
    pub message_id: String,
    pub conversation_id: String,
    pub thread_id: Option<String>,
    pub reply_to_message_id: Option<String>,
    pub sender_id: String,
    pub sender_name: String,
    pub text: Option<String>,
    pub timestamp_ms: i64,
    pub edit_timestamp_ms: Option<i64>,
    pub edited: bool,
    pub origin: MessageOrigin,
    pub is_direct_message: bool,
    pub is_pinned: bool,
    pub mentions: Vec<String>,
    /// emoji -> reacting user ids
    pub reactions: HashMap<String, HashSet<String>>,
    pub attachments: HashSet<String>,
}

impl CachedMessage {
    pub fn is_from_framework(&self) -> bool {
        self.origin == MessageOrigin::Framework
    }
}

/// Tracks and manages message history.
///
/// Reads return cloned snapshots; writes go through a single lock. All
/// critical sections are synchronous so callers may hold conversation-level
/// async locks around these calls.
pub struct MessageCache {
    messages: RwLock<HashMap<String, HashMap<String, CachedMessage>>>,
    max_per_conversation: usize,
    max_total: usize,
    max_age: Duration,
    maintenance_interval: Duration,
}

impl MessageCache {
    pub fn new(config: &CachingConfig) -> Self {
        Self {
            messages: RwLock::new(HashMap::new()),
            max_per_conversation: config.max_messages_per_conversation,
            max_total: config.max_total_messages,
            max_age: Duration::from_secs(config.max_age_hours * 3600),
            maintenance_interval: Duration::from_secs(config.cache_maintenance_interval_secs),
        }
    }

    /// Insert a message. Returns false (leaving the entry untouched) when a
    /// message with the same id is already cached.
    pub fn insert(&self, message: CachedMessage) -> bool {
        let mut messages = self.messages.write().unwrap();
        let conversation = messages
            .entry(message.conversation_id.clone())
            .or_default();
        if conversation.contains_key(&message.message_id) {
            return false;
        }
        conversation.insert(message.message_id.clone(), message);
        true
    }

    pub fn get(&self, conversation_id: &str, message_id: &str) -> Option<CachedMessage> {
        self.messages
            .read()
            .unwrap()
            .get(conversation_id)
            .and_then(|msgs| msgs.get(message_id))
            .cloned()
    }

    /// Apply a mutation to a cached message, returning the updated snapshot.
    pub fn update<F>(&self, conversation_id: &str, message_id: &str, f: F) -> Option<CachedMessage>
    where
        F: FnOnce(&mut CachedMessage),
    {
        let mut messages = self.messages.write().unwrap();
        let message = messages.get_mut(conversation_id)?.get_mut(message_id)?;
        f(message);
        Some(message.clone())
    }

    pub fn remove(&self, conversation_id: &str, message_id: &str) -> bool {
        let mut messages = self.messages.write().unwrap();
        let Some(conversation) = messages.get_mut(conversation_id) else {
            return false;
        };
        let removed = conversation.remove(message_id).is_some();
        if conversation.is_empty() {
            messages.remove(conversation_id);
        }
        removed
    }

    /// Move a message between conversations (topic moves, group upgrades).
    pub fn migrate(
        &self,
        old_conversation_id: &str,
        new_conversation_id: &str,
        message_id: &str,
    ) -> bool {
        let mut messages = self.messages.write().unwrap();
        let Some(mut message) = messages
            .get_mut(old_conversation_id)
            .and_then(|msgs| msgs.remove(message_id))
        else {
            return false;
        };
        if messages.get(old_conversation_id).is_some_and(|m| m.is_empty()) {
            messages.remove(old_conversation_id);
        }
        message.conversation_id = new_conversation_id.to_string();
        messages
            .entry(new_conversation_id.to_string())
            .or_default()
            .insert(message_id.to_string(), message);
        true
    }

    /// All messages of a conversation, oldest first.
    pub fn conversation_messages(&self, conversation_id: &str) -> Vec<CachedMessage> {
        let mut result: Vec<CachedMessage> = self
            .messages
            .read()
            .unwrap()
            .get(conversation_id)
            .map(|msgs| msgs.values().cloned().collect())
            .unwrap_or_default();
        result.sort_by_key(|m| (m.timestamp_ms, m.message_id.clone()));
        result
    }

    pub fn conversation_len(&self, conversation_id: &str) -> usize {
        self.messages
            .read()
            .unwrap()
            .get(conversation_id)
            .map(|msgs| msgs.len())
            .unwrap_or(0)
    }

    pub fn total_len(&self) -> usize {
        self.messages
            .read()
            .unwrap()
            .values()
            .map(|msgs| msgs.len())
            .sum()
    }

    /// One maintenance pass: age limit, per-conversation caps, global cap.
    pub fn enforce_limits(&self, now_ms: i64) {
        let mut messages = self.messages.write().unwrap();
        let cutoff_ms = now_ms - self.max_age.as_millis() as i64;

        for msgs in messages.values_mut() {
            msgs.retain(|_, m| m.timestamp_ms >= cutoff_ms);
        }

        for msgs in messages.values_mut() {
            if msgs.len() <= self.max_per_conversation {
                continue;
            }
            let mut ordered: Vec<(i64, String)> = msgs
                .values()
                .map(|m| (m.timestamp_ms, m.message_id.clone()))
                .collect();
            ordered.sort();
            let excess = ordered.len() - self.max_per_conversation;
            for (_, id) in ordered.into_iter().take(excess) {
                msgs.remove(&id);
            }
        }

        let total: usize = messages.values().map(|m| m.len()).sum();
        if total > self.max_total {
            let mut all: Vec<(i64, String, String)> = messages
                .iter()
                .flat_map(|(conv, msgs)| {
                    msgs.values()
                        .map(|m| (m.timestamp_ms, conv.clone(), m.message_id.clone()))
                })
                .collect();
            all.sort();
            for (_, conv, id) in all.into_iter().take(total - self.max_total) {
                if let Some(msgs) = messages.get_mut(&conv) {
                    msgs.remove(&id);
                }
            }
        }

        messages.retain(|_, msgs| !msgs.is_empty());
    }

    /// Spawn the periodic sweep. The returned handle is aborted on shutdown.
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let period = self.maintenance_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.enforce_limits(chrono::Utc::now().timestamp_millis());
                tracing::debug!(total = cache.total_len(), "Message cache maintenance completed");
            }
        })
    }
}
