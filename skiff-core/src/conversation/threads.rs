// ABOUTME: Thread membership tracking inside a conversation
// ABOUTME: Threads form from explicit thread ids or reply chains; empty threads are dropped

use crate::cache::message::CachedMessage;
use crate::conversation::types::{ConversationInfo, ThreadInfo};
use crate::traits::RawMessage;

/// Locates or registers the thread a message belongs to.
pub struct ThreadTracker;

impl ThreadTracker {
    /// Register a message with its thread. `replied` is the cached message
    /// being replied to, when the platform only gives a reply pointer.
    /// Returns the thread id the message landed in, if any.
    pub fn register(
        conversation: &mut ConversationInfo,
        message: &RawMessage,
        replied: Option<&CachedMessage>,
    ) -> Option<String> {
        let thread_id = message
            .thread_id
            .clone()
            .or_else(|| replied.and_then(|r| r.thread_id.clone()))
            .or_else(|| message.reply_to_message_id.clone())?;

        let root = replied
            .and_then(|r| r.thread_id.is_none().then(|| r.message_id.clone()))
            .or_else(|| message.reply_to_message_id.clone());

        let thread = conversation
            .threads
            .entry(thread_id.clone())
            .or_insert_with(|| ThreadInfo::new(thread_id.clone(), root));
        if !thread.messages.contains(&message.message_id) {
            thread.messages.push(message.message_id.clone());
        }
        thread.last_activity = chrono::Utc::now();

        Some(thread_id)
    }

    /// Remove a deleted message from its thread; drop the thread when empty.
    pub fn unregister(conversation: &mut ConversationInfo, message: &CachedMessage) {
        let Some(thread_id) = &message.thread_id else {
            return;
        };
        let Some(thread) = conversation.threads.get_mut(thread_id) else {
            return;
        };
        thread.messages.retain(|id| id != &message.message_id);
        if thread.messages.is_empty() {
            conversation.threads.remove(thread_id);
        }
    }
}
