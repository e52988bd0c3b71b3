// ABOUTME: Conversation and thread state owned by the ConversationManager
// ABOUTME: The canonical conversation_id stays distinct from the platform-native id

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::traits::ConversationKind;

/// Information about a reply grouping inside a conversation.
#[derive(Debug, Clone)]
pub struct ThreadInfo {
    pub thread_id: String,
    /// The message that started the thread
    pub root_message_id: Option<String>,
    pub last_activity: DateTime<Utc>,
    /// Member message ids in arrival order
    pub messages: Vec<String>,
}

impl ThreadInfo {
    pub fn new(thread_id: impl Into<String>, root_message_id: Option<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            root_message_id,
            last_activity: Utc::now(),
            messages: Vec::new(),
        }
    }
}

/// Comprehensive information about one conversation.
#[derive(Debug, Clone)]
pub struct ConversationInfo {
    /// Adapter-assigned stable id, the key exchanged with the framework
    pub conversation_id: String,
    /// The platform's own identifier, kept separate even when they match
    pub platform_conversation_id: String,
    pub conversation_type: ConversationKind,
    pub conversation_name: Option<String>,
    pub server_id: Option<String>,
    pub server_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// User ids of everyone observed in this conversation
    pub known_members: HashSet<String>,
    /// True between creation and the conversation_started emission
    pub just_started: bool,
    pub threads: HashMap<String, ThreadInfo>,
    pub attachments: HashSet<String>,
    pub pinned_messages: BTreeSet<String>,
}

impl ConversationInfo {
    pub fn new(
        conversation_id: impl Into<String>,
        platform_conversation_id: impl Into<String>,
        conversation_type: ConversationKind,
    ) -> Self {
        let now = Utc::now();
        Self {
            conversation_id: conversation_id.into(),
            platform_conversation_id: platform_conversation_id.into(),
            conversation_type,
            conversation_name: None,
            server_id: None,
            server_name: None,
            created_at: now,
            last_activity: now,
            known_members: HashSet::new(),
            just_started: true,
            threads: HashMap::new(),
            attachments: HashSet::new(),
            pinned_messages: BTreeSet::new(),
        }
    }

    pub fn is_direct(&self) -> bool {
        self.conversation_type.is_direct()
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_conversation_just_started() {
        let conv = ConversationInfo::new("mock_abc", "g/c", ConversationKind::Group);
        assert!(conv.just_started);
        assert_eq!(conv.conversation_id, "mock_abc");
        assert_eq!(conv.platform_conversation_id, "g/c");
        assert!(conv.known_members.is_empty());
        assert!(conv.pinned_messages.is_empty());
    }

    #[test]
    fn test_touch_advances_activity() {
        let mut conv = ConversationInfo::new("mock_abc", "g/c", ConversationKind::Direct);
        let before = conv.last_activity;
        conv.touch();
        assert!(conv.last_activity >= before);
        assert!(conv.is_direct());
    }
}
