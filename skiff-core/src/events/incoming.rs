// ABOUTME: Events the adapter emits toward the framework (bot_request payloads)
// ABOUTME: Builder stamps adapter identity onto every constructed event

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::conversation::delta::ReactionDelta;

/// Event vocabulary of `bot_request` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncomingEventType {
    Connect,
    Disconnect,
    ConversationStarted,
    MessageReceived,
    MessageUpdated,
    MessageDeleted,
    ReactionAdded,
    ReactionRemoved,
    MessagePinned,
    MessageUnpinned,
    HistoryFetched,
    ConversationUpdated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderInfo {
    pub user_id: String,
    pub display_name: String,
}

/// Base64-framed attachment descriptor. `content` is present only in
/// `fetch_attachment` replies and newly received messages, never in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentPayload {
    pub attachment_id: String,
    pub attachment_type: String,
    pub file_extension: Option<String>,
    pub size: u64,
    pub processable: bool,
    pub content: Option<String>,
}

impl AttachmentPayload {
    /// Copy without the inlined content, for history payloads.
    pub fn without_content(&self) -> Self {
        Self {
            content: None,
            ..self.clone()
        }
    }
}

/// Wire form of a message, used by message_received, message_updated (as
/// new state), and history entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub message_id: String,
    pub conversation_id: String,
    pub sender: SenderInfo,
    pub text: String,
    pub thread_id: Option<String>,
    pub is_direct_message: bool,
    pub timestamp: i64,
    pub edit_timestamp: Option<i64>,
    pub edited: bool,
    pub attachments: Vec<AttachmentPayload>,
    pub mentions: Vec<String>,
}

/// One message on the event socket toward the framework.
#[derive(Debug, Clone, Serialize)]
pub struct BotRequest {
    pub adapter_type: String,
    pub event_type: IncomingEventType,
    pub data: Value,
}

/// Constructs `bot_request` events stamped with the adapter's identity.
#[derive(Debug, Clone)]
pub struct IncomingEventBuilder {
    adapter_type: String,
    adapter_name: String,
    adapter_id: String,
}

impl IncomingEventBuilder {
    pub fn new(
        adapter_type: impl Into<String>,
        adapter_name: impl Into<String>,
        adapter_id: impl Into<String>,
    ) -> Self {
        Self {
            adapter_type: adapter_type.into(),
            adapter_name: adapter_name.into(),
            adapter_id: adapter_id.into(),
        }
    }

    fn event(&self, event_type: IncomingEventType, mut data: Value) -> BotRequest {
        if let Some(map) = data.as_object_mut() {
            map.insert("adapter_name".to_string(), json!(self.adapter_name));
            map.insert("adapter_id".to_string(), json!(self.adapter_id));
        }
        BotRequest {
            adapter_type: self.adapter_type.clone(),
            event_type,
            data,
        }
    }

    pub fn connect(&self) -> BotRequest {
        self.event(IncomingEventType::Connect, json!({}))
    }

    pub fn disconnect(&self) -> BotRequest {
        self.event(IncomingEventType::Disconnect, json!({}))
    }

    /// `conversation_started` with the fetched history inlined.
    pub fn conversation_started(
        &self,
        conversation_id: &str,
        history: &[MessagePayload],
    ) -> BotRequest {
        let history: Vec<MessagePayload> = history
            .iter()
            .map(|m| MessagePayload {
                attachments: m.attachments.iter().map(|a| a.without_content()).collect(),
                ..m.clone()
            })
            .collect();
        self.event(
            IncomingEventType::ConversationStarted,
            json!({
                "conversation_id": conversation_id,
                "history": history,
            }),
        )
    }

    pub fn message_received(&self, message: &MessagePayload) -> BotRequest {
        self.event(
            IncomingEventType::MessageReceived,
            serde_json::to_value(message).unwrap_or_default(),
        )
    }

    pub fn message_updated(&self, message: &MessagePayload) -> BotRequest {
        self.event(
            IncomingEventType::MessageUpdated,
            json!({
                "message_id": message.message_id,
                "conversation_id": message.conversation_id,
                "new_text": message.text,
                "timestamp": message.edit_timestamp.unwrap_or(message.timestamp),
                "attachments": message.attachments,
                "mentions": message.mentions,
            }),
        )
    }

    pub fn message_deleted(&self, message_id: &str, conversation_id: &str) -> BotRequest {
        self.event(
            IncomingEventType::MessageDeleted,
            json!({
                "message_id": message_id,
                "conversation_id": conversation_id,
            }),
        )
    }

    pub fn reaction_update(
        &self,
        event_type: IncomingEventType,
        conversation_id: &str,
        reaction: &ReactionDelta,
    ) -> BotRequest {
        debug_assert!(matches!(
            event_type,
            IncomingEventType::ReactionAdded | IncomingEventType::ReactionRemoved
        ));
        self.event(
            event_type,
            json!({
                "message_id": reaction.message_id,
                "conversation_id": conversation_id,
                "emoji": reaction.emoji,
            }),
        )
    }

    pub fn pin_status_update(
        &self,
        event_type: IncomingEventType,
        conversation_id: &str,
        message_id: &str,
    ) -> BotRequest {
        debug_assert!(matches!(
            event_type,
            IncomingEventType::MessagePinned | IncomingEventType::MessageUnpinned
        ));
        self.event(
            event_type,
            json!({
                "message_id": message_id,
                "conversation_id": conversation_id,
            }),
        )
    }

    pub fn history_fetched(&self, conversation_id: &str, history: &[MessagePayload]) -> BotRequest {
        let history: Vec<MessagePayload> = history
            .iter()
            .map(|m| MessagePayload {
                attachments: m.attachments.iter().map(|a| a.without_content()).collect(),
                ..m.clone()
            })
            .collect();
        self.event(
            IncomingEventType::HistoryFetched,
            json!({
                "conversation_id": conversation_id,
                "history": history,
            }),
        )
    }

    pub fn conversation_updated(
        &self,
        conversation_id: &str,
        conversation_name: Option<&str>,
        server_name: Option<&str>,
    ) -> BotRequest {
        self.event(
            IncomingEventType::ConversationUpdated,
            json!({
                "conversation_id": conversation_id,
                "conversation_name": conversation_name,
                "server_name": server_name,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> IncomingEventBuilder {
        IncomingEventBuilder::new("mock", "test-adapter", "adapter-1")
    }

    fn payload(id: &str) -> MessagePayload {
        MessagePayload {
            message_id: id.to_string(),
            conversation_id: "c1".to_string(),
            sender: SenderInfo {
                user_id: "u1".to_string(),
                display_name: "User One".to_string(),
            },
            text: "hello".to_string(),
            thread_id: None,
            is_direct_message: false,
            timestamp: 1000,
            edit_timestamp: None,
            edited: false,
            attachments: vec![AttachmentPayload {
                attachment_id: "a1".to_string(),
                attachment_type: "image".to_string(),
                file_extension: Some("png".to_string()),
                size: 10,
                processable: true,
                content: Some("aGk=".to_string()),
            }],
            mentions: Vec::new(),
        }
    }

    #[test]
    fn test_event_type_serializes_snake_case() {
        let value = serde_json::to_value(IncomingEventType::MessageReceived).unwrap();
        assert_eq!(value, json!("message_received"));
    }

    #[test]
    fn test_builder_stamps_identity() {
        let event = builder().message_received(&payload("m1"));
        assert_eq!(event.adapter_type, "mock");
        assert_eq!(event.data["adapter_name"], json!("test-adapter"));
        assert_eq!(event.data["adapter_id"], json!("adapter-1"));
        assert_eq!(event.data["message_id"], json!("m1"));
    }

    #[test]
    fn test_history_strips_attachment_content() {
        let event = builder().conversation_started("c1", &[payload("m1")]);
        assert_eq!(event.event_type, IncomingEventType::ConversationStarted);
        let content = &event.data["history"][0]["attachments"][0]["content"];
        assert!(content.is_null());
    }

    #[test]
    fn test_message_received_keeps_content() {
        let event = builder().message_received(&payload("m1"));
        assert_eq!(event.data["attachments"][0]["content"], json!("aGk="));
    }

    #[test]
    fn test_message_updated_shape() {
        let mut message = payload("m1");
        message.text = "new text".to_string();
        message.edit_timestamp = Some(2000);
        let event = builder().message_updated(&message);
        assert_eq!(event.event_type, IncomingEventType::MessageUpdated);
        assert_eq!(event.data["new_text"], json!("new text"));
        assert_eq!(event.data["timestamp"], json!(2000));
    }

    #[test]
    fn test_bot_request_wire_shape() {
        let event = builder().message_deleted("m1", "c1");
        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["adapter_type"], json!("mock"));
        assert_eq!(wire["event_type"], json!("message_deleted"));
        assert_eq!(wire["data"]["message_id"], json!("m1"));
    }
}
