// ABOUTME: Requests arriving from the framework (bot_response payloads)
// ABOUTME: Parse failures surface as ValidationError, never panics

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AdapterError, Result};
use crate::events::incoming::MessagePayload;

/// Attachment provided by the framework on send: base64 content plus name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingAttachment {
    pub filename: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageData {
    pub conversation_id: String,
    pub text: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<OutgoingAttachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditMessageData {
    pub conversation_id: String,
    pub message_id: String,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<OutgoingAttachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRefData {
    pub conversation_id: String,
    pub message_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionData {
    pub conversation_id: String,
    pub message_id: String,
    pub emoji: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchHistoryData {
    pub conversation_id: String,
    #[serde(default)]
    pub before: Option<i64>,
    #[serde(default)]
    pub after: Option<i64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchAttachmentData {
    pub attachment_id: String,
}

/// The fixed vocabulary of framework-initiated operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "data", rename_all = "snake_case")]
pub enum OutgoingEvent {
    SendMessage(SendMessageData),
    EditMessage(EditMessageData),
    DeleteMessage(MessageRefData),
    AddReaction(ReactionData),
    RemoveReaction(ReactionData),
    FetchHistory(FetchHistoryData),
    FetchAttachment(FetchAttachmentData),
    PinMessage(MessageRefData),
    UnpinMessage(MessageRefData),
}

impl OutgoingEvent {
    pub fn parse(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| AdapterError::Validation(format!("malformed bot_response: {}", e)))
    }

    /// The conversation the request targets, when it has one.
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            OutgoingEvent::SendMessage(d) => Some(&d.conversation_id),
            OutgoingEvent::EditMessage(d) => Some(&d.conversation_id),
            OutgoingEvent::DeleteMessage(d) => Some(&d.conversation_id),
            OutgoingEvent::AddReaction(d) => Some(&d.conversation_id),
            OutgoingEvent::RemoveReaction(d) => Some(&d.conversation_id),
            OutgoingEvent::FetchHistory(d) => Some(&d.conversation_id),
            OutgoingEvent::FetchAttachment(_) => None,
            OutgoingEvent::PinMessage(d) => Some(&d.conversation_id),
            OutgoingEvent::UnpinMessage(d) => Some(&d.conversation_id),
        }
    }

    /// The message a failed request was about, echoed in request_failed.
    pub fn affected_message_id(&self) -> Option<&str> {
        match self {
            OutgoingEvent::EditMessage(d) => Some(&d.message_id),
            OutgoingEvent::DeleteMessage(d) => Some(&d.message_id),
            OutgoingEvent::AddReaction(d) => Some(&d.message_id),
            OutgoingEvent::RemoveReaction(d) => Some(&d.message_id),
            OutgoingEvent::PinMessage(d) => Some(&d.message_id),
            OutgoingEvent::UnpinMessage(d) => Some(&d.message_id),
            _ => None,
        }
    }
}

/// Operation-specific payload carried by a request_success event.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseData {
    MessageIds(Vec<String>),
    History(Vec<MessagePayload>),
    Content(String),
    None,
}

impl ResponseData {
    pub fn to_value(&self) -> Value {
        match self {
            ResponseData::MessageIds(ids) => json!({ "message_ids": ids }),
            ResponseData::History(history) => json!({ "history": history }),
            ResponseData::Content(content) => json!({ "content": content }),
            ResponseData::None => json!({}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send_message() {
        let value = json!({
            "event_type": "send_message",
            "data": {
                "conversation_id": "c1",
                "text": "hello",
            }
        });
        let event = OutgoingEvent::parse(&value).unwrap();
        match &event {
            OutgoingEvent::SendMessage(d) => {
                assert_eq!(d.conversation_id, "c1");
                assert_eq!(d.text, "hello");
                assert!(d.attachments.is_empty());
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(event.conversation_id(), Some("c1"));
    }

    #[test]
    fn test_parse_unknown_event_type() {
        let value = json!({ "event_type": "reboot_platform", "data": {} });
        let err = OutgoingEvent::parse(&value).unwrap_err();
        assert!(matches!(err, AdapterError::Validation(_)));
    }

    #[test]
    fn test_parse_missing_field() {
        let value = json!({ "event_type": "edit_message", "data": { "conversation_id": "c1" } });
        assert!(OutgoingEvent::parse(&value).is_err());
    }

    #[test]
    fn test_affected_message_id() {
        let value = json!({
            "event_type": "delete_message",
            "data": { "conversation_id": "c1", "message_id": "m7" }
        });
        let event = OutgoingEvent::parse(&value).unwrap();
        assert_eq!(event.affected_message_id(), Some("m7"));
    }

    #[test]
    fn test_response_data_shapes() {
        assert_eq!(
            ResponseData::MessageIds(vec!["p1".into(), "p2".into()]).to_value(),
            json!({ "message_ids": ["p1", "p2"] })
        );
        assert_eq!(
            ResponseData::Content("aGk=".into()).to_value(),
            json!({ "content": "aGk=" })
        );
        assert_eq!(ResponseData::None.to_value(), json!({}));
    }
}
