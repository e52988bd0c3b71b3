// ABOUTME: Scripted in-process platform used by integration tests and adapter_type = "mock"
// ABOUTME: Events are injected by hand; every outbound call is recorded for inspection

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};

use skiff_core::error::{AdapterError, Result};
use skiff_core::traits::{
    PlatformCapabilities, PlatformClient, RawAttachment, RawEvent, RawMessage, SendOptions,
};

/// One recorded outbound operation.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    SendMessage {
        conversation: String,
        text: String,
    },
    EditMessage {
        conversation: String,
        message_id: String,
        text: String,
    },
    DeleteMessage {
        conversation: String,
        message_id: String,
    },
    AddReaction {
        conversation: String,
        message_id: String,
        emoji: String,
    },
    RemoveReaction {
        conversation: String,
        message_id: String,
        emoji: String,
    },
    PinMessage {
        conversation: String,
        message_id: String,
    },
    UnpinMessage {
        conversation: String,
        message_id: String,
    },
    FetchHistory {
        conversation: String,
        limit: usize,
    },
    DownloadAttachment {
        source_id: String,
    },
    UploadAttachment {
        conversation: String,
        filename: String,
        size: usize,
    },
}

/// Deterministic platform stand-in: tests push `RawEvent`s in and observe
/// the calls the runtime makes back out.
pub struct MockPlatformClient {
    capabilities: StdMutex<PlatformCapabilities>,
    alive: AtomicBool,
    events_tx: StdMutex<Option<mpsc::Sender<RawEvent>>>,
    events_rx: Mutex<Option<mpsc::Receiver<RawEvent>>>,
    calls: StdMutex<Vec<RecordedCall>>,
    failing_ops: StdMutex<HashSet<&'static str>>,
    attachment_bytes: StdMutex<HashMap<String, Vec<u8>>>,
    history_pages: StdMutex<Vec<Vec<RawMessage>>>,
    send_counter: AtomicUsize,
    send_gate: StdMutex<Option<Arc<Notify>>>,
}

impl Default for MockPlatformClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlatformClient {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(256);
        Self {
            capabilities: StdMutex::new(PlatformCapabilities::default()),
            alive: AtomicBool::new(true),
            events_tx: StdMutex::new(Some(tx)),
            events_rx: Mutex::new(Some(rx)),
            calls: StdMutex::new(Vec::new()),
            failing_ops: StdMutex::new(HashSet::new()),
            attachment_bytes: StdMutex::new(HashMap::new()),
            history_pages: StdMutex::new(Vec::new()),
            send_counter: AtomicUsize::new(0),
            send_gate: StdMutex::new(None),
        }
    }

    /// Inject a platform event into the stream.
    pub async fn push_event(&self, event: RawEvent) {
        let tx = self.events_tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    pub fn set_capabilities(&self, capabilities: PlatformCapabilities) {
        *self.capabilities.lock().unwrap() = capabilities;
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    /// Make the named operation fail with a Permanent error.
    pub fn fail_op(&self, op: &'static str) {
        self.failing_ops.lock().unwrap().insert(op);
    }

    pub fn set_attachment_bytes(&self, source_id: &str, bytes: Vec<u8>) {
        self.attachment_bytes
            .lock()
            .unwrap()
            .insert(source_id.to_string(), bytes);
    }

    pub fn push_history_page(&self, page: Vec<RawMessage>) {
        self.history_pages.lock().unwrap().push(page);
    }

    /// Block sends until the returned notify is signalled.
    pub fn gate_sends(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.send_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_len(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn record(&self, call: RecordedCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, op: &str) -> Result<()> {
        if self.failing_ops.lock().unwrap().contains(op) {
            return Err(AdapterError::Permanent(format!("{} rejected by platform", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl PlatformClient for MockPlatformClient {
    async fn connect(&self) -> Result<()> {
        self.check("connect")?;
        self.alive.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn stream_events(&self) -> Result<mpsc::Receiver<RawEvent>> {
        self.events_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| AdapterError::Fatal("event stream already consumed".to_string()))
    }

    fn capabilities(&self) -> PlatformCapabilities {
        *self.capabilities.lock().unwrap()
    }

    fn bot_user_id(&self) -> &str {
        "mock-bot"
    }

    async fn send_message(
        &self,
        platform_conversation_id: &str,
        text: &str,
        _opts: &SendOptions,
    ) -> Result<Vec<String>> {
        let gate = self.send_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.check("send_message")?;
        self.record(RecordedCall::SendMessage {
            conversation: platform_conversation_id.to_string(),
            text: text.to_string(),
        });
        let n = self.send_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(vec![format!("p{}", n)])
    }

    async fn edit_message(
        &self,
        platform_conversation_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<()> {
        self.check("edit_message")?;
        self.record(RecordedCall::EditMessage {
            conversation: platform_conversation_id.to_string(),
            message_id: message_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete_message(&self, platform_conversation_id: &str, message_id: &str) -> Result<()> {
        self.check("delete_message")?;
        self.record(RecordedCall::DeleteMessage {
            conversation: platform_conversation_id.to_string(),
            message_id: message_id.to_string(),
        });
        Ok(())
    }

    async fn add_reaction(
        &self,
        platform_conversation_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<()> {
        self.check("add_reaction")?;
        self.record(RecordedCall::AddReaction {
            conversation: platform_conversation_id.to_string(),
            message_id: message_id.to_string(),
            emoji: emoji.to_string(),
        });
        Ok(())
    }

    async fn remove_reaction(
        &self,
        platform_conversation_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<()> {
        self.check("remove_reaction")?;
        self.record(RecordedCall::RemoveReaction {
            conversation: platform_conversation_id.to_string(),
            message_id: message_id.to_string(),
            emoji: emoji.to_string(),
        });
        Ok(())
    }

    async fn pin_message(&self, platform_conversation_id: &str, message_id: &str) -> Result<()> {
        self.check("pin_message")?;
        self.record(RecordedCall::PinMessage {
            conversation: platform_conversation_id.to_string(),
            message_id: message_id.to_string(),
        });
        Ok(())
    }

    async fn unpin_message(&self, platform_conversation_id: &str, message_id: &str) -> Result<()> {
        self.check("unpin_message")?;
        self.record(RecordedCall::UnpinMessage {
            conversation: platform_conversation_id.to_string(),
            message_id: message_id.to_string(),
        });
        Ok(())
    }

    async fn fetch_history(
        &self,
        platform_conversation_id: &str,
        limit: usize,
        _before_ms: Option<i64>,
        _after_ms: Option<i64>,
    ) -> Result<Vec<RawMessage>> {
        self.check("fetch_history")?;
        self.record(RecordedCall::FetchHistory {
            conversation: platform_conversation_id.to_string(),
            limit,
        });
        let mut pages = self.history_pages.lock().unwrap();
        if pages.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(pages.remove(0))
        }
    }

    async fn download_attachment(&self, attachment: &RawAttachment) -> Result<Vec<u8>> {
        self.check("download_attachment")?;
        self.record(RecordedCall::DownloadAttachment {
            source_id: attachment.source_id.clone(),
        });
        self.attachment_bytes
            .lock()
            .unwrap()
            .get(&attachment.source_id)
            .cloned()
            .ok_or_else(|| {
                AdapterError::Attachment(format!("no bytes scripted for {}", attachment.source_id))
            })
    }

    async fn upload_attachment(
        &self,
        platform_conversation_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<String> {
        self.check("upload_attachment")?;
        self.record(RecordedCall::UploadAttachment {
            conversation: platform_conversation_id.to_string(),
            filename: filename.to_string(),
            size: bytes.len(),
        });
        let n = self.send_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("p{}", n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MockPlatformClient>();
    }

    #[tokio::test]
    async fn test_event_injection_round_trip() {
        let client = MockPlatformClient::new();
        let mut rx = client.stream_events().await.unwrap();
        client
            .push_event(RawEvent::NewMessage(RawMessage::text_message(
                "c1", "m1", "u1", "hi", 0,
            )))
            .await;
        match rx.recv().await.unwrap() {
            RawEvent::NewMessage(m) => assert_eq!(m.message_id, "m1"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_single_consumer() {
        let client = MockPlatformClient::new();
        let _rx = client.stream_events().await.unwrap();
        assert!(client.stream_events().await.is_err());
    }

    #[tokio::test]
    async fn test_failing_op() {
        let client = MockPlatformClient::new();
        client.fail_op("pin_message");
        let err = client.pin_message("c1", "m1").await.unwrap_err();
        assert!(matches!(err, AdapterError::Permanent(_)));
        assert_eq!(client.calls_len(), 0);
    }

    #[tokio::test]
    async fn test_send_generates_sequential_ids() {
        let client = MockPlatformClient::new();
        let ids = client
            .send_message("c1", "one", &SendOptions::default())
            .await
            .unwrap();
        assert_eq!(ids, vec!["p1"]);
        let ids = client
            .send_message("c1", "two", &SendOptions::default())
            .await
            .unwrap();
        assert_eq!(ids, vec!["p2"]);
    }
}
