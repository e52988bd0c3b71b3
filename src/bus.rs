// ABOUTME: Framework-facing event bus: single-worker FIFO queue with cancellation
// ABOUTME: Every bot_response gets request_queued, then request_success or request_failed

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use skiff_core::config::Config;
use skiff_core::error::Result;
use skiff_core::events::incoming::BotRequest;
use skiff_core::events::outgoing::{OutgoingEvent, ResponseData};
use skiff_core::events::request::RequestEventBuilder;

const ADAPTER_STOPPED_ERROR: &str = "Not processed due to adapter stopping";
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// The wire under the bus. The production transport is a WebSocket; tests
/// plug in an in-process recorder.
#[async_trait]
pub trait BusTransport: Send + Sync {
    async fn emit(&self, event: &str, data: Value);
}

/// Where dequeued requests go: the adapter's outgoing pipeline.
#[async_trait]
pub trait OutgoingDispatcher: Send + Sync {
    async fn dispatch(&self, event: OutgoingEvent) -> Result<ResponseData>;
}

struct QueuedRequest {
    request_id: String,
    payload: Value,
}

/// FIFO request queue between the framework socket and the outgoing
/// processor. Strictly one in-flight request globally, so edits to the same
/// message can never reorder.
pub struct EventBus {
    adapter_type: String,
    transport: Arc<dyn BusTransport>,
    request_events: RequestEventBuilder,
    tx: StdMutex<Option<mpsc::UnboundedSender<QueuedRequest>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<QueuedRequest>>>,
    /// request_id -> internal_request_id for requests still queued
    pending: StdMutex<HashMap<String, Option<String>>>,
    stopping: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    pub fn new(config: &Config, transport: Arc<dyn BusTransport>) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            adapter_type: config.adapter.adapter_type.clone(),
            transport,
            request_events: RequestEventBuilder::new(config.adapter.adapter_type.as_str()),
            tx: StdMutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            pending: StdMutex::new(HashMap::new()),
            stopping: AtomicBool::new(false),
            worker: Mutex::new(None),
        })
    }

    /// Start the single queue worker.
    pub async fn start(self: &Arc<Self>, dispatcher: Arc<dyn OutgoingDispatcher>) {
        let Some(mut rx) = self.rx.lock().await.take() else {
            return;
        };
        let bus = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tracing::info!("Event queue worker started");
            while let Some(request) = rx.recv().await {
                bus.process_one(&dispatcher, request).await;
            }
            tracing::info!("Event queue worker stopped");
        });
        *self.worker.lock().await = Some(handle);
    }

    async fn process_one(&self, dispatcher: &Arc<dyn OutgoingDispatcher>, request: QueuedRequest) {
        // A request cancelled while queued was already answered.
        let internal = {
            let mut pending = self.pending.lock().unwrap();
            match pending.remove(&request.request_id) {
                Some(internal) => internal,
                None => return,
            }
        };

        if self.stopping.load(Ordering::SeqCst) {
            self.emit_request_event(
                "request_failed",
                &request.request_id,
                internal.as_deref(),
                serde_json::json!({ "error": ADAPTER_STOPPED_ERROR }),
            )
            .await;
            return;
        }

        tracing::info!(request_id = %request.request_id, "Processing framework request");
        let parsed = OutgoingEvent::parse(&request.payload);
        let affected = parsed
            .as_ref()
            .ok()
            .and_then(|e| e.affected_message_id().map(str::to_string));

        let result = match parsed {
            Ok(event) => dispatcher.dispatch(event).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(data) => {
                self.emit_request_event(
                    "request_success",
                    &request.request_id,
                    internal.as_deref(),
                    data.to_value(),
                )
                .await;
            }
            Err(e) => {
                tracing::error!(request_id = %request.request_id, error = %e, "Framework request failed");
                let mut data = serde_json::json!({ "error": e.wire_message() });
                if let (Some(map), Some(affected)) = (data.as_object_mut(), affected) {
                    map.insert("affected_message_id".to_string(), Value::String(affected));
                }
                self.emit_request_event(
                    "request_failed",
                    &request.request_id,
                    internal.as_deref(),
                    data,
                )
                .await;
            }
        }
    }

    /// Handle a `bot_response` from the framework: assign a request id,
    /// queue it, and acknowledge with request_queued.
    pub async fn enqueue_bot_response(&self, payload: Value) -> Option<String> {
        let request_id = payload
            .get("request_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let internal = payload
            .get("internal_request_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        if self.stopping.load(Ordering::SeqCst) {
            self.emit_request_event(
                "request_failed",
                &request_id,
                internal.as_deref(),
                serde_json::json!({ "error": ADAPTER_STOPPED_ERROR }),
            )
            .await;
            return None;
        }

        {
            let mut pending = self.pending.lock().unwrap();
            pending.insert(request_id.clone(), internal.clone());
        }
        let sent = {
            let tx = self.tx.lock().unwrap();
            tx.as_ref()
                .map(|tx| {
                    tx.send(QueuedRequest {
                        request_id: request_id.clone(),
                        payload,
                    })
                    .is_ok()
                })
                .unwrap_or(false)
        };
        if !sent {
            self.pending.lock().unwrap().remove(&request_id);
            self.emit_request_event(
                "request_failed",
                &request_id,
                internal.as_deref(),
                serde_json::json!({ "error": ADAPTER_STOPPED_ERROR }),
            )
            .await;
            return None;
        }

        tracing::info!(request_id = %request_id, "Queued framework request");
        self.emit_request_event("request_queued", &request_id, internal.as_deref(), Value::Null)
            .await;
        Some(request_id)
    }

    /// Cancel a queued request. Queued: removed and acknowledged with
    /// request_success. In flight or unknown: request_failed. No mid-flight
    /// preemption.
    pub async fn cancel_request(&self, payload: Value) {
        let Some(request_id) = payload.get("request_id").and_then(Value::as_str) else {
            return;
        };
        let internal = payload
            .get("internal_request_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        let removed = self.pending.lock().unwrap().remove(request_id);
        match removed {
            Some(stored_internal) => {
                tracing::info!(request_id, "Cancelled queued request");
                self.emit_request_event(
                    "request_success",
                    request_id,
                    stored_internal.or(internal).as_deref(),
                    Value::Null,
                )
                .await;
            }
            None => {
                self.emit_request_event(
                    "request_failed",
                    request_id,
                    internal.as_deref(),
                    serde_json::json!({ "error": "Request ID not found in request map" }),
                )
                .await;
            }
        }
    }

    /// Emit one normalized event toward the framework.
    pub async fn emit_bot_request(&self, request: &BotRequest) {
        match serde_json::to_value(request) {
            Ok(value) => self.transport.emit("bot_request", value).await,
            Err(e) => tracing::error!(error = %e, "Failed to serialize bot_request"),
        }
    }

    async fn emit_request_event(
        &self,
        event: &str,
        request_id: &str,
        internal_request_id: Option<&str>,
        data: Value,
    ) {
        let payload = self
            .request_events
            .build(request_id, internal_request_id, data);
        match serde_json::to_value(&payload) {
            Ok(value) => self.transport.emit(event, value).await,
            Err(e) => tracing::error!(error = %e, "Failed to serialize request event"),
        }
    }

    pub fn adapter_type(&self) -> &str {
        &self.adapter_type
    }

    pub fn queued_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Stop accepting requests, drain the backlog with request_failed, and
    /// wait (bounded) for the worker to finish.
    pub async fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        // Closing the sender lets the worker drain the backlog and exit
        let tx = self.tx.lock().unwrap().take();
        drop(tx);

        if let Some(mut handle) = self.worker.lock().await.take() {
            if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, &mut handle)
                .await
                .is_err()
            {
                tracing::warn!("Event queue worker did not drain in time, aborting");
                handle.abort();
            }
        }
    }
}
