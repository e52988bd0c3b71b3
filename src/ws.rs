// ABOUTME: WebSocket transport for the framework event socket
// ABOUTME: JSON text frames {event, data}; bot_response and cancel_request route into the bus

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::bus::{BusTransport, EventBus};

/// Inbound frame from the framework.
#[derive(Debug, Deserialize)]
struct ClientFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Broadcasts serialized frames to every connected framework peer.
pub struct WsTransport {
    hub: broadcast::Sender<String>,
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl WsTransport {
    pub fn new() -> Self {
        let (hub, _) = broadcast::channel(256);
        Self { hub }
    }
}

#[async_trait]
impl BusTransport for WsTransport {
    async fn emit(&self, event: &str, data: Value) {
        let frame = json!({ "event": event, "data": data }).to_string();
        // Ignore send errors (no framework connected)
        let _ = self.hub.send(frame);
    }
}

#[derive(Clone)]
struct WsState {
    transport: Arc<WsTransport>,
    bus: Arc<EventBus>,
}

/// Bind the event socket and serve until aborted.
pub async fn serve(
    transport: Arc<WsTransport>,
    bus: Arc<EventBus>,
    host: &str,
    port: u16,
) -> anyhow::Result<JoinHandle<()>> {
    let state = WsState { transport, bus };
    let app = Router::new()
        .route("/socket", get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port)).await?;
    tracing::info!(host, port, "Event socket listening");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Event socket server stopped");
        }
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_loop(socket, state))
}

async fn client_loop(socket: WebSocket, state: WsState) {
    tracing::info!("Framework client connected");
    let (mut sink, mut stream) = socket.split();

    let mut rx = state.transport.hub.subscribe();
    let outbound = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(frame) => {
                    if sink.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Framework socket outbound lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        match serde_json::from_str::<ClientFrame>(&text) {
            Ok(frame) => match frame.event.as_str() {
                "bot_response" => {
                    state.bus.enqueue_bot_response(frame.data).await;
                }
                "cancel_request" => {
                    state.bus.cancel_request(frame.data).await;
                }
                other => {
                    tracing::debug!(event = other, "Ignoring unknown socket event");
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Malformed frame from framework");
            }
        }
    }

    outbound.abort();
    tracing::info!("Framework client disconnected");
}
