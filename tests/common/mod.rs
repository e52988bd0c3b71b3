// ABOUTME: Shared test harness: mock platform + recording bus transport
// ABOUTME: Spins up a full adapter against a temp attachment directory

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use skiff::adapter::Adapter;
use skiff::bus::BusTransport;
use skiff::platform::MockPlatformClient;
use skiff_core::config::Config;

/// Records every frame the adapter emits toward the framework.
#[derive(Default)]
pub struct RecordingTransport {
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().unwrap().clone()
    }

    /// Emitted (event, data) pairs filtered to one socket event name.
    pub fn by_name(&self, name: &str) -> Vec<Value> {
        self.events()
            .into_iter()
            .filter(|(event, _)| event == name)
            .map(|(_, data)| data)
            .collect()
    }

    /// bot_request payloads filtered by event_type.
    pub fn bot_requests(&self, event_type: &str) -> Vec<Value> {
        self.by_name("bot_request")
            .into_iter()
            .filter(|data| data["event_type"] == event_type)
            .collect()
    }

    /// Poll until the predicate holds or two seconds pass.
    pub async fn wait_until(&self, predicate: impl Fn(&[(String, Value)]) -> bool) -> bool {
        for _ in 0..200 {
            if predicate(&self.events()) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    pub async fn wait_for_bot_request(&self, event_type: &str, count: usize) -> bool {
        self.wait_until(|events| {
            events
                .iter()
                .filter(|(event, data)| event == "bot_request" && data["event_type"] == event_type)
                .count()
                >= count
        })
        .await
    }

    pub async fn wait_for_request_result(&self, request_id: &str) -> Option<(String, Value)> {
        for _ in 0..200 {
            let found = self.events().into_iter().find(|(event, data)| {
                (event == "request_success" || event == "request_failed")
                    && data["request_id"] == request_id
            });
            if found.is_some() {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }
}

#[async_trait]
impl BusTransport for RecordingTransport {
    async fn emit(&self, event: &str, data: Value) {
        self.events
            .lock()
            .unwrap()
            .push((event.to_string(), data));
    }
}

pub fn test_config(storage_dir: &Path) -> Config {
    Config::from_toml(&format!(
        r#"
        [adapter]
        adapter_type = "mock"
        adapter_name = "test-adapter"
        adapter_id = "adapter-1"

        [caching]

        [attachments]
        storage_dir = "{}"

        [rate_limit]
        global_rpm = 600000
        per_conversation_rpm = 600000
        message_rpm = 600000

        [event_bus]
    "#,
        storage_dir.display()
    ))
    .expect("test config must parse")
}

pub struct Harness {
    pub adapter: Arc<Adapter>,
    pub client: Arc<MockPlatformClient>,
    pub transport: Arc<RecordingTransport>,
}

/// Build and start a full adapter on the mock platform.
pub async fn start_adapter(storage_dir: &Path) -> Harness {
    start_adapter_with(storage_dir, |_| {}).await
}

/// Same, with a hook to script the mock before startup.
pub async fn start_adapter_with(
    storage_dir: &Path,
    setup: impl FnOnce(&MockPlatformClient),
) -> Harness {
    let config = Arc::new(test_config(storage_dir));
    let client = Arc::new(MockPlatformClient::new());
    setup(&client);
    let transport = Arc::new(RecordingTransport::new());

    let platform: Arc<dyn skiff_core::traits::PlatformClient> = client.clone();
    let bus_transport: Arc<dyn BusTransport> = transport.clone();
    let adapter = Adapter::new(config, platform, bus_transport);
    adapter.start().await.expect("adapter must start");
    Harness {
        adapter,
        client,
        transport,
    }
}

/// The canonical conversation id the adapter derives for a platform id.
pub fn canonical_id(harness: &Harness, platform_id: &str) -> String {
    harness.adapter.manager().canonical_id(platform_id)
}
