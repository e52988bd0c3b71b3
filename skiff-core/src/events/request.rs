// ABOUTME: request_queued / request_success / request_failed lifecycle events
// ABOUTME: internal_request_id from the framework is echoed back when present

use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize)]
pub struct RequestEvent {
    pub adapter_type: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_request_id: Option<String>,
    pub data: Value,
}

#[derive(Debug, Clone)]
pub struct RequestEventBuilder {
    adapter_type: String,
}

impl RequestEventBuilder {
    pub fn new(adapter_type: impl Into<String>) -> Self {
        Self {
            adapter_type: adapter_type.into(),
        }
    }

    pub fn build(
        &self,
        request_id: &str,
        internal_request_id: Option<&str>,
        data: Value,
    ) -> RequestEvent {
        let data = match data {
            Value::Object(map) => Value::Object(map),
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        RequestEvent {
            adapter_type: self.adapter_type.clone(),
            request_id: request_id.to_string(),
            internal_request_id: internal_request_id.map(str::to_string),
            data,
        }
    }
}
