use serde_json::Value;
use std::sync::Arc;

/// One decoded upstream notification. The payload is shared by every delivery of the fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub workspace_id: String,
    pub channel: String,
    pub payload: Arc<Value>,
}

impl ChangeEvent {
    pub fn new(
        workspace_id: impl Into<String>,
        channel: impl Into<String>,
        payload: Value,
    ) -> Self {
        ChangeEvent {
            workspace_id: workspace_id.into(),
            channel: channel.into(),
            payload: Arc::new(payload),
        }
    }
}
