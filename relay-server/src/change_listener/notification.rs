use crate::{errors::decode_error::DecodeError, models::change_event::ChangeEvent};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Deserialize)]
struct Notification {
    channel: String,
    workspace_id: String,
    #[serde(default)]
    data: Value,
}

pub fn decode_notification(payload: &str) -> Result<ChangeEvent, DecodeError> {
    let notification: Notification = serde_json::from_str(payload)?;

    if notification.channel.is_empty() {
        return Err(DecodeError::EmptyField("channel"));
    }

    if notification.workspace_id.is_empty() {
        return Err(DecodeError::EmptyField("workspace_id"));
    }

    Ok(ChangeEvent {
        workspace_id: notification.workspace_id,
        channel: notification.channel,
        payload: Arc::new(notification.data),
    })
}
