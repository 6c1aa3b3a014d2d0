use super::gateway::GatewayState;
use axum::{Json, extract::State, response::IntoResponse};
use serde_json::json;
use std::sync::Arc;

pub(crate) async fn stats(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let listener = *state.listener_state.borrow();

    Json(json!({
        "connections": state.registry.connection_count(),
        "subscriptions": state.registry.bucket_count(),
        "listener": listener,
        "metrics": state.metrics.snapshot(),
    }))
}
