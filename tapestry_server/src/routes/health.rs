use crate::server::AppState;
use axum::{Extension, Json};
use std::sync::Arc;

#[tracing::instrument(level = "debug", skip_all)]
pub async fn get_health(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "uptime_s": state.started_at.elapsed().as_secs(),
        "integrations": state.registry.len(),
        "operation_subscribers": state.bus.subscriber_count(),
    }))
}
