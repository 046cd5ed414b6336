//! Provider push notifications: `/webhooks/{integration}`.
//!
//! Method and content-type checks belong to each integration's contract, so the
//! route accepts any method and hands the raw request to the dispatcher.

use crate::server::AppState;
use axum::body::{Body, Bytes};
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, Path};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Extension, Json};
use std::sync::Arc;
use tapestry_core::webhooks::WebhookRequest;

#[tracing::instrument(level = "debug", skip_all)]
pub fn router(max_body_bytes: usize) -> axum::Router {
    axum::Router::new()
        .route("/webhooks/{integration}", any(receive))
        .layer(DefaultBodyLimit::max(max_body_bytes))
}

#[tracing::instrument(level = "info", skip_all)]
async fn receive(
    Extension(state): Extension<Arc<AppState>>,
    Path(integration): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "webhook body rejected");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": rejection.body_text() })),
            )
                .into_response();
        }
    };

    let mut req = WebhookRequest::new(method, body);
    for (name, value) in &headers {
        if let Ok(value) = value.to_str() {
            req = req.with_header(name.as_str(), value);
        }
    }

    let reply = state.dispatcher.handle(&integration, req).await;
    tracing::debug!(integration = %integration, status = %reply.status, "webhook answered");
    match reply.body {
        Some(body) => (reply.status, Json(body)).into_response(),
        None => (reply.status, Body::empty()).into_response(),
    }
}
