//! Live operation stream over server-sent events.
//!
//! Each connection attaches its own bus subscription and detaches when the
//! client goes away; nothing published before the connection is replayed.

use crate::server::AppState;
use axum::Extension;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::routing::get;
use futures_util::{StreamExt, stream::Stream};
use std::convert::Infallible;
use std::sync::Arc;
use tapestry_core::operations::Operation;

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> axum::Router {
    axum::Router::new().route("/operations/stream", get(stream_operations))
}

fn event_name(op: &Operation) -> &'static str {
    match op {
        Operation::Row { .. } => "row",
        Operation::Object { .. } => "object",
        Operation::Ping => "ping",
    }
}

#[tracing::instrument(level = "debug", skip_all)]
async fn stream_operations(
    Extension(state): Extension<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>> + Send> {
    let subscription = state.bus.subscribe();
    tracing::debug!(
        subscribers = state.bus.subscriber_count(),
        "operation stream attached"
    );
    let stream = subscription.into_stream().map(|op| {
        let data = serde_json::to_string(&op).unwrap_or_default();
        Ok(SseEvent::default().event(event_name(&op)).data(data))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
