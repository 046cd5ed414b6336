//! OAuth round trip for `oauth2` integrations.
//!
//! `start` redirects to the provider with a signed `state`; `callback` checks
//! the state, lets the integration exchange the query for credentials and
//! stores them on the dataset.

use crate::error::ApiError;
use crate::server::AppState;
use axum::extract::{Path, Query};
use axum::response::Redirect;
use axum::routing::get;
use axum::Extension;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tapestry_core::integrations::OAuthHooks;
use tapestry_core::models::{Dataset, DatasetId};

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/oauth/start/{dataset_id}", get(start))
        .route("/oauth/callback/{dataset_id}", get(callback))
}

/// Dataset, its integration's OAuth hooks and the public base URL, or 404.
async fn resolve(
    state: &AppState,
    dataset_id: &str,
) -> Result<(Dataset, Arc<dyn OAuthHooks>, String), ApiError> {
    let id: DatasetId = dataset_id
        .parse()
        .map_err(|_| ApiError::NotFound(format!("dataset {dataset_id}")))?;
    let dataset = state
        .store
        .get_dataset(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("dataset {id}")))?;
    let integration = state
        .registry
        .resolve(dataset.integration_type.as_deref())
        .ok_or_else(|| ApiError::NotFound(format!("dataset {id} has no known integration")))?;
    let hooks = integration.oauth.clone().ok_or_else(|| {
        ApiError::NotFound(format!("integration '{}' has no oauth flow", integration.key))
    })?;
    let base_url = state
        .config
        .public_base_url
        .clone()
        .ok_or_else(|| ApiError::Internal("public base url is not configured".to_string()))?;
    Ok((dataset, hooks, base_url))
}

#[tracing::instrument(level = "info", skip_all)]
async fn start(
    Extension(state): Extension<Arc<AppState>>,
    Path(dataset_id): Path<String>,
) -> Result<Redirect, ApiError> {
    let (dataset, hooks, base_url) = resolve(&state, &dataset_id).await?;
    let oauth_state = state.oauth_state.issue(dataset.id);
    let url = hooks
        .oauth_url(&base_url, &dataset, &oauth_state)
        .map_err(|e| ApiError::Internal(format!("oauth url: {e}")))?;
    tracing::info!(dataset_id = %dataset.id, "redirecting to provider authorization");
    Ok(Redirect::to(&url))
}

#[tracing::instrument(level = "info", skip_all)]
async fn callback(
    Extension(state): Extension<Arc<AppState>>,
    Path(dataset_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Redirect, ApiError> {
    let (mut dataset, hooks, base_url) = resolve(&state, &dataset_id).await?;
    let valid = query
        .get("state")
        .is_some_and(|s| state.oauth_state.verify(dataset.id, s));
    if !valid {
        return Err(ApiError::InvalidInput("oauth state mismatch".to_string()));
    }

    let credentials = hooks
        .oauth_callback(&state.http, &base_url, &dataset, &query)
        .await
        .map_err(|e| ApiError::Internal(format!("oauth callback: {e}")))?;
    dataset.credentials = Some(credentials);
    dataset.touch(Utc::now());
    state.store.upsert_dataset(&dataset).await?;
    tracing::info!(dataset_id = %dataset.id, "stored oauth credentials");

    // First sync runs in the background.
    let engine = state.engine.clone();
    let id = dataset.id;
    tokio::spawn(async move {
        if let Err(e) = engine.sync_dataset_by_id(id).await {
            tracing::warn!(dataset_id = %id, error = %e, "post-authorization sync failed");
        }
    });

    Ok(Redirect::to(&format!("/api/v1/datasets/{}", dataset.id)))
}
