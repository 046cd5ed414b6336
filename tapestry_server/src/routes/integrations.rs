use crate::server::AppState;
use axum::routing::get;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;
use tapestry_core::integrations::{AuthType, Integration};

#[derive(Debug, Serialize)]
pub struct IntegrationSummary {
    pub key: String,
    pub name: String,
    pub auth_type: AuthType,
    pub objects: Vec<String>,
    pub tables: Vec<String>,
    pub webhooks: bool,
}

impl From<&Integration> for IntegrationSummary {
    fn from(i: &Integration) -> Self {
        Self {
            key: i.key.clone(),
            name: i.name.clone(),
            auth_type: i.auth_type,
            objects: i.objects().iter().map(|o| o.key.clone()).collect(),
            tables: i.tables().iter().map(|t| t.key.clone()).collect(),
            webhooks: i.webhooks.is_some(),
        }
    }
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> axum::Router {
    axum::Router::new().route("/integrations", get(list_integrations))
}

/// GET /api/v1/integrations: registered providers in key order.
#[tracing::instrument(level = "debug", skip_all)]
async fn list_integrations(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<Vec<IntegrationSummary>> {
    Json(
        state
            .registry
            .list()
            .map(|i| IntegrationSummary::from(i.as_ref()))
            .collect(),
    )
}
