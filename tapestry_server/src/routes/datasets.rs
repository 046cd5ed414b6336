//! Dataset management and read paths.
//!
//! Credentials are accepted on write but only ever returned masked.

use crate::error::ApiError;
use crate::server::AppState;
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tapestry_core::models::{
    Credentials, Dataset, DatasetId, DatasetObject, ListQuery, Row, Table,
};
use tapestry_core::sync::DatasetReport;

const MAX_PAGE: usize = 1000;

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/datasets", get(list_datasets).post(create_dataset))
        .route("/datasets/{id}", get(get_dataset).delete(delete_dataset))
        .route("/datasets/{id}/credentials", put(put_credentials))
        .route("/datasets/{id}/sync", post(sync_dataset))
        .route("/datasets/{id}/tables/{key}/rows", get(list_rows))
        .route("/datasets/{id}/objects/{object_type}", get(get_object))
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl PageQuery {
    fn to_list_query(&self) -> ListQuery {
        let d = ListQuery::default();
        ListQuery {
            limit: self.limit.unwrap_or(d.limit).clamp(1, MAX_PAGE),
            offset: self.offset.unwrap_or(d.offset),
        }
    }
}

#[derive(Deserialize)]
pub struct CreateDataset {
    pub name: String,
    #[serde(default)]
    pub integration_type: Option<String>,
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

#[derive(Debug, Serialize)]
pub struct DatasetView {
    #[serde(flatten)]
    pub dataset: Dataset,
    /// Masked summary; `None` when no credentials are stored.
    pub credentials: Option<Value>,
}

impl From<Dataset> for DatasetView {
    fn from(dataset: Dataset) -> Self {
        let credentials = dataset.credentials.as_ref().map(mask_credentials);
        Self {
            dataset,
            credentials,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DatasetDetail {
    #[serde(flatten)]
    pub view: DatasetView,
    pub tables: Vec<Table>,
    pub objects: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RowsPage {
    pub table: Table,
    pub total: u64,
    pub rows: Vec<Row>,
}

fn mask_secret(s: &str) -> String {
    if s.chars().count() > 8 {
        let head: String = s.chars().take(4).collect();
        let tail: String = s.chars().skip(s.chars().count() - 4).collect();
        format!("{head}...{tail}")
    } else if !s.is_empty() {
        "****".to_string()
    } else {
        String::new()
    }
}

fn mask_credentials(creds: &Credentials) -> Value {
    match creds {
        Credentials::Token { token } => json!({
            "type": creds.kind(),
            "token": mask_secret(token),
        }),
        Credentials::OAuth2 {
            access_token,
            refresh_token,
            expires_at,
        } => json!({
            "type": creds.kind(),
            "access_token": mask_secret(access_token),
            "has_refresh_token": refresh_token.is_some(),
            "expires_at": expires_at,
        }),
        Credentials::Connection { connection_id } => json!({
            "type": creds.kind(),
            "connection_id": connection_id,
        }),
    }
}

fn parse_id(raw: &str) -> Result<DatasetId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::InvalidInput(format!("invalid dataset id '{raw}'")))
}

async fn load(state: &AppState, raw: &str) -> Result<Dataset, ApiError> {
    let id = parse_id(raw)?;
    state
        .store
        .get_dataset(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("dataset {id}")))
}

fn check_integration(state: &AppState, key: Option<&str>) -> Result<(), ApiError> {
    match key {
        Some(k) if state.registry.get(k).is_none() => Err(ApiError::InvalidInput(format!(
            "unknown integration_type '{k}'"
        ))),
        _ => Ok(()),
    }
}

#[tracing::instrument(level = "debug", skip_all)]
async fn list_datasets(
    Extension(state): Extension<Arc<AppState>>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<DatasetView>>, ApiError> {
    let datasets = state.store.list_datasets(page.to_list_query()).await?;
    Ok(Json(datasets.into_iter().map(DatasetView::from).collect()))
}

#[tracing::instrument(level = "info", skip_all)]
async fn create_dataset(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<CreateDataset>,
) -> Result<(StatusCode, Json<DatasetView>), ApiError> {
    check_integration(&state, req.integration_type.as_deref())?;
    let mut dataset = Dataset::new(req.name, req.integration_type, None)?;
    dataset.credentials = req.credentials;
    state.store.upsert_dataset(&dataset).await?;
    tracing::info!(
        dataset_id = %dataset.id,
        integration = dataset.integration_type.as_deref().unwrap_or("-"),
        "dataset created"
    );
    Ok((StatusCode::CREATED, Json(DatasetView::from(dataset))))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_dataset(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DatasetDetail>, ApiError> {
    let dataset = load(&state, &id).await?;
    let tables = state.store.list_tables(dataset.id).await?;
    let objects = state
        .store
        .list_objects(dataset.id)
        .await?
        .into_iter()
        .map(|o| o.object_type)
        .collect();
    Ok(Json(DatasetDetail {
        view: DatasetView::from(dataset),
        tables,
        objects,
    }))
}

#[tracing::instrument(level = "info", skip_all)]
async fn delete_dataset(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    if state.store.delete_dataset(id).await? {
        tracing::info!(dataset_id = %id, "dataset deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("dataset {id}")))
    }
}

#[tracing::instrument(level = "info", skip_all)]
async fn put_credentials(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<DatasetView>, ApiError> {
    let mut dataset = load(&state, &id).await?;
    dataset.credentials = Some(credentials);
    dataset.touch(Utc::now());
    state.store.upsert_dataset(&dataset).await?;
    tracing::info!(dataset_id = %dataset.id, "dataset credentials updated");
    Ok(Json(DatasetView::from(dataset)))
}

#[tracing::instrument(level = "info", skip_all)]
async fn sync_dataset(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DatasetReport>, ApiError> {
    let id = parse_id(&id)?;
    let report = state.engine.sync_dataset_by_id(id).await?;
    Ok(Json(report))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn list_rows(
    Extension(state): Extension<Arc<AppState>>,
    Path((id, key)): Path<(String, String)>,
    Query(page): Query<PageQuery>,
) -> Result<Json<RowsPage>, ApiError> {
    let id = parse_id(&id)?;
    let table = state
        .store
        .get_table(id, &key)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("table '{key}' of dataset {id}")))?;
    let total = state.store.count_rows(table.id).await?;
    let rows = state.store.list_rows(table.id, page.to_list_query()).await?;
    Ok(Json(RowsPage { table, total, rows }))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_object(
    Extension(state): Extension<Arc<AppState>>,
    Path((id, object_type)): Path<(String, String)>,
) -> Result<Json<DatasetObject>, ApiError> {
    let id = parse_id(&id)?;
    state
        .store
        .get_object(id, &object_type)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("object '{object_type}' of dataset {id}")))
}
