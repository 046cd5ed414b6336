//! Oura ring connector (personal access token, API v2).

use crate::http::fetch_json;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use serde_json::Value;
use std::sync::Arc;
use tapestry_core::integrations::{
    AuthType, FetchContext, Integration, ObjectDefinition, ObjectSource, TableDefinition,
    TableSource, field_id,
};
use tapestry_core::models::Dataset;
use tapestry_core::{Error, Result};
use tracing::instrument;

pub const KEY: &str = "oura";
pub const DEFAULT_BASE_URL: &str = "https://api.ouraring.com";
/// Daily collections are fetched over this trailing window.
const LOOKBACK_DAYS: i64 = 30;
const MAX_PAGES: usize = 50;

fn start_date() -> NaiveDate {
    (Utc::now() - ChronoDuration::days(LOOKBACK_DAYS)).date_naive()
}

async fn fetch(
    ctx: &FetchContext<'_>,
    base_url: &str,
    path: &str,
    query: &[(&str, String)],
) -> Result<Option<Value>> {
    let token = ctx.require_secret()?;
    let req = ctx
        .http
        .get(format!("{base_url}/v2/usercollection{path}"))
        .bearer_auth(token)
        .query(query);
    fetch_json(KEY, req).await
}

struct PersonalInfo {
    base_url: String,
}

#[async_trait]
impl ObjectSource for PersonalInfo {
    #[instrument(level = "debug", skip_all)]
    async fn get(&self, ctx: &FetchContext<'_>) -> Result<Option<Value>> {
        fetch(ctx, &self.base_url, "/personal_info", &[]).await
    }

    fn object_id(&self, dataset: &Dataset, data: &Value) -> String {
        field_id(data, "id").unwrap_or_else(|| dataset.id.to_string())
    }
}

/// A paged `{"data": [...], "next_token": ...}` collection keyed by day.
///
/// Pages are followed until `next_token` runs out and concatenated into one
/// array. A first page without the envelope is passed through untouched.
struct DailyCollection {
    base_url: String,
    path: &'static str,
}

#[async_trait]
impl TableSource for DailyCollection {
    #[instrument(level = "debug", skip_all, fields(path = self.path))]
    async fn get(&self, ctx: &FetchContext<'_>) -> Result<Option<Value>> {
        let start = start_date().to_string();
        let mut rows = Vec::new();
        let mut next_token: Option<String> = None;

        for page_no in 0..MAX_PAGES {
            let mut query = vec![("start_date", start.clone())];
            if let Some(token) = next_token.take() {
                query.push(("next_token", token));
            }
            let body = match fetch(ctx, &self.base_url, self.path, &query).await? {
                Some(body) => body,
                None if page_no == 0 => return Ok(None),
                None => return Ok(Some(Value::Array(rows))),
            };
            let mut page = match body {
                Value::Object(map) if map.contains_key("data") => map,
                other if page_no == 0 => return Ok(Some(other)),
                _ => return Err(Error::provider_message(KEY, "page without a data envelope")),
            };
            match page.remove("data") {
                Some(Value::Array(items)) => rows.extend(items),
                Some(other) if page_no == 0 => return Ok(Some(other)),
                _ => return Err(Error::provider_message(KEY, "page data is not an array")),
            }
            next_token = page
                .get("next_token")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            if next_token.is_none() {
                return Ok(Some(Value::Array(rows)));
            }
        }
        tracing::warn!(pages = MAX_PAGES, "page limit reached; remaining pages skipped");
        Ok(Some(Value::Array(rows)))
    }

    fn row_id(&self, _dataset: &Dataset, row: &Value) -> Option<String> {
        field_id(row, "id").or_else(|| field_id(row, "day"))
    }
}

pub fn integration(base_url: &str) -> Result<Integration> {
    let base_url = base_url.trim_end_matches('/').to_string();
    let daily = |path| {
        Arc::new(DailyCollection {
            base_url: base_url.clone(),
            path,
        })
    };
    Integration::builder(KEY, "Oura", AuthType::Token)
        .object(ObjectDefinition::new(
            "personalInfo",
            "Personal info",
            Arc::new(PersonalInfo {
                base_url: base_url.clone(),
            }),
        ))
        .table(TableDefinition::new(
            "dailySleep",
            "Daily sleep",
            daily("/daily_sleep"),
        ))
        .table(TableDefinition::new(
            "dailyActivity",
            "Daily activity",
            daily("/daily_activity"),
        ))
        .build()
}
