//! Toggl Track connector.
//!
//! API token auth (HTTP basic with the `api_token` password), the `me`
//! profile as an object, time entries and projects as tables, and signed
//! webhook subscriptions per workspace.

use crate::http::{fetch_json, require_json};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde_json::{Value, json};
use std::sync::Arc;
use tapestry_core::integrations::{
    AuthType, FetchContext, Integration, ObjectDefinition, ObjectSource, RemoteSubscription,
    TableDefinition, TableSource, WebhookAction, WebhookContract, WebhookHooks, WebhookMessage,
    WebhookTarget, field_id,
};
use tapestry_core::models::Dataset;
use tapestry_core::{Error, Result};
use tracing::instrument;

pub const KEY: &str = "toggl";
pub const DEFAULT_BASE_URL: &str = "https://api.track.toggl.com";
pub const SIGNATURE_HEADER: &str = "x-webhook-signature-256";

#[derive(Debug, Clone)]
struct TogglApi {
    base_url: String,
}

impl TogglApi {
    fn request(&self, ctx: &FetchContext<'_>, method: Method, path: &str) -> Result<RequestBuilder> {
        let token = ctx.require_secret()?;
        Ok(ctx
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .basic_auth(token, Some("api_token")))
    }

    async fn get(&self, ctx: &FetchContext<'_>, path: &str) -> Result<Option<Value>> {
        fetch_json(KEY, self.request(ctx, Method::GET, &format!("/api/v9{path}"))?).await
    }

    async fn workspace_id(&self, ctx: &FetchContext<'_>) -> Result<String> {
        let me = require_json(KEY, self.request(ctx, Method::GET, "/api/v9/me")?).await?;
        field_id(&me, "default_workspace_id")
            .ok_or_else(|| Error::provider_message(KEY, "profile has no default_workspace_id"))
    }

    fn subscriptions_path(workspace_id: &str) -> String {
        format!("/webhooks/api/v1/subscriptions/{workspace_id}")
    }
}

/// A `/api/v9` resource keyed by its numeric `id`.
struct Resource {
    api: Arc<TogglApi>,
    path: &'static str,
}

#[async_trait]
impl TableSource for Resource {
    #[instrument(level = "debug", skip_all, fields(path = self.path))]
    async fn get(&self, ctx: &FetchContext<'_>) -> Result<Option<Value>> {
        self.api.get(ctx, self.path).await
    }

    fn row_id(&self, _dataset: &Dataset, row: &Value) -> Option<String> {
        field_id(row, "id")
    }
}

#[async_trait]
impl ObjectSource for Resource {
    #[instrument(level = "debug", skip_all, fields(path = self.path))]
    async fn get(&self, ctx: &FetchContext<'_>) -> Result<Option<Value>> {
        self.api.get(ctx, self.path).await
    }

    fn object_id(&self, dataset: &Dataset, data: &Value) -> String {
        field_id(data, "id").unwrap_or_else(|| dataset.id.to_string())
    }
}

struct TogglWebhooks {
    api: Arc<TogglApi>,
}

fn parse_action(raw: Option<&str>) -> Result<WebhookAction> {
    match raw {
        Some("created") => Ok(WebhookAction::Created),
        Some("updated") => Ok(WebhookAction::Updated),
        Some("deleted") => Ok(WebhookAction::Deleted),
        other => Err(Error::InvalidInput(format!(
            "unsupported webhook action {other:?}"
        ))),
    }
}

fn remote_from(value: &Value) -> Option<RemoteSubscription> {
    Some(RemoteSubscription {
        remote_id: field_id(value, "subscription_id")?,
        callback_url: value.get("url_callback")?.as_str()?.to_string(),
        secret: value
            .get("secret")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    })
}

#[async_trait]
impl WebhookHooks for TogglWebhooks {
    fn contract(&self) -> WebhookContract {
        WebhookContract {
            method: Method::POST,
            content_type: "application/json",
            signature_header: SIGNATURE_HEADER,
        }
    }

    fn parse(&self, body: &Value) -> Result<WebhookMessage> {
        if body.get("payload").and_then(Value::as_str) == Some("ping") {
            let code = body
                .get("validation_code")
                .cloned()
                .ok_or_else(|| Error::InvalidInput("ping without validation_code".to_string()))?;
            return Ok(WebhookMessage::Ping {
                subscription_id: field_id(body, "subscription_id"),
                reply: json!({ "validation_code": code }),
            });
        }

        let subscription_id = field_id(body, "subscription_id")
            .ok_or_else(|| Error::InvalidInput("missing subscription_id".to_string()))?;

        let meta = body
            .get("metadata")
            .ok_or_else(|| Error::InvalidInput("missing metadata".to_string()))?;
        let model = meta
            .get("model")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidInput("missing metadata.model".to_string()))?;
        let action = parse_action(meta.get("action").and_then(Value::as_str))?;
        let item = body
            .get("payload")
            .filter(|p| p.is_object())
            .cloned()
            .ok_or_else(|| Error::InvalidInput("payload must be an object".to_string()))?;

        Ok(WebhookMessage::Event {
            subscription_id,
            model: model.to_string(),
            action,
            item,
        })
    }

    fn resolve_target(&self, model: &str) -> Option<WebhookTarget> {
        match model {
            "time_entry" => Some(WebhookTarget::Table("timeEntries".to_string())),
            "project" => Some(WebhookTarget::Table("projects".to_string())),
            _ => None,
        }
    }

    #[instrument(level = "debug", skip_all)]
    async fn list_remote(&self, ctx: &FetchContext<'_>) -> Result<Vec<RemoteSubscription>> {
        let ws = self.api.workspace_id(ctx).await?;
        let req = self
            .api
            .request(ctx, Method::GET, &TogglApi::subscriptions_path(&ws))?;
        let listed = require_json(KEY, req).await?;
        let items = listed.as_array().cloned().unwrap_or_default();
        Ok(items.iter().filter_map(remote_from).collect())
    }

    #[instrument(level = "info", skip(self, ctx))]
    async fn create_remote(
        &self,
        ctx: &FetchContext<'_>,
        callback_url: &str,
    ) -> Result<RemoteSubscription> {
        let ws = self.api.workspace_id(ctx).await?;
        let req = self
            .api
            .request(ctx, Method::POST, &TogglApi::subscriptions_path(&ws))?
            .json(&json!({
                "url_callback": callback_url,
                "event_filters": [
                    { "entity": "time_entry", "action": "*" },
                    { "entity": "project", "action": "*" },
                ],
                "enabled": true,
                "description": format!("tapestry dataset {}", ctx.dataset.id),
            }));
        let created = require_json(KEY, req).await?;
        remote_from(&created)
            .ok_or_else(|| Error::provider_message(KEY, "subscription response is missing fields"))
    }
}

/// Toggl integration against `base_url` (normally [`DEFAULT_BASE_URL`]).
pub fn integration(base_url: &str) -> Result<Integration> {
    let api = Arc::new(TogglApi {
        base_url: base_url.trim_end_matches('/').to_string(),
    });
    let resource = |path| {
        Arc::new(Resource {
            api: api.clone(),
            path,
        })
    };
    Integration::builder(KEY, "Toggl Track", AuthType::Token)
        .object(ObjectDefinition::new("me", "Profile", resource("/me")))
        .table(TableDefinition::new(
            "timeEntries",
            "Time entries",
            resource("/me/time_entries"),
        ))
        .table(TableDefinition::new("projects", "Projects", resource("/me/projects")))
        .webhooks(Arc::new(TogglWebhooks { api: api.clone() }))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapestry_core::credentials::ResolvedCredential;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const AUTH: &str = "Basic dDphcGlfdG9rZW4=";

    fn dataset() -> Dataset {
        Dataset::new("toggl", Some(KEY.to_string()), None).unwrap()
    }

    fn hooks(integration: &Integration) -> Arc<dyn WebhookHooks> {
        integration.webhooks.clone().unwrap()
    }

    #[tokio::test]
    async fn time_entries_use_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v9/me/time_entries"))
            .and(header("authorization", AUTH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}, {"id": 2}])))
            .expect(1)
            .mount(&server)
            .await;

        let integration = integration(&server.uri()).unwrap();
        let ds = dataset();
        let cred = ResolvedCredential::Token("t".to_string());
        let http = reqwest::Client::new();
        let ctx = FetchContext {
            dataset: &ds,
            credential: &cred,
            http: &http,
        };
        let table = integration.table("timeEntries").unwrap();
        let got = table.source.get(&ctx).await.unwrap().unwrap();
        assert_eq!(got, json!([{"id": 1}, {"id": 2}]));
        assert_eq!(table.source.row_id(&ds, &got[0]).as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn rejected_token_is_no_value_yet() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v9/me"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let integration = integration(&server.uri()).unwrap();
        let ds = dataset();
        let cred = ResolvedCredential::Token("t".to_string());
        let http = reqwest::Client::new();
        let ctx = FetchContext {
            dataset: &ds,
            credential: &cred,
            http: &http,
        };
        let me = integration.object("me").unwrap();
        assert!(me.source.get(&ctx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn server_errors_surface_as_provider_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v9/me/projects"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let integration = integration(&server.uri()).unwrap();
        let ds = dataset();
        let cred = ResolvedCredential::Token("t".to_string());
        let http = reqwest::Client::new();
        let ctx = FetchContext {
            dataset: &ds,
            credential: &cred,
            http: &http,
        };
        let err = integration
            .table("projects")
            .unwrap()
            .source
            .get(&ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));
    }

    #[tokio::test]
    async fn creates_workspace_subscription() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v9/me"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": 7, "default_workspace_id": 99})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/webhooks/api/v1/subscriptions/99"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"subscription_id": 3, "url_callback": "https://other.test/hook"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/webhooks/api/v1/subscriptions/99"))
            .and(body_partial_json(json!({"url_callback": "https://me.test/webhooks/toggl", "enabled": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "subscription_id": 4,
                "url_callback": "https://me.test/webhooks/toggl",
                "secret": "s3cret"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let integration = integration(&server.uri()).unwrap();
        let hooks = hooks(&integration);
        let ds = dataset();
        let cred = ResolvedCredential::Token("t".to_string());
        let http = reqwest::Client::new();
        let ctx = FetchContext {
            dataset: &ds,
            credential: &cred,
            http: &http,
        };

        let listed = hooks.list_remote(&ctx).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].remote_id, "3");
        assert!(listed[0].secret.is_none());

        let created = hooks
            .create_remote(&ctx, "https://me.test/webhooks/toggl")
            .await
            .unwrap();
        assert_eq!(created.remote_id, "4");
        assert_eq!(created.secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn parses_ping_and_events() {
        let integration = integration(DEFAULT_BASE_URL).unwrap();
        let hooks = hooks(&integration);

        let ping = hooks
            .parse(&json!({"subscription_id": 4, "payload": "ping", "validation_code": "abc"}))
            .unwrap();
        assert_eq!(
            ping,
            WebhookMessage::Ping {
                subscription_id: Some("4".to_string()),
                reply: json!({"validation_code": "abc"}),
            }
        );

        let bare = hooks
            .parse(&json!({"payload": "ping", "validation_code": "abc"}))
            .unwrap();
        assert_eq!(bare.subscription_id(), None);

        let event = hooks
            .parse(&json!({
                "subscription_id": 4,
                "metadata": {"model": "time_entry", "action": "updated"},
                "payload": {"id": 10, "description": "x"}
            }))
            .unwrap();
        match event {
            WebhookMessage::Event { model, action, item, .. } => {
                assert_eq!(model, "time_entry");
                assert_eq!(action, WebhookAction::Updated);
                assert_eq!(item["id"], 10);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            hooks.resolve_target("time_entry"),
            Some(WebhookTarget::Table("timeEntries".to_string()))
        );
        assert_eq!(hooks.resolve_target("tag"), None);
    }

    #[test]
    fn rejects_malformed_deliveries() {
        let integration = integration(DEFAULT_BASE_URL).unwrap();
        let hooks = hooks(&integration);
        assert!(hooks.parse(&json!({"payload": "ping"})).is_err());
        assert!(
            hooks
                .parse(&json!({"subscription_id": 1, "metadata": {"model": "time_entry", "action": "archived"}, "payload": {}}))
                .is_err()
        );
        assert!(
            hooks
                .parse(&json!({"subscription_id": 1, "metadata": {"model": "time_entry", "action": "created"}, "payload": "x"}))
                .is_err()
        );
    }
}
