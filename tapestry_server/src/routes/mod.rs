use axum::Router;
use axum::routing::get;

pub mod datasets;
pub mod health;
pub mod integrations;
pub mod oauth;
pub mod operations;
pub mod webhooks;

#[tracing::instrument(level = "debug", skip_all)]
pub fn router(max_webhook_bytes: usize) -> Router {
    Router::new()
        .merge(webhooks::router(max_webhook_bytes))
        .merge(oauth::router())
        .merge(api_v1_router())
}

#[tracing::instrument(level = "debug", skip_all)]
fn api_v1_router() -> Router {
    Router::new().nest(
        "/api/v1",
        Router::new()
            .route("/health", get(health::get_health))
            .merge(datasets::router())
            .merge(integrations::router())
            .merge(operations::router()),
    )
}

#[cfg(test)]
mod tests {
    use crate::server::{AppState, router};
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use axum::response::Response;
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tapestry_core::credentials::SecretBox;
    use tapestry_core::integrations::{AuthType, Integration, OAuthHooks, TableDefinition};
    use tapestry_core::models::{Credentials, Dataset, WebhookSubscription};
    use tapestry_core::store::{MemoryStore, Store};
    use tapestry_core::testing::{
        FakeWebhooks, StaticTable, fixture_integration, fixture_integration_with_webhooks,
    };
    use tapestry_core::webhooks::sign_body;
    use tapestry_core::{EngineConfig, IntegrationRegistry};
    use tower::ServiceExt;

    const SIG: &str = "x-webhook-signature-256";
    const SECRET: &str = "s3cret";

    struct FakeOAuth;

    #[async_trait]
    impl OAuthHooks for FakeOAuth {
        fn oauth_url(
            &self,
            _base_url: &str,
            _dataset: &Dataset,
            state: &str,
        ) -> tapestry_core::Result<String> {
            Ok(format!("https://provider.test/authorize?state={state}"))
        }

        async fn oauth_callback(
            &self,
            _http: &reqwest::Client,
            _base_url: &str,
            _dataset: &Dataset,
            query: &HashMap<String, String>,
        ) -> tapestry_core::Result<Credentials> {
            let code = query
                .get("code")
                .ok_or_else(|| tapestry_core::Error::InvalidInput("missing code".into()))?;
            Ok(Credentials::OAuth2 {
                access_token: format!("token-for-{code}"),
                refresh_token: None,
                expires_at: None,
            })
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        entries: Arc<StaticTable>,
        state: AppState,
    }

    fn harness() -> Harness {
        let entries = StaticTable::new(json!([{"id": 1, "description": "A"}]));
        let oauth = Integration::builder("oauthfix", "OAuth fixture", AuthType::OAuth2)
            .table(TableDefinition::new("items", "Items", StaticTable::new(json!([]))))
            .oauth(Arc::new(FakeOAuth))
            .build()
            .unwrap();
        let registry = IntegrationRegistry::builder()
            .register(fixture_integration_with_webhooks(
                "fixture",
                entries.clone(),
                FakeWebhooks::new(SECRET),
            ))
            .unwrap()
            .register(fixture_integration("plain", StaticTable::new(json!([]))))
            .unwrap()
            .register(oauth)
            .unwrap()
            .build();

        let store = Arc::new(MemoryStore::new());
        let cfg = EngineConfig {
            public_base_url: Some("https://tapestry.test".to_string()),
            max_webhook_bytes: 4096,
            ..EngineConfig::default()
        };
        let state = AppState::new(
            store.clone(),
            Arc::new(registry),
            &SecretBox::new(&[7u8; 32]),
            cfg,
        )
        .unwrap();
        Harness {
            store,
            entries,
            state,
        }
    }

    async fn send(h: &Harness, req: Request<Body>) -> Response {
        router(h.state.clone()).oneshot(req).await.unwrap()
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn webhook(body: &str, signature: Option<String>) -> Request<Body> {
        let mut req = Request::post("/webhooks/fixture").header(header::CONTENT_TYPE, "application/json");
        if let Some(sig) = signature {
            req = req.header(SIG, sig);
        }
        req.body(Body::from(body.to_string())).unwrap()
    }

    async fn dataset_with_subscription(h: &Harness) -> Dataset {
        let ds = Dataset::new("acme", Some("fixture".to_string()), None)
            .unwrap()
            .with_credentials(Credentials::Token {
                token: "t".to_string(),
            });
        h.store.upsert_dataset(&ds).await.unwrap();
        let sub = WebhookSubscription::new_pending(
            ds.id,
            "fixture",
            "7",
            "https://tapestry.test/webhooks/fixture",
            SECRET,
            chrono::Utc::now(),
        )
        .unwrap();
        h.store.put_subscription(&sub).await.unwrap();
        ds
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let h = harness();
        for uri in ["/health", "/api/v1/health"] {
            let resp = send(&h, Request::get(uri).body(Body::empty()).unwrap()).await;
            assert_eq!(resp.status(), StatusCode::OK);
            assert!(resp.headers().contains_key("x-request-id"));
            let body = body_json(resp).await;
            assert_eq!(body["status"], "ok");
            assert_eq!(body["integrations"], 3);
        }
    }

    #[tokio::test]
    async fn create_sync_and_read_rows() {
        let h = harness();
        let resp = send(
            &h,
            post_json(
                "/api/v1/datasets",
                json!({
                    "name": "acme",
                    "integration_type": "fixture",
                    "credentials": {"type": "token", "token": "secret-token-value"}
                }),
            ),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created = body_json(resp).await;
        assert_eq!(created["credentials"]["token"], "secr...alue");
        assert!(!created.to_string().contains("secret-token-value"));
        let id = created["id"].as_str().unwrap().to_string();

        let resp = send(
            &h,
            Request::post(format!("/api/v1/datasets/{id}/sync"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(h.entries.calls(), 1);

        let resp = send(
            &h,
            Request::get(format!("/api/v1/datasets/{id}/tables/timeEntries/rows"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let page = body_json(resp).await;
        assert_eq!(page["total"], 1);
        assert_eq!(page["rows"][0]["source_id"], "1");
        assert_eq!(page["rows"][0]["data"], json!({"id": 1, "description": "A"}));

        let resp = send(
            &h,
            Request::get(format!("/api/v1/datasets/{id}/objects/me"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["data"]["fullname"], "Fixture");

        let resp = send(
            &h,
            Request::get(format!("/api/v1/datasets/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        let detail = body_json(resp).await;
        assert_eq!(detail["tables"][0]["key"], "timeEntries");
        assert_eq!(detail["objects"], json!(["me"]));
    }

    #[tokio::test]
    async fn rejects_unknown_integration_and_missing_dataset() {
        let h = harness();
        let resp = send(
            &h,
            post_json("/api/v1/datasets", json!({"name": "x", "integration_type": "nope"})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let missing = uuid::Uuid::new_v4();
        let resp = send(
            &h,
            Request::delete(format!("/api/v1/datasets/{missing}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = send(
            &h,
            Request::get("/api/v1/datasets/not-a-uuid")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_removes_dataset() {
        let h = harness();
        let ds = dataset_with_subscription(&h).await;
        let resp = send(
            &h,
            Request::delete(format!("/api/v1/datasets/{}", ds.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(h.store.get_dataset(ds.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lists_integrations() {
        let h = harness();
        let resp = send(&h, Request::get("/api/v1/integrations").body(Body::empty()).unwrap()).await;
        let list = body_json(resp).await;
        let keys: Vec<_> = list
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["key"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(keys, vec!["fixture", "oauthfix", "plain"]);
        assert_eq!(list[0]["webhooks"], true);
        assert_eq!(list[1]["auth_type"], "oauth2");
    }

    #[tokio::test]
    async fn webhook_ping_echoes_validation_code() {
        let h = harness();
        let ds = dataset_with_subscription(&h).await;
        let body = r#"{"subscription_id":7,"payload":"ping","validation_code":"abc"}"#;
        let sig = sign_body(SECRET, body.as_bytes()).unwrap();

        let resp = send(&h, webhook(body, Some(sig))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({"validation_code": "abc"}));
        assert_eq!(h.store.data_writes(), 0);
        let subs = h.store.list_subscriptions(ds.id).await.unwrap();
        assert_eq!(subs[0].state, tapestry_core::models::SubscriptionState::Validated);
    }

    #[tokio::test]
    async fn webhook_event_upserts_once_and_rejects_tampering() {
        let h = harness();
        let ds = dataset_with_subscription(&h).await;
        let body = r#"{"subscription_id":7,"metadata":{"model":"time_entry","action":"created"},"payload":{"id":5,"description":"hook"}}"#;
        let sig = sign_body(SECRET, body.as_bytes()).unwrap();

        let tampered = body.replace("hook", "evil");
        let resp = send(&h, webhook(&tampered, Some(sig.clone()))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = send(&h, webhook(body, None)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(h.store.data_writes(), 0);

        let resp = send(&h, webhook(body, Some(sig.clone()))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "changed");
        let resp = send(&h, webhook(body, Some(sig))).await;
        assert_eq!(body_json(resp).await["status"], "unchanged");
        assert_eq!(h.store.data_writes(), 1);

        let table = h.store.get_table(ds.id, "timeEntries").await.unwrap().unwrap();
        let row = h.store.get_row(table.id, "5").await.unwrap().unwrap();
        assert_eq!(row.data["description"], "hook");
    }

    #[tokio::test]
    async fn webhook_contract_violations_are_rejected() {
        let h = harness();
        dataset_with_subscription(&h).await;

        let resp = send(
            &h,
            Request::get("/webhooks/fixture").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let big = format!(r#"{{"subscription_id":7,"pad":"{}"}}"#, "x".repeat(8192));
        let resp = send(&h, webhook(&big, None)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = send(
            &h,
            post_json("/webhooks/unknown", json!({"subscription_id": 7})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unmatched_subscription_is_acknowledged() {
        let h = harness();
        let body = r#"{"subscription_id":99,"metadata":{"model":"time_entry","action":"created"},"payload":{"id":1}}"#;
        let resp = send(&h, webhook(body, None)).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(h.store.data_writes(), 0);
    }

    #[tokio::test]
    async fn ping_without_subscription_id_is_echoed() {
        let h = harness();
        let ds = dataset_with_subscription(&h).await;
        let body = r#"{"payload":"ping","validation_code":"abc"}"#;

        let resp = send(&h, webhook(body, None)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({"validation_code": "abc"}));
        assert_eq!(h.store.data_writes(), 0);
        let subs = h.store.list_subscriptions(ds.id).await.unwrap();
        assert_eq!(subs[0].state, tapestry_core::models::SubscriptionState::Pending);
    }

    #[tokio::test]
    async fn oauth_round_trip_stores_credentials() {
        let h = harness();
        let ds = Dataset::new("gh", Some("oauthfix".to_string()), None).unwrap();
        h.store.upsert_dataset(&ds).await.unwrap();

        let resp = send(
            &h,
            Request::get(format!("/oauth/start/{}", ds.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert!(resp.status().is_redirection());
        let location = resp.headers()[header::LOCATION].to_str().unwrap().to_string();
        let state = location.split("state=").nth(1).unwrap().to_string();

        let resp = send(
            &h,
            Request::get(format!("/oauth/callback/{}?code=abc&state=forged", ds.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = send(
            &h,
            Request::get(format!("/oauth/callback/{}?code=abc&state={state}", ds.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert!(resp.status().is_redirection());
        let stored = h.store.get_dataset(ds.id).await.unwrap().unwrap();
        match stored.credentials {
            Some(Credentials::OAuth2 { access_token, .. }) => {
                assert_eq!(access_token, "token-for-abc")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn oauth_needs_dataset_and_hooks() {
        let h = harness();
        let resp = send(
            &h,
            Request::get(format!("/oauth/start/{}", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let ds = Dataset::new("plain", Some("plain".to_string()), None).unwrap();
        h.store.upsert_dataset(&ds).await.unwrap();
        let resp = send(
            &h,
            Request::get(format!("/oauth/start/{}", ds.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn operation_stream_is_server_sent_events() {
        let h = harness();
        let resp = send(
            &h,
            Request::get("/api/v1/operations/stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE].to_str().unwrap(),
            "text/event-stream"
        );
        assert_eq!(h.state.bus.subscriber_count(), 1);
        drop(resp);
        assert_eq!(h.state.bus.subscriber_count(), 0);
    }
}
