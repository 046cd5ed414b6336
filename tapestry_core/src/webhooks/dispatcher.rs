use crate::integrations::{
    Integration, IntegrationRegistry, WebhookAction, WebhookHooks, WebhookMessage, WebhookTarget,
};
use crate::models::{SubscriptionState, WebhookSubscription};
use crate::store::Store;
use crate::sync::{UpsertOutcome, Upserter};
use crate::webhooks::error::WebhookError;
use crate::webhooks::signature::verify_signature;
use bytes::Bytes;
use chrono::Utc;
use reqwest::{Method, StatusCode};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_MAX_WEBHOOK_BYTES: usize = 1024 * 1024;

/// A framework-neutral inbound webhook request.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub method: Method,
    /// Header names are lowercase.
    headers: HashMap<String, String>,
    pub body: Bytes,
}

impl WebhookRequest {
    pub fn new(method: Method, body: impl Into<Bytes>) -> Self {
        Self {
            method,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Media type of `content-type` without parameters, lowercased.
    pub fn media_type(&self) -> Option<String> {
        self.header("content-type").map(|v| {
            v.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookReply {
    pub status: StatusCode,
    pub body: Option<serde_json::Value>,
}

impl WebhookReply {
    fn ok(body: serde_json::Value) -> Self {
        Self {
            status: StatusCode::OK,
            body: Some(body),
        }
    }

    fn accepted() -> Self {
        Self {
            status: StatusCode::NO_CONTENT,
            body: None,
        }
    }

    fn rejected(err: &WebhookError) -> Self {
        let status = err.status();
        let body = (status != StatusCode::NO_CONTENT).then(|| json!({ "error": err.to_string() }));
        Self { status, body }
    }
}

/// Validates provider push notifications and routes them into the upsert path
/// shared with polling.
#[derive(Clone)]
pub struct WebhookDispatcher {
    registry: Arc<IntegrationRegistry>,
    store: Arc<dyn Store>,
    upserter: Upserter,
    max_body_bytes: usize,
}

impl WebhookDispatcher {
    pub fn new(registry: Arc<IntegrationRegistry>, store: Arc<dyn Store>, upserter: Upserter) -> Self {
        Self {
            registry,
            store,
            upserter,
            max_body_bytes: DEFAULT_MAX_WEBHOOK_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Answer one delivery. Rejections and internal failures become replies.
    #[tracing::instrument(level = "info", skip(self, req), fields(method = %req.method, bytes = req.body.len()))]
    pub async fn handle(&self, integration_key: &str, req: WebhookRequest) -> WebhookReply {
        match self.dispatch(integration_key, &req).await {
            Ok(reply) => reply,
            Err(err) => {
                match &err {
                    WebhookError::Core(e) => {
                        tracing::error!(integration = integration_key, error = %e, "webhook handling failed")
                    }
                    other => {
                        tracing::warn!(integration = integration_key, error = %other, "webhook rejected")
                    }
                }
                WebhookReply::rejected(&err)
            }
        }
    }

    async fn dispatch(
        &self,
        integration_key: &str,
        req: &WebhookRequest,
    ) -> Result<WebhookReply, WebhookError> {
        let integration = self
            .registry
            .get(integration_key)
            .ok_or_else(|| WebhookError::UnknownIntegration(integration_key.to_string()))?;
        let hooks = integration
            .webhooks
            .clone()
            .ok_or_else(|| WebhookError::UnknownIntegration(integration_key.to_string()))?;

        let contract = hooks.contract();
        if req.method != contract.method {
            return Err(WebhookError::MethodNotAllowed(req.method.to_string()));
        }
        let media_type = req.media_type().unwrap_or_default();
        if media_type != contract.content_type {
            return Err(WebhookError::UnsupportedContentType(media_type));
        }
        if req.body.len() > self.max_body_bytes {
            return Err(WebhookError::BodyTooLarge {
                limit: self.max_body_bytes,
            });
        }

        let body: serde_json::Value = serde_json::from_slice(&req.body)
            .map_err(|e| WebhookError::MalformedBody(e.to_string()))?;
        let message = hooks
            .parse(&body)
            .map_err(|e| WebhookError::MalformedBody(e.to_string()))?;

        let subscription = match message.subscription_id() {
            Some(id) => self.store.get_subscription(integration_key, id).await?,
            None => None,
        };
        let Some(subscription) = subscription else {
            return Ok(match message {
                // Handshake for a subscription we hold no record of: echo only.
                WebhookMessage::Ping {
                    subscription_id,
                    reply,
                } => {
                    tracing::info!(
                        integration = integration_key,
                        subscription_id = subscription_id.as_deref().unwrap_or("-"),
                        "webhook ping echoed without a local subscription"
                    );
                    WebhookReply::ok(reply)
                }
                // Benign race with subscription creation.
                WebhookMessage::Event {
                    subscription_id, ..
                } => {
                    tracing::warn!(
                        integration = integration_key,
                        subscription_id = subscription_id.as_str(),
                        "webhook.subscription_missing"
                    );
                    WebhookReply::accepted()
                }
            });
        };

        verify_signature(
            &subscription.secret,
            contract.signature_header,
            req.header(contract.signature_header),
            &req.body,
        )?;

        match message {
            WebhookMessage::Ping { reply, .. } => {
                self.mark_validated(subscription).await?;
                Ok(WebhookReply::ok(reply))
            }
            WebhookMessage::Event {
                action: WebhookAction::Deleted,
                model,
                ..
            } => {
                tracing::debug!(model = %model, "delete event acknowledged without mutation");
                Ok(WebhookReply::accepted())
            }
            WebhookMessage::Event { model, item, .. } => {
                let outcome = self
                    .apply_event(&integration, hooks.as_ref(), &subscription, &model, item)
                    .await?;
                let status = match outcome {
                    UpsertOutcome::Changed => "changed",
                    UpsertOutcome::Unchanged => "unchanged",
                };
                Ok(WebhookReply::ok(json!({ "status": status })))
            }
        }
    }

    async fn mark_validated(&self, mut subscription: WebhookSubscription) -> Result<(), WebhookError> {
        if subscription.state == SubscriptionState::Validated {
            return Ok(());
        }
        subscription.state = SubscriptionState::Validated;
        subscription.updated_at = Utc::now();
        self.store.put_subscription(&subscription).await?;
        tracing::info!(
            integration = %subscription.integration,
            remote_id = %subscription.remote_id,
            "webhook subscription validated"
        );
        Ok(())
    }

    async fn apply_event(
        &self,
        integration: &Integration,
        hooks: &dyn WebhookHooks,
        subscription: &WebhookSubscription,
        model: &str,
        item: serde_json::Value,
    ) -> Result<UpsertOutcome, WebhookError> {
        let target = hooks
            .resolve_target(model)
            .ok_or_else(|| WebhookError::UnknownTarget(model.to_string()))?;
        let dataset = self
            .store
            .get_dataset(subscription.dataset_id)
            .await?
            .ok_or_else(|| {
                crate::Error::NotFound(format!(
                    "dataset {} of webhook subscription {}",
                    subscription.dataset_id, subscription.remote_id
                ))
            })?;

        match target {
            WebhookTarget::Table(key) => {
                let def = integration
                    .table(&key)
                    .ok_or_else(|| WebhookError::UnknownTarget(model.to_string()))?;
                let source_id = def.source.row_id(&dataset, &item).ok_or_else(|| {
                    WebhookError::MalformedBody(format!("{model} item has no identity"))
                })?;
                let binding = self.store.get_or_create_table(dataset.id, &key).await?;
                Ok(self
                    .upserter
                    .upsert_row(&binding.table, &source_id, item)
                    .await?)
            }
            WebhookTarget::Object(key) => {
                let def = integration
                    .object(&key)
                    .ok_or_else(|| WebhookError::UnknownTarget(model.to_string()))?;
                let source_id = def.source.object_id(&dataset, &item);
                Ok(self
                    .upserter
                    .upsert_object(dataset.id, &key, &source_id, item)
                    .await?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Credentials, Dataset, ListQuery};
    use crate::operations::OperationBus;
    use crate::store::MemoryStore;
    use crate::testing::{FakeWebhooks, StaticTable, fixture_integration_with_webhooks};
    use crate::webhooks::signature::sign_body;

    const SIG: &str = "x-webhook-signature-256";

    struct Harness {
        store: MemoryStore,
        bus: OperationBus,
        dispatcher: WebhookDispatcher,
        dataset: Dataset,
    }

    async fn harness() -> Harness {
        let store = MemoryStore::new();
        let bus = OperationBus::default();
        let integration = fixture_integration_with_webhooks(
            "toggl",
            StaticTable::new(json!([])),
            FakeWebhooks::new("unused"),
        );
        let registry = IntegrationRegistry::builder()
            .register(integration)
            .unwrap()
            .build();
        let dataset = Dataset::new("d", Some("toggl".to_string()), None)
            .unwrap()
            .with_credentials(Credentials::Token {
                token: "t".to_string(),
            });
        store.upsert_dataset(&dataset).await.unwrap();
        let dispatcher = WebhookDispatcher::new(
            Arc::new(registry),
            Arc::new(store.clone()),
            Upserter::new(Arc::new(store.clone()), bus.clone()),
        );
        Harness {
            store,
            bus,
            dispatcher,
            dataset,
        }
    }

    async fn subscribe(h: &Harness, remote_id: &str, secret: &str) {
        let sub = WebhookSubscription::new_pending(
            h.dataset.id,
            "toggl",
            remote_id,
            "https://tap.test/webhooks/toggl",
            secret,
            Utc::now(),
        )
        .unwrap();
        h.store.put_subscription(&sub).await.unwrap();
    }

    fn signed(body: &serde_json::Value, secret: &str) -> WebhookRequest {
        let raw = serde_json::to_vec(body).unwrap();
        let sig = sign_body(secret, &raw).unwrap();
        WebhookRequest::new(Method::POST, raw)
            .with_header("Content-Type", "application/json; charset=utf-8")
            .with_header(SIG, sig)
    }

    fn event(action: &str, item: serde_json::Value) -> serde_json::Value {
        json!({
            "subscription_id": 7,
            "metadata": {"model": "time_entry", "action": action},
            "payload": item,
        })
    }

    #[tokio::test]
    async fn ping_is_echoed_and_validates_the_subscription() {
        let h = harness().await;
        subscribe(&h, "7", "whsec").await;
        let writes = h.store.data_writes();

        let body = json!({"subscription_id": 7, "payload": "ping", "validation_code": "abc"});
        let reply = h.dispatcher.handle("toggl", signed(&body, "whsec")).await;

        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body, Some(json!({"validation_code": "abc"})));
        assert_eq!(h.store.data_writes(), writes);
        let sub = h.store.get_subscription("toggl", "7").await.unwrap().unwrap();
        assert_eq!(sub.state, SubscriptionState::Validated);
    }

    #[tokio::test]
    async fn bare_ping_is_echoed_without_state_change() {
        let h = harness().await;
        subscribe(&h, "7", "whsec").await;
        let raw = serde_json::to_vec(&json!({"payload": "ping", "validation_code": "abc"})).unwrap();
        let req = WebhookRequest::new(Method::POST, raw).with_header("content-type", "application/json");

        let reply = h.dispatcher.handle("toggl", req).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body, Some(json!({"validation_code": "abc"})));
        assert_eq!(h.store.data_writes(), 0);
        let sub = h.store.get_subscription("toggl", "7").await.unwrap().unwrap();
        assert_eq!(sub.state, SubscriptionState::Pending);
    }

    #[tokio::test]
    async fn ping_for_a_known_subscription_still_needs_a_signature() {
        let h = harness().await;
        subscribe(&h, "7", "whsec").await;
        let raw = serde_json::to_vec(&json!({"subscription_id": 7, "payload": "ping", "validation_code": "abc"}))
            .unwrap();
        let req = WebhookRequest::new(Method::POST, raw)
            .with_header("content-type", "application/json")
            .with_header(SIG, "sha256=00");

        let reply = h.dispatcher.handle("toggl", req).await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        let sub = h.store.get_subscription("toggl", "7").await.unwrap().unwrap();
        assert_eq!(sub.state, SubscriptionState::Pending);
    }

    #[tokio::test]
    async fn tampered_body_is_rejected_without_mutation() {
        let h = harness().await;
        subscribe(&h, "7", "whsec").await;

        let original = event("updated", json!({"id": 1, "description": "A"}));
        let sig = sign_body("whsec", &serde_json::to_vec(&original).unwrap()).unwrap();
        let tampered = serde_json::to_vec(&event("updated", json!({"id": 1, "description": "X"})))
            .unwrap();
        let req = WebhookRequest::new(Method::POST, tampered)
            .with_header("content-type", "application/json")
            .with_header(SIG, sig);

        let reply = h.dispatcher.handle("toggl", req).await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(h.store.data_writes(), 0);
        assert!(h.store.get_table(h.dataset.id, "timeEntries").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn replayed_event_applies_once() {
        let h = harness().await;
        subscribe(&h, "7", "whsec").await;
        let mut ops = h.bus.subscribe();
        let body = event("created", json!({"id": 1, "description": "A"}));

        let first = h.dispatcher.handle("toggl", signed(&body, "whsec")).await;
        let second = h.dispatcher.handle("toggl", signed(&body, "whsec")).await;

        assert_eq!(first.body, Some(json!({"status": "changed"})));
        assert_eq!(second.body, Some(json!({"status": "unchanged"})));
        assert_eq!(h.store.data_writes(), 1);
        assert_eq!(ops.drain().len(), 1);

        let table = h.store.get_table(h.dataset.id, "timeEntries").await.unwrap().unwrap();
        let rows = h.store.list_rows(table.id, ListQuery::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source_id, "1");
    }

    #[tokio::test]
    async fn unknown_subscription_is_acknowledged_without_mutation() {
        let h = harness().await;
        let body = event("created", json!({"id": 1}));
        let reply = h.dispatcher.handle("toggl", signed(&body, "whatever")).await;
        assert_eq!(reply.status, StatusCode::NO_CONTENT);
        assert_eq!(h.store.data_writes(), 0);

        // Once the subscription lands, the same delivery is applied.
        subscribe(&h, "7", "whsec").await;
        let reply = h.dispatcher.handle("toggl", signed(&body, "whsec")).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(h.store.data_writes(), 1);
    }

    #[tokio::test]
    async fn contract_violations_are_rejected() {
        let h = harness().await;
        subscribe(&h, "7", "whsec").await;
        let body = event("created", json!({"id": 1}));

        let mut wrong_method = signed(&body, "whsec");
        wrong_method.method = Method::PUT;
        assert_eq!(
            h.dispatcher.handle("toggl", wrong_method).await.status,
            StatusCode::BAD_REQUEST
        );

        let raw = serde_json::to_vec(&body).unwrap();
        let wrong_type = WebhookRequest::new(Method::POST, raw.clone())
            .with_header("content-type", "text/plain")
            .with_header(SIG, sign_body("whsec", &raw).unwrap());
        assert_eq!(
            h.dispatcher.handle("toggl", wrong_type).await.status,
            StatusCode::BAD_REQUEST
        );

        let unsigned = WebhookRequest::new(Method::POST, raw)
            .with_header("content-type", "application/json");
        assert_eq!(
            h.dispatcher.handle("toggl", unsigned).await.status,
            StatusCode::BAD_REQUEST
        );

        let garbage = WebhookRequest::new(Method::POST, "not json")
            .with_header("content-type", "application/json");
        assert_eq!(
            h.dispatcher.handle("toggl", garbage).await.status,
            StatusCode::BAD_REQUEST
        );

        assert_eq!(
            h.dispatcher.handle("notion", signed(&body, "whsec")).await.status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(h.store.data_writes(), 0);
    }

    #[tokio::test]
    async fn oversized_bodies_are_rejected() {
        let mut h = harness().await;
        subscribe(&h, "7", "whsec").await;
        h.dispatcher = h.dispatcher.with_max_body_bytes(16);
        let body = event("created", json!({"id": 1, "description": "long enough"}));
        let reply = h.dispatcher.handle("toggl", signed(&body, "whsec")).await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_and_unknown_models_are_acknowledged() {
        let h = harness().await;
        subscribe(&h, "7", "whsec").await;

        let deleted = event("deleted", json!({"id": 1}));
        let reply = h.dispatcher.handle("toggl", signed(&deleted, "whsec")).await;
        assert_eq!(reply.status, StatusCode::NO_CONTENT);

        let unknown = json!({
            "subscription_id": 7,
            "metadata": {"model": "tag", "action": "created"},
            "payload": {"id": 3},
        });
        let reply = h.dispatcher.handle("toggl", signed(&unknown, "whsec")).await;
        assert_eq!(reply.status, StatusCode::NO_CONTENT);
        assert_eq!(h.store.data_writes(), 0);
    }

    #[tokio::test]
    async fn object_events_use_the_object_path() {
        let h = harness().await;
        subscribe(&h, "7", "whsec").await;
        let body = json!({
            "subscription_id": 7,
            "metadata": {"model": "user", "action": "updated"},
            "payload": {"id": 42, "fullname": "Ada"},
        });
        let reply = h.dispatcher.handle("toggl", signed(&body, "whsec")).await;
        assert_eq!(reply.status, StatusCode::OK);
        let obj = h.store.get_object(h.dataset.id, "me").await.unwrap().unwrap();
        assert_eq!(obj.source_id, "42");
    }
}
