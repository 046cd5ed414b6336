//! In-process fixture integrations for tests.

use crate::integrations::{
    AuthType, FetchContext, Integration, ObjectDefinition, ObjectSource, RemoteSubscription,
    TableDefinition, TableSource, WebhookAction, WebhookContract, WebhookHooks, WebhookMessage,
    WebhookTarget, field_id,
};
use crate::models::Dataset;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Table returning a settable value; rows are identified by their `id` field.
pub struct StaticTable {
    value: Mutex<Value>,
    calls: AtomicUsize,
}

impl StaticTable {
    pub fn new(value: Value) -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(value),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set(&self, value: Value) {
        *lock(&self.value) = value;
    }

    /// Number of times the getter ran.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TableSource for StaticTable {
    async fn get(&self, _ctx: &FetchContext<'_>) -> Result<Option<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(lock(&self.value).clone()))
    }

    fn row_id(&self, _dataset: &Dataset, row: &Value) -> Option<String> {
        field_id(row, "id")
    }
}

/// Object returning a settable value; `null` means "no value yet".
pub struct StaticObject {
    value: Mutex<Value>,
    calls: AtomicUsize,
}

impl StaticObject {
    pub fn new(value: Value) -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(value),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set(&self, value: Value) {
        *lock(&self.value) = value;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectSource for StaticObject {
    async fn get(&self, _ctx: &FetchContext<'_>) -> Result<Option<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(lock(&self.value).clone()))
    }

    fn object_id(&self, dataset: &Dataset, data: &Value) -> String {
        field_id(data, "id").unwrap_or_else(|| dataset.id.to_string())
    }
}

/// Table whose getter always fails.
pub struct FailingTable {
    message: String,
}

impl FailingTable {
    pub fn new(message: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            message: message.into(),
        })
    }
}

#[async_trait]
impl TableSource for FailingTable {
    async fn get(&self, _ctx: &FetchContext<'_>) -> Result<Option<Value>> {
        Err(Error::provider_message("fixture", self.message.clone()))
    }

    fn row_id(&self, _dataset: &Dataset, _row: &Value) -> Option<String> {
        None
    }
}

/// Webhook hooks speaking a Toggl-shaped payload, with an in-memory remote side.
///
/// Models: `time_entry` -> table `timeEntries`, `user` -> object `me`.
pub struct FakeWebhooks {
    secret: String,
    remote: Mutex<Vec<RemoteSubscription>>,
    created: AtomicUsize,
    failing_creates: AtomicUsize,
}

impl FakeWebhooks {
    pub fn new(secret: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            secret: secret.into(),
            remote: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
            failing_creates: AtomicUsize::new(0),
        })
    }

    /// Make the next `n` calls to `create_remote` fail.
    pub fn fail_next_creates(&self, n: usize) {
        self.failing_creates.store(n, Ordering::SeqCst);
    }

    pub fn push_remote(&self, sub: RemoteSubscription) {
        lock(&self.remote).push(sub);
    }

    /// Number of subscriptions created through `create_remote`.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebhookHooks for FakeWebhooks {
    fn contract(&self) -> WebhookContract {
        WebhookContract {
            method: reqwest::Method::POST,
            content_type: "application/json",
            signature_header: "x-webhook-signature-256",
        }
    }

    fn parse(&self, body: &Value) -> Result<WebhookMessage> {
        if body.get("payload").and_then(Value::as_str) == Some("ping") {
            return Ok(WebhookMessage::Ping {
                subscription_id: field_id(body, "subscription_id"),
                reply: json!({ "validation_code": body.get("validation_code").cloned().unwrap_or(Value::Null) }),
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
        let action = match meta.get("action").and_then(Value::as_str) {
            Some("created") => WebhookAction::Created,
            Some("updated") => WebhookAction::Updated,
            Some("deleted") => WebhookAction::Deleted,
            other => return Err(Error::InvalidInput(format!("unknown action {other:?}"))),
        };
        Ok(WebhookMessage::Event {
            subscription_id,
            model: model.to_string(),
            action,
            item: body.get("payload").cloned().unwrap_or(Value::Null),
        })
    }

    fn resolve_target(&self, model: &str) -> Option<WebhookTarget> {
        match model {
            "time_entry" => Some(WebhookTarget::Table("timeEntries".to_string())),
            "user" => Some(WebhookTarget::Object("me".to_string())),
            _ => None,
        }
    }

    async fn list_remote(&self, _ctx: &FetchContext<'_>) -> Result<Vec<RemoteSubscription>> {
        Ok(lock(&self.remote).clone())
    }

    async fn create_remote(
        &self,
        _ctx: &FetchContext<'_>,
        callback_url: &str,
    ) -> Result<RemoteSubscription> {
        let failing = self
            .failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(Error::provider_message("fixture", "subscription create failed"));
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        let sub = RemoteSubscription {
            remote_id: format!("fake-{}", n + 1),
            callback_url: callback_url.to_string(),
            // Like real providers, listing does not reveal the secret again.
            secret: None,
        };
        lock(&self.remote).push(sub.clone());
        Ok(RemoteSubscription {
            secret: Some(self.secret.clone()),
            ..sub
        })
    }
}

/// Token-auth integration with object `me` (id 42) and table `timeEntries`.
pub fn fixture_integration(key: &str, entries: Arc<StaticTable>) -> Integration {
    fixture_builder(key, entries)
        .build()
        .unwrap_or_else(|e| panic!("fixture integration is valid: {e}"))
}

/// `fixture_integration` plus webhook hooks.
pub fn fixture_integration_with_webhooks(
    key: &str,
    entries: Arc<StaticTable>,
    hooks: Arc<FakeWebhooks>,
) -> Integration {
    fixture_builder(key, entries)
        .webhooks(hooks)
        .build()
        .unwrap_or_else(|e| panic!("fixture integration is valid: {e}"))
}

fn fixture_builder(key: &str, entries: Arc<StaticTable>) -> crate::integrations::IntegrationBuilder {
    Integration::builder(key, format!("Fixture {key}"), AuthType::Token)
        .object(ObjectDefinition::new(
            "me",
            "Me",
            StaticObject::new(json!({"id": 42, "fullname": "Fixture"})),
        ))
        .table(TableDefinition::new("timeEntries", "Time entries", entries))
}
