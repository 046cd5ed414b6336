use crate::credentials::ResolvedCredential;
use crate::models::{Credentials, Dataset};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    None,
    Token,
    #[serde(rename = "oauth2")]
    OAuth2,
}

/// Everything a provider getter receives.
///
/// A `FetchContext` only exists once the dataset's credential resolved, so a
/// getter can never be called unauthenticated.
pub struct FetchContext<'a> {
    pub dataset: &'a Dataset,
    pub credential: &'a ResolvedCredential,
    /// Shared outbound client; its timeout bounds every provider call.
    pub http: &'a reqwest::Client,
}

impl FetchContext<'_> {
    /// The credential secret, or an `Unauthorized` error for anonymous contexts.
    pub fn require_secret(&self) -> Result<&str> {
        self.credential.secret().ok_or_else(|| {
            Error::Unauthorized(format!("dataset {} has no credential secret", self.dataset.id))
        })
    }
}

/// Fetches a list resource and identifies its rows.
#[async_trait]
pub trait TableSource: Send + Sync {
    /// Fetch the current items. Anything other than an array is a shape mismatch;
    /// `Ok(None)` means "no value yet".
    async fn get(&self, ctx: &FetchContext<'_>) -> Result<Option<serde_json::Value>>;

    /// Stable identity of `row` within its table. Must be pure and deterministic.
    /// `None` skips the row.
    fn row_id(&self, dataset: &Dataset, row: &serde_json::Value) -> Option<String>;
}

/// Fetches a singleton resource.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    async fn get(&self, ctx: &FetchContext<'_>) -> Result<Option<serde_json::Value>>;

    /// Stable identity of the object. Must be pure and deterministic.
    fn object_id(&self, dataset: &Dataset, data: &serde_json::Value) -> String;
}

#[derive(Clone)]
pub struct TableDefinition {
    pub key: String,
    pub name: String,
    pub source: Arc<dyn TableSource>,
}

impl TableDefinition {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        source: Arc<dyn TableSource>,
    ) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            source,
        }
    }
}

impl fmt::Debug for TableDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableDefinition")
            .field("key", &self.key)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct ObjectDefinition {
    pub key: String,
    pub name: String,
    pub source: Arc<dyn ObjectSource>,
}

impl ObjectDefinition {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        source: Arc<dyn ObjectSource>,
    ) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            source,
        }
    }
}

impl fmt::Debug for ObjectDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectDefinition")
            .field("key", &self.key)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// OAuth hooks of an `oauth2` integration.
#[async_trait]
pub trait OAuthHooks: Send + Sync {
    /// Authorization URL the user is redirected to. `state` must be passed through.
    fn oauth_url(&self, base_url: &str, dataset: &Dataset, state: &str) -> Result<String>;

    /// Exchange the callback query for credentials to store on the dataset.
    async fn oauth_callback(
        &self,
        http: &reqwest::Client,
        base_url: &str,
        dataset: &Dataset,
        query: &HashMap<String, String>,
    ) -> Result<Credentials>;
}

/// Callback URL the provider redirects to after authorization.
pub fn oauth_redirect_uri(base_url: &str, dataset: &Dataset) -> String {
    format!(
        "{}/oauth/callback/{}",
        base_url.trim_end_matches('/'),
        dataset.id
    )
}

/// Request constraints a provider's webhook deliveries satisfy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookContract {
    pub method: reqwest::Method,
    pub content_type: &'static str,
    /// Header carrying `sha256=<hex hmac>` of the raw body.
    pub signature_header: &'static str,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookAction {
    Created,
    Updated,
    Deleted,
}

/// A parsed webhook delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookMessage {
    /// Validation handshake; `reply` is echoed back as the response body.
    Ping {
        subscription_id: Option<String>,
        reply: serde_json::Value,
    },
    Event {
        subscription_id: String,
        model: String,
        action: WebhookAction,
        item: serde_json::Value,
    },
}

impl WebhookMessage {
    /// The provider's subscription id. A ping may arrive without one.
    pub fn subscription_id(&self) -> Option<&str> {
        match self {
            WebhookMessage::Ping {
                subscription_id, ..
            } => subscription_id.as_deref(),
            WebhookMessage::Event {
                subscription_id, ..
            } => Some(subscription_id),
        }
    }
}

/// Where a webhook event's item is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookTarget {
    Table(String),
    Object(String),
}

/// A subscription as reported by the provider.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteSubscription {
    pub remote_id: String,
    pub callback_url: String,
    pub secret: Option<String>,
}

impl fmt::Debug for RemoteSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSubscription")
            .field("remote_id", &self.remote_id)
            .field("callback_url", &self.callback_url)
            .finish_non_exhaustive()
    }
}

/// Push-notification hooks of an integration.
#[async_trait]
pub trait WebhookHooks: Send + Sync {
    fn contract(&self) -> WebhookContract;

    /// Interpret a delivery body. Errors are answered with 400.
    fn parse(&self, body: &serde_json::Value) -> Result<WebhookMessage>;

    /// Map an event's declared model type to a table or object key.
    fn resolve_target(&self, model: &str) -> Option<WebhookTarget>;

    async fn list_remote(&self, ctx: &FetchContext<'_>) -> Result<Vec<RemoteSubscription>>;

    async fn create_remote(
        &self,
        ctx: &FetchContext<'_>,
        callback_url: &str,
    ) -> Result<RemoteSubscription>;
}

/// Provider descriptor: what to fetch, how to identify it, and optional hooks.
#[derive(Clone)]
pub struct Integration {
    pub key: String,
    pub name: String,
    pub auth_type: AuthType,
    objects: Vec<ObjectDefinition>,
    tables: Vec<TableDefinition>,
    pub oauth: Option<Arc<dyn OAuthHooks>>,
    pub webhooks: Option<Arc<dyn WebhookHooks>>,
}

impl Integration {
    pub fn builder(
        key: impl Into<String>,
        name: impl Into<String>,
        auth_type: AuthType,
    ) -> IntegrationBuilder {
        IntegrationBuilder {
            key: key.into(),
            name: name.into(),
            auth_type,
            objects: Vec::new(),
            tables: Vec::new(),
            oauth: None,
            webhooks: None,
        }
    }

    /// Object definitions in declaration order.
    pub fn objects(&self) -> &[ObjectDefinition] {
        &self.objects
    }

    /// Table definitions in declaration order.
    pub fn tables(&self) -> &[TableDefinition] {
        &self.tables
    }

    pub fn object(&self, key: &str) -> Option<&ObjectDefinition> {
        self.objects.iter().find(|o| o.key == key)
    }

    pub fn table(&self, key: &str) -> Option<&TableDefinition> {
        self.tables.iter().find(|t| t.key == key)
    }
}

impl fmt::Debug for Integration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Integration")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("auth_type", &self.auth_type)
            .field("objects", &self.objects)
            .field("tables", &self.tables)
            .field("oauth", &self.oauth.is_some())
            .field("webhooks", &self.webhooks.is_some())
            .finish()
    }
}

pub struct IntegrationBuilder {
    key: String,
    name: String,
    auth_type: AuthType,
    objects: Vec<ObjectDefinition>,
    tables: Vec<TableDefinition>,
    oauth: Option<Arc<dyn OAuthHooks>>,
    webhooks: Option<Arc<dyn WebhookHooks>>,
}

impl IntegrationBuilder {
    pub fn object(mut self, def: ObjectDefinition) -> Self {
        self.objects.push(def);
        self
    }

    pub fn table(mut self, def: TableDefinition) -> Self {
        self.tables.push(def);
        self
    }

    pub fn oauth(mut self, hooks: Arc<dyn OAuthHooks>) -> Self {
        self.oauth = Some(hooks);
        self
    }

    pub fn webhooks(mut self, hooks: Arc<dyn WebhookHooks>) -> Self {
        self.webhooks = Some(hooks);
        self
    }

    #[tracing::instrument(level = "debug", skip(self), fields(key = %self.key))]
    pub fn build(self) -> Result<Integration> {
        if self.key.trim().is_empty() {
            return Err(Error::InvalidInput("integration key is empty".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "integration '{}' has an empty name",
                self.key
            )));
        }
        if self.auth_type == AuthType::OAuth2 && self.oauth.is_none() {
            return Err(Error::InvalidInput(format!(
                "oauth2 integration '{}' has no oauth hooks",
                self.key
            )));
        }
        for (i, o) in self.objects.iter().enumerate() {
            if o.key.trim().is_empty() {
                return Err(Error::InvalidInput(format!(
                    "integration '{}' has an object with an empty key",
                    self.key
                )));
            }
            if self.objects[..i].iter().any(|p| p.key == o.key) {
                return Err(Error::Conflict(format!(
                    "integration '{}' declares object '{}' twice",
                    self.key, o.key
                )));
            }
        }
        for (i, t) in self.tables.iter().enumerate() {
            if t.key.trim().is_empty() {
                return Err(Error::InvalidInput(format!(
                    "integration '{}' has a table with an empty key",
                    self.key
                )));
            }
            if self.tables[..i].iter().any(|p| p.key == t.key) {
                return Err(Error::Conflict(format!(
                    "integration '{}' declares table '{}' twice",
                    self.key, t.key
                )));
            }
        }
        Ok(Integration {
            key: self.key,
            name: self.name,
            auth_type: self.auth_type,
            objects: self.objects,
            tables: self.tables,
            oauth: self.oauth,
            webhooks: self.webhooks,
        })
    }
}

/// Identity helper: read `field` of `item` as a string id.
///
/// Numbers and strings are accepted; `1` and `"1"` map to the same id.
pub fn field_id(item: &serde_json::Value, field: &str) -> Option<String> {
    match item.get(field)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
