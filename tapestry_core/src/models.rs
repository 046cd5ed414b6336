use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IdParseError {
    #[error("invalid uuid: {0}")]
    InvalidUuid(String),
}

/// Dataset identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(pub Uuid);

impl DatasetId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DatasetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for DatasetId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for DatasetId {
    type Err = IdParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let id = Uuid::parse_str(s).map_err(|_| IdParseError::InvalidUuid(s.to_string()))?;
        Ok(Self(id))
    }
}

/// Identifier of a persisted table binding.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(pub Uuid);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for TableId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for TableId {
    type Err = IdParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let id = Uuid::parse_str(s).map_err(|_| IdParseError::InvalidUuid(s.to_string()))?;
        Ok(Self(id))
    }
}

/// Stored credentials of a dataset.
///
/// `Connection` holds only an identifier issued by an external auth broker; the
/// live token is fetched from the broker whenever it is needed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credentials {
    Token {
        token: String,
    },
    #[serde(rename = "oauth2")]
    OAuth2 {
        access_token: String,
        #[serde(default)]
        refresh_token: Option<String>,
        #[serde(default)]
        expires_at: Option<DateTime<Utc>>,
    },
    Connection {
        connection_id: String,
    },
}

impl Credentials {
    pub fn kind(&self) -> &'static str {
        match self {
            Credentials::Token { .. } => "token",
            Credentials::OAuth2 { .. } => "oauth2",
            Credentials::Connection { .. } => "connection",
        }
    }
}

// Secrets never reach logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Token { .. } => f.debug_struct("Token").finish_non_exhaustive(),
            Credentials::OAuth2 { expires_at, .. } => f
                .debug_struct("OAuth2")
                .field("expires_at", expires_at)
                .finish_non_exhaustive(),
            Credentials::Connection { connection_id } => f
                .debug_struct("Connection")
                .field("connection_id", connection_id)
                .finish(),
        }
    }
}

/// A configured connection to one external account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: DatasetId,
    pub name: String,
    /// Provider key into the integration registry. `None` until the user binds one.
    pub integration_type: Option<String>,
    #[serde(skip_serializing)]
    #[serde(default)]
    pub credentials: Option<Credentials>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Dataset {
    #[tracing::instrument(level = "debug")]
    pub fn new(
        name: impl Into<String> + fmt::Debug,
        integration_type: Option<String>,
        now: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("dataset name is empty".to_string()));
        }
        if let Some(key) = &integration_type {
            if key.trim().is_empty() {
                return Err(Error::InvalidInput("integration_type is empty".to_string()));
            }
        }
        let now = now.unwrap_or_else(Utc::now);
        Ok(Self {
            id: DatasetId::new(),
            name,
            integration_type,
            credentials: None,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

/// Persisted binding of a table definition to a dataset. Unique on `(dataset_id, key)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: TableId,
    pub dataset_id: DatasetId,
    pub key: String,
    pub created_at: DateTime<Utc>,
}

/// Result of `Store::get_or_create_table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableBinding {
    pub table: Table,
    /// True when this call created the binding.
    pub created: bool,
}

/// One synced item of a table. Unique on `(table_id, source_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: Uuid,
    pub table_id: TableId,
    pub source_id: String,
    pub data: serde_json::Value,
    pub data_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A singleton resource of a dataset. Unique on `(object_type, dataset_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetObject {
    pub id: Uuid,
    pub dataset_id: DatasetId,
    pub object_type: String,
    pub source_id: String,
    pub data: serde_json::Value,
    pub data_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Pending,
    Validated,
}

impl SubscriptionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionState::Pending => "pending",
            SubscriptionState::Validated => "validated",
        }
    }
}

impl FromStr for SubscriptionState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SubscriptionState::Pending),
            "validated" => Ok(SubscriptionState::Validated),
            other => Err(Error::InvalidInput(format!(
                "unknown subscription state '{other}'"
            ))),
        }
    }
}

/// Local record of a provider-side webhook subscription.
///
/// Absence of a record is the `NONE` state of the lifecycle.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub dataset_id: DatasetId,
    pub integration: String,
    /// Subscription id assigned by the provider; carried in every delivery.
    pub remote_id: String,
    pub callback_url: String,
    #[serde(skip_serializing)]
    pub secret: String,
    pub state: SubscriptionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookSubscription {
    pub fn new_pending(
        dataset_id: DatasetId,
        integration: impl Into<String>,
        remote_id: impl Into<String>,
        callback_url: impl Into<String>,
        secret: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let remote_id = remote_id.into();
        if remote_id.trim().is_empty() {
            return Err(Error::InvalidInput(
                "webhook subscription remote_id is empty".to_string(),
            ));
        }
        let secret = secret.into();
        if secret.is_empty() {
            return Err(Error::InvalidInput(
                "webhook subscription secret is empty".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            dataset_id,
            integration: integration.into(),
            remote_id,
            callback_url: callback_url.into(),
            secret,
            state: SubscriptionState::Pending,
            created_at: now,
            updated_at: now,
        })
    }
}

impl fmt::Debug for WebhookSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookSubscription")
            .field("id", &self.id)
            .field("dataset_id", &self.dataset_id)
            .field("integration", &self.integration)
            .field("remote_id", &self.remote_id)
            .field("callback_url", &self.callback_url)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    pub limit: usize,
    pub offset: usize,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_use_tagged_wire_format() {
        let creds = Credentials::OAuth2 {
            access_token: "a".to_string(),
            refresh_token: Some("r".to_string()),
            expires_at: None,
        };
        let v = serde_json::to_value(&creds).unwrap();
        assert_eq!(v["type"], "oauth2");

        let parsed: Credentials =
            serde_json::from_value(serde_json::json!({"type": "token", "token": "t"})).unwrap();
        assert_eq!(
            parsed,
            Credentials::Token {
                token: "t".to_string()
            }
        );
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let creds = Credentials::Token {
            token: "super-secret".to_string(),
        };
        assert!(!format!("{creds:?}").contains("super-secret"));

        let sub = WebhookSubscription::new_pending(
            DatasetId::new(),
            "toggl",
            "42",
            "https://example.test/webhooks/toggl",
            "hush",
            Utc::now(),
        )
        .unwrap();
        assert!(!format!("{sub:?}").contains("hush"));
    }

    #[test]
    fn dataset_requires_a_name() {
        assert!(Dataset::new("  ", None, None).is_err());
        assert!(Dataset::new("work", Some(String::new()), None).is_err());
        let ds = Dataset::new("work", Some("toggl".to_string()), None).unwrap();
        assert!(ds.credentials.is_none());
    }
}
