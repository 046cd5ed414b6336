use crate::integrations::traits::AuthType;
use crate::models::{Credentials, Dataset};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::fmt;
use std::sync::Arc;

/// A credential ready to be handed to a provider getter.
#[derive(Clone, PartialEq, Eq)]
pub enum ResolvedCredential {
    /// The integration needs no authentication.
    Anonymous,
    Token(String),
    OAuth2 {
        access_token: String,
        refresh_token: Option<String>,
    },
}

impl ResolvedCredential {
    /// The token to send as a bearer/API secret, if any.
    pub fn secret(&self) -> Option<&str> {
        match self {
            ResolvedCredential::Anonymous => None,
            ResolvedCredential::Token(t) => Some(t),
            ResolvedCredential::OAuth2 { access_token, .. } => Some(access_token),
        }
    }
}

impl fmt::Debug for ResolvedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedCredential::Anonymous => f.write_str("Anonymous"),
            ResolvedCredential::Token(_) => f.write_str("Token(..)"),
            ResolvedCredential::OAuth2 { .. } => f.write_str("OAuth2 { .. }"),
        }
    }
}

/// External auth broker holding tokens for connection ids.
#[async_trait]
pub trait ConnectionBroker: Send + Sync {
    /// Fetch a live access token. `Ok(None)` when the broker does not know the connection.
    async fn access_token(&self, integration: &str, connection_id: &str)
    -> Result<Option<String>>;
}

/// `ConnectionBroker` speaking a small JSON-over-HTTP protocol:
/// `GET {base}/connection/{connection_id}?provider_config_key={integration}`
/// answering `{"access_token": ".."}` or `{"credentials": {"access_token": ".."}}`.
#[derive(Clone)]
pub struct HttpConnectionBroker {
    client: reqwest::Client,
    base_url: String,
    secret: String,
}

impl HttpConnectionBroker {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
        }
    }
}

#[async_trait]
impl ConnectionBroker for HttpConnectionBroker {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn access_token(
        &self,
        integration: &str,
        connection_id: &str,
    ) -> Result<Option<String>> {
        let url = format!("{}/connection/{}", self.base_url, connection_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.secret)
            .query(&[("provider_config_key", integration)])
            .send()
            .await
            .map_err(|e| Error::provider("connection-broker", "request connection", e))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Error::provider_message(
                "connection-broker",
                format!("broker returned status {}", resp.status()),
            ));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::provider("connection-broker", "decode connection", e))?;
        let token = body
            .get("access_token")
            .or_else(|| body.get("credentials").and_then(|c| c.get("access_token")))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Ok(token)
    }
}

/// Resolves the credential a dataset needs before any provider call.
///
/// Nothing is cached: every call reads the dataset's stored credentials and, for
/// brokered connections, asks the broker again.
#[derive(Clone, Default)]
pub struct CredentialStore {
    broker: Option<Arc<dyn ConnectionBroker>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_broker(mut self, broker: Arc<dyn ConnectionBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// `Ok(None)` means the dataset is unauthenticated for `auth_type`; callers skip it.
    #[tracing::instrument(level = "debug", skip(self, dataset), fields(dataset_id = %dataset.id))]
    pub async fn resolve(
        &self,
        dataset: &Dataset,
        auth_type: AuthType,
    ) -> Result<Option<ResolvedCredential>> {
        if auth_type == AuthType::None {
            return Ok(Some(ResolvedCredential::Anonymous));
        }
        let Some(credentials) = &dataset.credentials else {
            return Ok(None);
        };

        let resolved = match (auth_type, credentials) {
            (AuthType::Token, Credentials::Token { token }) => {
                non_empty(token).map(|t| ResolvedCredential::Token(t.to_string()))
            }
            (
                AuthType::OAuth2,
                Credentials::OAuth2 {
                    access_token,
                    refresh_token,
                    ..
                },
            ) => non_empty(access_token).map(|t| ResolvedCredential::OAuth2 {
                access_token: t.to_string(),
                refresh_token: refresh_token.clone(),
            }),
            (_, Credentials::Connection { connection_id }) => {
                self.resolve_connection(dataset, connection_id).await?
            }
            (expected, other) => {
                tracing::debug!(
                    expected = ?expected,
                    stored = other.kind(),
                    "stored credentials do not match integration auth type"
                );
                None
            }
        };
        Ok(resolved)
    }

    async fn resolve_connection(
        &self,
        dataset: &Dataset,
        connection_id: &str,
    ) -> Result<Option<ResolvedCredential>> {
        let Some(broker) = &self.broker else {
            tracing::warn!(
                dataset_id = %dataset.id,
                "dataset uses a brokered connection but no connection broker is configured"
            );
            return Ok(None);
        };
        let integration = dataset.integration_type.as_deref().unwrap_or_default();
        let token = broker.access_token(integration, connection_id).await?;
        Ok(token
            .as_deref()
            .and_then(non_empty)
            .map(|t| ResolvedCredential::Token(t.to_string())))
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.trim().is_empty() { None } else { Some(s) }
}
