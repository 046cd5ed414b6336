//! GitHub connector.
//!
//! OAuth2 app flow; pulls the authenticated user and their repositories from
//! the REST API v3.

use crate::http::{fetch_json, require_json};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tapestry_core::integrations::{
    AuthType, FetchContext, Integration, OAuthHooks, ObjectDefinition, ObjectSource,
    TableDefinition, TableSource, field_id, oauth_redirect_uri,
};
use tapestry_core::models::{Credentials, Dataset};
use tapestry_core::{Error, Result};
use tracing::instrument;

pub const KEY: &str = "github";
const SCOPE: &str = "read:user repo";

/// OAuth app registration plus endpoint bases (overridable for tests).
#[derive(Clone)]
pub struct GithubConfig {
    pub client_id: String,
    pub client_secret: String,
    pub web_base_url: String,
    pub api_base_url: String,
}

impl GithubConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            web_base_url: "https://github.com".to_string(),
            api_base_url: "https://api.github.com".to_string(),
        }
    }
}

impl std::fmt::Debug for GithubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubConfig")
            .field("client_id", &self.client_id)
            .field("web_base_url", &self.web_base_url)
            .field("api_base_url", &self.api_base_url)
            .finish_non_exhaustive()
    }
}

fn headers() -> HeaderMap {
    let mut h = HeaderMap::new();
    h.insert(USER_AGENT, HeaderValue::from_static("tapestry"));
    h.insert(
        ACCEPT,
        HeaderValue::from_static("application/vnd.github+json"),
    );
    h
}

struct Resource {
    api_base_url: String,
    path: &'static str,
}

impl Resource {
    async fn fetch(&self, ctx: &FetchContext<'_>) -> Result<Option<Value>> {
        let token = ctx.require_secret()?;
        let req = ctx
            .http
            .get(format!("{}{}", self.api_base_url, self.path))
            .headers(headers())
            .bearer_auth(token)
            .query(&[("per_page", "100")]);
        fetch_json(KEY, req).await
    }
}

#[async_trait]
impl TableSource for Resource {
    #[instrument(level = "debug", skip_all, fields(path = self.path))]
    async fn get(&self, ctx: &FetchContext<'_>) -> Result<Option<Value>> {
        self.fetch(ctx).await
    }

    fn row_id(&self, _dataset: &Dataset, row: &Value) -> Option<String> {
        field_id(row, "id")
    }
}

#[async_trait]
impl ObjectSource for Resource {
    #[instrument(level = "debug", skip_all, fields(path = self.path))]
    async fn get(&self, ctx: &FetchContext<'_>) -> Result<Option<Value>> {
        self.fetch(ctx).await
    }

    fn object_id(&self, dataset: &Dataset, data: &Value) -> String {
        field_id(data, "id").unwrap_or_else(|| dataset.id.to_string())
    }
}

struct GithubOAuth {
    cfg: GithubConfig,
}

#[async_trait]
impl OAuthHooks for GithubOAuth {
    fn oauth_url(&self, base_url: &str, dataset: &Dataset, state: &str) -> Result<String> {
        let redirect_uri = oauth_redirect_uri(base_url, dataset);
        let url = reqwest::Url::parse_with_params(
            &format!("{}/login/oauth/authorize", self.cfg.web_base_url),
            &[
                ("client_id", self.cfg.client_id.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("scope", SCOPE),
                ("state", state),
            ],
        )
        .map_err(|e| Error::backend("build github authorize url", e))?;
        Ok(url.into())
    }

    #[instrument(level = "info", skip_all, fields(dataset_id = %dataset.id))]
    async fn oauth_callback(
        &self,
        http: &reqwest::Client,
        base_url: &str,
        dataset: &Dataset,
        query: &HashMap<String, String>,
    ) -> Result<Credentials> {
        if let Some(err) = query.get("error") {
            return Err(Error::Unauthorized(format!("github authorization failed: {err}")));
        }
        let code = query
            .get("code")
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::InvalidInput("missing code".to_string()))?;

        let req = http
            .post(format!("{}/login/oauth/access_token", self.cfg.web_base_url))
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, "tapestry")
            .json(&json!({
                "client_id": self.cfg.client_id,
                "client_secret": self.cfg.client_secret,
                "code": code,
                "redirect_uri": oauth_redirect_uri(base_url, dataset),
            }));
        let body = require_json(KEY, req).await?;
        // GitHub reports exchange failures with a 200 and an `error` field.
        if let Some(err) = body.get("error").and_then(Value::as_str) {
            return Err(Error::Unauthorized(format!("github token exchange failed: {err}")));
        }
        let access_token = body
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::provider_message(KEY, "token response has no access_token"))?;
        Ok(Credentials::OAuth2 {
            access_token: access_token.to_string(),
            refresh_token: body
                .get("refresh_token")
                .and_then(Value::as_str)
                .map(str::to_string),
            expires_at: body
                .get("expires_in")
                .and_then(Value::as_i64)
                .map(|secs| chrono::Utc::now() + chrono::Duration::seconds(secs)),
        })
    }
}

pub fn integration(cfg: GithubConfig) -> Result<Integration> {
    let api = cfg.api_base_url.trim_end_matches('/').to_string();
    let resource = |path| {
        Arc::new(Resource {
            api_base_url: api.clone(),
            path,
        })
    };
    Integration::builder(KEY, "GitHub", AuthType::OAuth2)
        .object(ObjectDefinition::new("user", "User", resource("/user")))
        .table(TableDefinition::new(
            "repositories",
            "Repositories",
            resource("/user/repos"),
        ))
        .oauth(Arc::new(GithubOAuth { cfg }))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapestry_core::credentials::ResolvedCredential;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> GithubConfig {
        GithubConfig {
            web_base_url: server.uri(),
            api_base_url: server.uri(),
            ..GithubConfig::new("cid", "csecret")
        }
    }

    fn dataset() -> Dataset {
        Dataset::new("gh", Some(KEY.to_string()), None).unwrap()
    }

    #[test]
    fn authorize_url_carries_state_and_redirect() {
        let integration = integration(GithubConfig::new("cid", "csecret")).unwrap();
        let ds = dataset();
        let url = integration
            .oauth
            .as_ref()
            .unwrap()
            .oauth_url("https://me.test/", &ds, "st4te")
            .unwrap();
        let parsed = reqwest::Url::parse(&url).unwrap();
        assert_eq!(parsed.path(), "/login/oauth/authorize");
        let params: HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(params["client_id"], "cid");
        assert_eq!(params["state"], "st4te");
        assert_eq!(
            params["redirect_uri"],
            format!("https://me.test/oauth/callback/{}", ds.id)
        );
    }

    #[tokio::test]
    async fn callback_exchanges_code_for_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .and(body_partial_json(json!({"code": "abc", "client_id": "cid"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "gho_1", "token_type": "bearer"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let integration = integration(config(&server)).unwrap();
        let query = HashMap::from([("code".to_string(), "abc".to_string())]);
        let creds = integration
            .oauth
            .as_ref()
            .unwrap()
            .oauth_callback(&reqwest::Client::new(), "https://me.test", &dataset(), &query)
            .await
            .unwrap();
        match creds {
            Credentials::OAuth2 { access_token, .. } => assert_eq!(access_token, "gho_1"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn callback_reports_exchange_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"error": "bad_verification_code"})),
            )
            .mount(&server)
            .await;

        let integration = integration(config(&server)).unwrap();
        let oauth = integration.oauth.as_ref().unwrap();
        let query = HashMap::from([("code".to_string(), "nope".to_string())]);
        let err = oauth
            .oauth_callback(&reqwest::Client::new(), "https://me.test", &dataset(), &query)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));

        let err = oauth
            .oauth_callback(&reqwest::Client::new(), "https://me.test", &dataset(), &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn repositories_use_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/repos"))
            .and(header("authorization", "Bearer gho_1"))
            .and(header("user-agent", "tapestry"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 5, "name": "r"}])))
            .mount(&server)
            .await;

        let integration = integration(config(&server)).unwrap();
        let ds = dataset();
        let cred = ResolvedCredential::OAuth2 {
            access_token: "gho_1".to_string(),
            refresh_token: None,
        };
        let http = reqwest::Client::new();
        let ctx = FetchContext {
            dataset: &ds,
            credential: &cred,
            http: &http,
        };
        let table = integration.table("repositories").unwrap();
        let rows = table.source.get(&ctx).await.unwrap().unwrap();
        assert_eq!(table.source.row_id(&ds, &rows[0]).as_deref(), Some("5"));
    }
}
