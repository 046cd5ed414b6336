use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use tapestry_core::{Error, Result};

const ERROR_BODY_PREVIEW: usize = 200;

/// Send a provider request and decode its JSON body.
///
/// A 401/403 answer yields `Ok(None)` so getters report "no value yet" instead
/// of failing the unit.
pub(crate) async fn fetch_json(integration: &str, req: RequestBuilder) -> Result<Option<Value>> {
    let resp = req
        .send()
        .await
        .map_err(|e| Error::provider(integration, "send request", e))?;
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        tracing::warn!(integration, %status, "provider rejected credentials");
        return Ok(None);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        let preview: String = body.chars().take(ERROR_BODY_PREVIEW).collect();
        return Err(Error::provider_message(
            integration,
            format!("unexpected status {status}: {preview}"),
        ));
    }
    let value = resp
        .json::<Value>()
        .await
        .map_err(|e| Error::provider(integration, "decode response", e))?;
    Ok(Some(value))
}

/// Like `fetch_json`, but a credential rejection is an error.
pub(crate) async fn require_json(integration: &str, req: RequestBuilder) -> Result<Value> {
    fetch_json(integration, req)
        .await?
        .ok_or_else(|| Error::Unauthorized(format!("{integration} rejected the credentials")))
}
