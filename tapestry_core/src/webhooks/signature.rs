//! HMAC-SHA256 webhook signatures.
//!
//! Header format: `sha256=<lowercase hex hmac of the raw body>`.

use crate::webhooks::error::WebhookError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the signature header value for `body`.
pub fn sign_body(secret: &str, body: &[u8]) -> Result<String, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::SignatureMismatch)?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Check a received header value against the body.
///
/// The comparison is exact string equality with the expected header value.
pub fn verify_signature(
    secret: &str,
    header_name: &str,
    header_value: Option<&str>,
    body: &[u8],
) -> Result<(), WebhookError> {
    let Some(provided) = header_value else {
        return Err(WebhookError::MissingSignature(header_name.to_string()));
    };
    let expected = sign_body(secret, body)?;
    if provided.trim() != expected {
        return Err(WebhookError::SignatureMismatch);
    }
    Ok(())
}
