//! Signed `state` parameter for OAuth round trips.
//!
//! Format: `<dataset_id>.<nonce_hex>.<hmac_hex>` where the HMAC-SHA256 covers
//! `<dataset_id>.<nonce_hex>` under a key derived from the master key.

use crate::credentials::secrets::SecretBox;
use crate::models::DatasetId;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct OAuthStateSigner {
    key: [u8; 32],
}

impl OAuthStateSigner {
    pub fn new(secrets: &SecretBox) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"tapestry.oauth.state");
        hasher.update(secrets.key_bytes());
        Self {
            key: hasher.finalize().into(),
        }
    }

    pub fn issue(&self, dataset_id: DatasetId) -> String {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        let payload = format!("{dataset_id}.{}", hex::encode(nonce));
        let sig = self.sign(payload.as_bytes());
        format!("{payload}.{sig}")
    }

    /// True when `state` was issued by this signer for `dataset_id`.
    pub fn verify(&self, dataset_id: DatasetId, state: &str) -> bool {
        let Some((payload, sig)) = state.rsplit_once('.') else {
            return false;
        };
        let Some((id, _nonce)) = payload.split_once('.') else {
            return false;
        };
        if id != dataset_id.to_string() {
            return false;
        }
        let Ok(provided) = hex::decode(sig) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.key) else {
            return false;
        };
        mac.update(payload.as_bytes());
        mac.verify_slice(&provided).is_ok()
    }

    fn sign(&self, payload: &[u8]) -> String {
        match HmacSha256::new_from_slice(&self.key) {
            Ok(mut mac) => {
                mac.update(payload);
                hex::encode(mac.finalize().into_bytes())
            }
            // HMAC accepts keys of any length.
            Err(_) => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_state_verifies_for_its_dataset_only() {
        let signer = OAuthStateSigner::new(&SecretBox::new(&[7u8; 32]));
        let ds = DatasetId::new();
        let state = signer.issue(ds);
        assert!(signer.verify(ds, &state));
        assert!(!signer.verify(DatasetId::new(), &state));
        assert!(!signer.verify(ds, "garbage"));
        assert!(!signer.verify(ds, &format!("{state}00")));
    }

    #[test]
    fn other_keys_reject_the_state() {
        let a = OAuthStateSigner::new(&SecretBox::new(&[1u8; 32]));
        let b = OAuthStateSigner::new(&SecretBox::new(&[2u8; 32]));
        let ds = DatasetId::new();
        assert!(!b.verify(ds, &a.issue(ds)));
    }
}
