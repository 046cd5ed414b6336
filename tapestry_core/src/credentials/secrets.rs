//! Encryption of secrets at rest.
//!
//! `SecretBox` seals values with AES-256-GCM. The stored form is the 12-byte
//! nonce followed by the ciphertext.

use crate::{Error, Result};
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use rand::RngCore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::Write;
use std::path::Path;

const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct SecretBox {
    cipher: Aes256Gcm,
    key: [u8; 32],
}

impl SecretBox {
    pub fn new(master_key: &[u8; 32]) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(master_key));
        Self {
            cipher,
            key: *master_key,
        }
    }

    /// Open a box with the key file at `path`, writing a fresh random key on
    /// first use. An existing file is never overwritten.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        let key = match std::fs::read(path) {
            Ok(bytes) => <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
                Error::InvalidInput(format!(
                    "master key {} holds {} bytes, expected 32",
                    path.display(),
                    bytes.len()
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::write_new_key(path)?,
            Err(e) => return Err(Error::backend(format!("read {}", path.display()), e)),
        };
        Ok(Self::new(&key))
    }

    fn write_new_key(path: &Path) -> Result<[u8; 32]> {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| Error::backend("create key directory", e))?;
        }
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(path)
            .map_err(|e| Error::backend(format!("create {}", path.display()), e))?;
        file.write_all(&key)
            .map_err(|e| Error::backend(format!("write {}", path.display()), e))?;
        tracing::info!(path = %path.display(), "master key created");
        Ok(key)
    }

    /// Raw key material, for deriving signing keys.
    pub(crate) fn key_bytes(&self) -> &[u8; 32] {
        &self.key
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| Error::BackendMessage(format!("encrypt: {e}")))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn open(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(Error::BackendMessage(
                "ciphertext too short (missing nonce)".to_string(),
            ));
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| Error::BackendMessage(format!("decrypt: {e}")))
    }

    pub fn seal_json<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        let plaintext = serde_json::to_vec(value)
            .map_err(|e| Error::backend("serialize sealed value", e))?;
        self.seal(&plaintext)
    }

    pub fn open_json<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        let plaintext = self.open(data)?;
        serde_json::from_slice(&plaintext).map_err(|e| Error::backend("deserialize sealed value", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Credentials;

    #[test]
    fn seal_open_roundtrip() {
        let sb = SecretBox::new(&[42u8; 32]);
        let sealed = sb.seal(b"hello world").unwrap();
        assert_ne!(&sealed[NONCE_LEN..], b"hello world");
        assert_eq!(sb.open(&sealed).unwrap(), b"hello world");
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let sb = SecretBox::new(&[1u8; 32]);
        let mut sealed = sb.seal(b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(sb.open(&sealed).is_err());
        assert!(sb.open(&[0u8; 4]).is_err());
    }

    #[test]
    fn wrong_key_cannot_open() {
        let a = SecretBox::new(&[1u8; 32]);
        let b = SecretBox::new(&[2u8; 32]);
        let sealed = a
            .seal_json(&Credentials::Token {
                token: "t".to_string(),
            })
            .unwrap();
        assert!(b.open_json::<Credentials>(&sealed).is_err());
        let creds: Credentials = a.open_json(&sealed).unwrap();
        assert_eq!(creds.kind(), "token");
    }

    #[test]
    fn master_key_file_is_created_once_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("master.key");
        let first = SecretBox::load_or_create(&path).unwrap();
        let sealed = first.seal(b"persisted").unwrap();
        assert_eq!(std::fs::read(&path).unwrap().len(), 32);

        let second = SecretBox::load_or_create(&path).unwrap();
        assert_eq!(second.open(&sealed).unwrap(), b"persisted");

        std::fs::write(&path, b"short").unwrap();
        assert!(matches!(
            SecretBox::load_or_create(&path),
            Err(Error::InvalidInput(_))
        ));
    }
}
