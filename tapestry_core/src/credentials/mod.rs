//! Credential resolution and secret handling.

pub mod oauth_state;
pub mod resolver;
pub mod secrets;

pub use oauth_state::OAuthStateSigner;
pub use resolver::{ConnectionBroker, CredentialStore, HttpConnectionBroker, ResolvedCredential};
pub use secrets::SecretBox;
