//! The provider contract and the registry resolving provider keys to it.

pub mod registry;
pub mod traits;

pub use registry::{IntegrationRegistry, IntegrationRegistryBuilder};
pub use traits::{
    AuthType, FetchContext, Integration, IntegrationBuilder, OAuthHooks, ObjectDefinition,
    ObjectSource, RemoteSubscription, TableDefinition, TableSource, WebhookAction,
    WebhookContract, WebhookHooks, WebhookMessage, WebhookTarget, field_id, oauth_redirect_uri,
};
