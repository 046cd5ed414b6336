//! Inbound provider webhooks: validation, routing and subscription lifecycle.

pub mod dispatcher;
pub mod error;
pub mod signature;
pub mod subscriptions;

pub use dispatcher::{DEFAULT_MAX_WEBHOOK_BYTES, WebhookDispatcher, WebhookReply, WebhookRequest};
pub use error::WebhookError;
pub use signature::{sign_body, verify_signature};
pub use subscriptions::{SubscriptionManager, SubscriptionOutcome};
