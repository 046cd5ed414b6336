//! Tapestry core library: the dataset synchronization and integration engine.

pub mod canonical;
pub mod config;
pub mod credentials;
pub mod error;
pub mod integrations;
pub mod models;
pub mod o11y;
pub mod operations;
pub mod store;
pub mod sync;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod webhooks;

pub use config::{BrokerConfig, EngineConfig};
pub use credentials::{
    ConnectionBroker, CredentialStore, HttpConnectionBroker, OAuthStateSigner, ResolvedCredential,
    SecretBox,
};
pub use error::{Error, Result};
pub use integrations::{
    AuthType, FetchContext, Integration, IntegrationRegistry, OAuthHooks, ObjectDefinition,
    ObjectSource, TableDefinition, TableSource, WebhookHooks,
};
pub use models::{
    Credentials, Dataset, DatasetId, DatasetObject, ListQuery, Row, SubscriptionState, Table,
    TableBinding, TableId, WebhookSubscription,
};
pub use operations::{Operation, OperationBus, OperationSubscription};
pub use store::{MemoryStore, SqliteStore, Store};
pub use sync::{DatasetReport, Scheduler, SchedulerHandle, SyncAllReport, SyncEngine, Upserter};
pub use webhooks::{SubscriptionManager, WebhookDispatcher, WebhookReply, WebhookRequest};
