//! Process wiring: data directory, master key, SQLite store and the built-in registry.

use crate::server::AppState;
use std::path::Path;
use std::sync::Arc;
use tapestry_core::EngineConfig;
use tapestry_core::credentials::SecretBox;
use tapestry_core::store::SqliteStore;
use tapestry_integrations::{IntegrationsConfig, builtin_registry};

pub const DATABASE_FILE: &str = "tapestry.db";
pub const MASTER_KEY_FILE: &str = "master.key";

#[tracing::instrument(level = "info", skip_all)]
pub async fn build_state(data_dir: impl AsRef<Path>) -> anyhow::Result<AppState> {
    let data_dir = data_dir.as_ref().to_path_buf();
    tokio::fs::create_dir_all(&data_dir).await?;

    let config = EngineConfig::from_env()?;

    // Credentials and webhook secrets are sealed with a file-backed 32-byte key.
    let secrets = SecretBox::load_or_create(&data_dir.join(MASTER_KEY_FILE))?;

    let store = SqliteStore::open(data_dir.join(DATABASE_FILE), secrets.clone()).await?;
    let registry = builtin_registry(&IntegrationsConfig::from_env())?;
    tracing::info!(data_dir = %data_dir.display(), "state ready");

    Ok(AppState::new(
        Arc::new(store),
        Arc::new(registry),
        &secrets,
        config,
    )?)
}

/// Effective configuration with secrets reduced to presence flags.
pub fn redacted_config(cfg: &EngineConfig) -> serde_json::Value {
    serde_json::json!({
        "sync_interval_secs": cfg.sync_interval.as_secs(),
        "sync_on_startup": cfg.sync_on_startup,
        "max_concurrent_datasets": cfg.max_concurrent_datasets,
        "public_base_url": cfg.public_base_url,
        "http_timeout_secs": cfg.http_timeout.as_secs(),
        "operation_bus_capacity": cfg.operation_bus_capacity,
        "max_webhook_bytes": cfg.max_webhook_bytes,
        "connection_broker_url": cfg.broker.as_ref().map(|b| b.url.clone()),
        "connection_broker_secret": cfg.broker.as_ref().map(|_| "<set>"),
        "github_oauth_app": std::env::var("TAPESTRY_GITHUB_CLIENT_ID").ok().map(|_| "<set>"),
    })
}
