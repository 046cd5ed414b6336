use crate::webhooks::DEFAULT_MAX_WEBHOOK_BYTES;
use crate::{Error, Result};
use std::time::Duration;

/// Connection settings of an external auth broker.
#[derive(Clone)]
pub struct BrokerConfig {
    pub url: String,
    pub secret: String,
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// Runtime settings of the sync engine, scheduler and webhook intake.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub sync_interval: Duration,
    pub sync_on_startup: bool,
    /// `1` keeps `sync_all` sequential.
    pub max_concurrent_datasets: usize,
    /// Base for OAuth redirects and webhook callbacks. Webhook setup is skipped without it.
    pub public_base_url: Option<String>,
    pub http_timeout: Duration,
    pub operation_bus_capacity: usize,
    pub max_webhook_bytes: usize,
    pub broker: Option<BrokerConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(600),
            sync_on_startup: true,
            max_concurrent_datasets: 1,
            public_base_url: None,
            http_timeout: Duration::from_secs(30),
            operation_bus_capacity: 1024,
            max_webhook_bytes: DEFAULT_MAX_WEBHOOK_BYTES,
            broker: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::InvalidInput(format!("{key} has an invalid value '{v}'"))),
        _ => Ok(None),
    }
}

fn env_bool(key: &str) -> Result<Option<bool>> {
    match std::env::var(key).ok().as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some("1" | "true" | "yes" | "on") => Ok(Some(true)),
        Some("0" | "false" | "no" | "off") => Ok(Some(false)),
        Some(other) => Err(Error::InvalidInput(format!(
            "{key} must be a boolean, got '{other}'"
        ))),
    }
}

impl EngineConfig {
    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        let broker = match (
            std::env::var("TAPESTRY_CONNECTION_BROKER_URL").ok(),
            std::env::var("TAPESTRY_CONNECTION_BROKER_SECRET").ok(),
        ) {
            (Some(url), Some(secret)) if !url.trim().is_empty() => Some(BrokerConfig { url, secret }),
            (Some(url), None) if !url.trim().is_empty() => {
                return Err(Error::InvalidInput(
                    "TAPESTRY_CONNECTION_BROKER_SECRET is required when TAPESTRY_CONNECTION_BROKER_URL is set"
                        .to_string(),
                ));
            }
            _ => None,
        };

        let cfg = Self {
            sync_interval: env_parse::<u64>("TAPESTRY_SYNC_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(d.sync_interval),
            sync_on_startup: env_bool("TAPESTRY_SYNC_ON_STARTUP")?.unwrap_or(d.sync_on_startup),
            max_concurrent_datasets: env_parse("TAPESTRY_MAX_CONCURRENT_DATASETS")?
                .unwrap_or(d.max_concurrent_datasets),
            public_base_url: std::env::var("TAPESTRY_PUBLIC_BASE_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            http_timeout: env_parse::<u64>("TAPESTRY_HTTP_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(d.http_timeout),
            operation_bus_capacity: env_parse("TAPESTRY_OPERATION_BUS_CAPACITY")?
                .unwrap_or(d.operation_bus_capacity),
            max_webhook_bytes: env_parse("TAPESTRY_MAX_WEBHOOK_BYTES")?
                .unwrap_or(d.max_webhook_bytes),
            broker,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn validate(&self) -> Result<()> {
        if self.sync_interval.is_zero() {
            return Err(Error::InvalidInput(
                "sync interval must be greater than zero".to_string(),
            ));
        }
        if self.max_concurrent_datasets == 0 {
            return Err(Error::InvalidInput(
                "max_concurrent_datasets must be at least 1".to_string(),
            ));
        }
        if self.http_timeout.is_zero() {
            return Err(Error::InvalidInput(
                "http timeout must be greater than zero".to_string(),
            ));
        }
        if self.operation_bus_capacity == 0 {
            return Err(Error::InvalidInput(
                "operation bus capacity must be at least 1".to_string(),
            ));
        }
        if self.max_webhook_bytes == 0 {
            return Err(Error::InvalidInput(
                "max webhook bytes must be at least 1".to_string(),
            ));
        }
        if let Some(url) = &self.public_base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::InvalidInput(format!(
                    "public base url must be http(s), got '{url}'"
                )));
            }
        }
        Ok(())
    }

    /// Outbound HTTP client honoring `http_timeout`.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.http_timeout)
            .user_agent(concat!("tapestry/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::backend_reqwest)
    }
}
