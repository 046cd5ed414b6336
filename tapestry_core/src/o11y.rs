//! Process-wide logging setup.

use crate::{Error, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Used when `RUST_LOG` is unset or invalid.
    pub default_directive: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            default_directive: "info".to_string(),
        }
    }
}

impl LogConfig {
    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        let format = match std::env::var("TAPESTRY_LOG_FORMAT").ok().as_deref() {
            None | Some("") | Some("json") => LogFormat::Json,
            Some("pretty") => LogFormat::Pretty,
            Some(other) => {
                return Err(Error::InvalidInput(format!(
                    "TAPESTRY_LOG_FORMAT must be 'json' or 'pretty', got '{other}'"
                )));
            }
        };
        Ok(Self {
            format,
            ..Self::default()
        })
    }
}

#[tracing::instrument(level = "info", skip_all)]
pub fn init_global_from_env() -> Result<()> {
    init_global(LogConfig::from_env()?)
}

/// Install the global subscriber. A second call returns `Error::Conflict`.
pub fn init_global(cfg: LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.default_directive));
    let registry = tracing_subscriber::registry().with(filter);
    let res = match cfg.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
    };
    res.map_err(|e| Error::Conflict(format!("tracing already initialized: {e}")))
}
