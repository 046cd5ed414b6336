//! Built-in provider integrations for tapestry.
//!
//! Each connector is behind a cargo feature of the same name; `builtin_registry`
//! registers every enabled one.

pub mod connectors;
mod http;

use tapestry_core::{IntegrationRegistry, Result};

#[derive(Debug, Clone, Default)]
pub struct IntegrationsConfig {
    /// GitHub is only registered when an OAuth app is configured.
    #[cfg(feature = "github")]
    pub github: Option<connectors::github::GithubConfig>,
    #[cfg(feature = "toggl")]
    pub toggl_base_url: Option<String>,
    #[cfg(feature = "oura")]
    pub oura_base_url: Option<String>,
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl IntegrationsConfig {
    /// Reads `TAPESTRY_GITHUB_CLIENT_ID` / `TAPESTRY_GITHUB_CLIENT_SECRET` and
    /// the optional `TAPESTRY_TOGGL_BASE_URL` / `TAPESTRY_OURA_BASE_URL`.
    pub fn from_env() -> Self {
        Self {
            #[cfg(feature = "github")]
            github: match (
                env_nonempty("TAPESTRY_GITHUB_CLIENT_ID"),
                env_nonempty("TAPESTRY_GITHUB_CLIENT_SECRET"),
            ) {
                (Some(id), Some(secret)) => Some(connectors::github::GithubConfig::new(id, secret)),
                _ => None,
            },
            #[cfg(feature = "toggl")]
            toggl_base_url: env_nonempty("TAPESTRY_TOGGL_BASE_URL"),
            #[cfg(feature = "oura")]
            oura_base_url: env_nonempty("TAPESTRY_OURA_BASE_URL"),
        }
    }
}

/// Registry with every enabled connector.
#[tracing::instrument(level = "info", skip_all)]
pub fn builtin_registry(cfg: &IntegrationsConfig) -> Result<IntegrationRegistry> {
    #[allow(unused_mut)]
    let mut builder = IntegrationRegistry::builder();

    #[cfg(feature = "toggl")]
    {
        let base = cfg
            .toggl_base_url
            .as_deref()
            .unwrap_or(connectors::toggl::DEFAULT_BASE_URL);
        builder = builder.register(connectors::toggl::integration(base)?)?;
    }

    #[cfg(feature = "oura")]
    {
        let base = cfg
            .oura_base_url
            .as_deref()
            .unwrap_or(connectors::oura::DEFAULT_BASE_URL);
        builder = builder.register(connectors::oura::integration(base)?)?;
    }

    #[cfg(feature = "github")]
    {
        match &cfg.github {
            Some(gh) => builder = builder.register(connectors::github::integration(gh.clone())?)?,
            None => tracing::info!("github oauth app not configured; integration disabled"),
        }
    }

    let registry = builder.build();
    tracing::info!(integrations = registry.len(), "integration registry ready");
    Ok(registry)
}
