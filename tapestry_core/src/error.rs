use std::error::Error as StdError;

/// Common error type for `tapestry_core`.
///
/// Failures raised by a provider getter are wrapped in `Error::Provider` so the
/// sync engine can log them against the unit that produced them. Storage
/// backends preserve the underlying error chain via `Error::backend`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("provider error ({integration}): {context}")]
    Provider {
        integration: String,
        context: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    },

    #[error("table '{table}' returned {found}, expected an array")]
    ShapeMismatch { table: String, found: &'static str },

    #[error("backend error: {context}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    #[error("backend error: {0}")]
    BackendMessage(String),
}

impl Error {
    #[tracing::instrument(level = "debug", name = "tapestry.error.backend", skip(source))]
    pub fn backend(
        context: impl Into<String> + std::fmt::Debug,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Convenience: wrap any error into `Backend` with "reqwest" context.
    pub fn backend_reqwest(source: impl StdError + Send + Sync + 'static) -> Self {
        Self::Backend {
            context: "reqwest".into(),
            source: Box::new(source),
        }
    }

    /// A provider call failed with an underlying error.
    pub fn provider(
        integration: impl Into<String>,
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Provider {
            integration: integration.into(),
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// A provider call failed without an underlying error value (bad status, missing field).
    pub fn provider_message(integration: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Provider {
            integration: integration.into(),
            context: context.into(),
            source: None,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(value: sqlx::Error) -> Self {
        Self::backend("sqlx", value)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Short name for the JSON kind of `value`, used in shape diagnostics.
pub fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
