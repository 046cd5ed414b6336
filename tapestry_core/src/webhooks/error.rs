use reqwest::StatusCode;

/// Why a webhook delivery was rejected. Rejections never mutate state.
#[derive(thiserror::Error, Debug)]
pub enum WebhookError {
    #[error("no webhook handler for integration '{0}'")]
    UnknownIntegration(String),

    #[error("method {0} not accepted")]
    MethodNotAllowed(String),

    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("malformed body: {0}")]
    MalformedBody(String),

    #[error("missing signature header '{0}'")]
    MissingSignature(String),

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("no table or object for model '{0}'")]
    UnknownTarget(String),

    #[error(transparent)]
    Core(#[from] crate::Error),
}

impl WebhookError {
    pub fn status(&self) -> StatusCode {
        match self {
            WebhookError::UnknownIntegration(_) => StatusCode::NOT_FOUND,
            WebhookError::MethodNotAllowed(_)
            | WebhookError::UnsupportedContentType(_)
            | WebhookError::BodyTooLarge { .. }
            | WebhookError::MalformedBody(_)
            | WebhookError::MissingSignature(_)
            | WebhookError::SignatureMismatch => StatusCode::BAD_REQUEST,
            // Acknowledged so the provider does not retry an event we can never route.
            WebhookError::UnknownTarget(_) => StatusCode::NO_CONTENT,
            WebhookError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
