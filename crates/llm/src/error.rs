use thiserror::Error;

pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Provider and adapter errors.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Invalid provider or model configuration, rejected at construction.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Authentication failed (missing or invalid credentials).
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Insufficient quota or credits.
    #[error("Insufficient quota: {0}")]
    InsufficientQuota(String),

    /// Model not found at the provider.
    #[error("{0}")]
    ModelNotFound(String),

    /// Invalid request parameters.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded: {message}")]
    RateLimitExceeded { message: String },

    /// Provider API returned an error.
    #[error("Provider API error ({status}): {message}")]
    ProviderApiError { status: u16, message: String },

    /// Network or connection error.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Unexpected or malformed stream event.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The host cancelled the in-flight operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal error.
    /// If Some(message), it came from a provider and can be shown.
    /// If None, details should not leak.
    #[error("Internal error")]
    Internal(Option<String>),
}

impl LlmError {
    /// Stable error kind string, used by runtime error events.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "invalid_config",
            Self::AuthenticationFailed(_) | Self::InsufficientQuota(_) => "auth",
            Self::ModelNotFound(_)
            | Self::RateLimitExceeded { .. }
            | Self::ProviderApiError { .. }
            | Self::ConnectionError(_) => "transport",
            Self::Protocol(_) => "protocol",
            Self::InvalidRequest(_) => "invalid_arguments",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal",
        }
    }

    /// Map a non-2xx provider response to the matching error variant.
    pub(crate) fn from_status(status: u16, message: String) -> Self {
        match status {
            400 => Self::InvalidRequest(message),
            401 => Self::AuthenticationFailed(message),
            403 => Self::InsufficientQuota(message),
            404 => Self::ModelNotFound(message),
            429 => Self::RateLimitExceeded { message },
            500 => Self::Internal(Some(message)),
            _ => Self::ProviderApiError { status, message },
        }
    }
}
