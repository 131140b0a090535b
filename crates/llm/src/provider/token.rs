//! Credential transport for HTTP providers.
//!
//! Two auth styles exist: a static API key read from the environment
//! provider under a configurable key name, and a short-lived gateway token
//! fetched from an injected [`TokenSource`] on every request.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;

use config::ModelConfig;

use crate::{env::EnvProvider, error::LlmError};

/// Source of short-lived gateway credentials, consulted per request.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> crate::Result<SecretString>;
}

pub(crate) enum Auth {
    /// Key resolved from config or environment on each request.
    Env { key_name: String },
    /// Injected gateway source; the adapter also rebuilds its HTTP client
    /// per request in this mode.
    Gateway(Arc<dyn TokenSource>),
}

impl Auth {
    pub(crate) fn from_config(config: &ModelConfig, default_key: &str) -> Self {
        Self::Env {
            key_name: config
                .token_key
                .clone()
                .unwrap_or_else(|| default_key.to_string()),
        }
    }

    pub(crate) fn is_gateway(&self) -> bool {
        matches!(self, Self::Gateway(_))
    }

    pub(crate) async fn bearer(
        &self,
        config: &ModelConfig,
        env: &dyn EnvProvider,
    ) -> crate::Result<SecretString> {
        match self {
            Self::Gateway(source) => source.token().await,
            Self::Env { key_name } => {
                if let Some(key) = config.api_key() {
                    return Ok(key);
                }

                env.get(key_name)
                    .await
                    .map(SecretString::from)
                    .ok_or_else(|| {
                        LlmError::AuthenticationFailed(format!("{key_name} is not set"))
                    })
            }
        }
    }
}
