//! Environment indirection for credential and region lookup.
//!
//! Adapters never read process state directly; the host supplies an
//! [`EnvProvider`] so credentials can come from a vault, a test map, or the
//! plain OS environment.

use std::collections::HashMap;

use async_trait::async_trait;

/// Environment keys the built-in providers recognize.
pub mod keys {
    pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
    pub const AWS_REGION: &str = "AWS_REGION";
    pub const AWS_DEFAULT_REGION: &str = "AWS_DEFAULT_REGION";
    pub const AWS_BEARER_TOKEN_BEDROCK: &str = "AWS_BEARER_TOKEN_BEDROCK";
}

/// Key/value lookup for provider credentials and overrides.
#[async_trait]
pub trait EnvProvider: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
}

/// [`EnvProvider`] backed by the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEnv;

#[async_trait]
impl EnvProvider for OsEnv {
    async fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Fixed-map [`EnvProvider`], mainly for tests and embedded hosts.
#[derive(Debug, Default, Clone)]
pub struct StaticEnv {
    values: HashMap<String, String>,
}

impl StaticEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl EnvProvider for StaticEnv {
    async fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

impl FromIterator<(String, String)> for StaticEnv {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
