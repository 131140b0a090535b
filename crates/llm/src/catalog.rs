//! Model catalog cache.
//!
//! Bedrock adapters need to know at construction time whether a model
//! supports prompt caching. The authoritative list is small and static, but
//! catalog lookups also validate that the configured model exists, so the
//! cache keeps both positive entries and a negative set to avoid hammering
//! the catalog API for unknown ids. Reads vastly outnumber writes; plain
//! `std::sync::RwLock` maps are enough.

use std::{
    collections::{HashMap, HashSet},
    sync::RwLock,
};

use aws_sdk_bedrock::Client as BedrockCatalogClient;

/// Anthropic-class model generations with prompt-cache support.
const CACHING_MODEL_MARKERS: &[&str] = &[
    "claude-3-5-haiku",
    "claude-3-5-sonnet-20241022",
    "claude-3-7-sonnet",
    "claude-sonnet-4",
    "claude-opus-4",
    "claude-haiku-4",
];

/// Cross-region inference profile prefixes that wrap a foundation model id.
const GEO_PREFIXES: &[&str] = &["us.", "eu.", "apac.", "global."];

/// Cached catalog facts about one model.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    /// Provider name reported by the catalog, when the model was found there.
    pub provider_name: Option<String>,
    pub caching_supported: bool,
}

/// Process-wide model catalog cache.
///
/// Owned by the host (typically via the runtime) and shared between provider
/// instances; lookups are lazy and never fail the caller.
#[derive(Debug, Default)]
pub struct ModelCatalog {
    entries: RwLock<HashMap<String, CatalogEntry>>,
    misses: RwLock<HashSet<String>>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `model_id` supports prompt-cache annotations.
    ///
    /// Populates the cache from the Bedrock catalog on first sight of an id.
    /// Catalog transport failures fall back to the static rule without
    /// poisoning the negative cache.
    pub async fn caching_supported(&self, client: &BedrockCatalogClient, model_id: &str) -> bool {
        if let Some(entry) = self.lookup(model_id) {
            return entry.caching_supported;
        }

        if self.is_known_miss(model_id) {
            return static_caching_rule(model_id);
        }

        match self.fetch(client, model_id).await {
            Ok(Some(entry)) => {
                let supported = entry.caching_supported;
                self.entries
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .insert(model_id.to_string(), entry);
                supported
            }
            Ok(None) => {
                log::debug!("model {model_id} not present in the Bedrock catalog");
                self.misses
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .insert(model_id.to_string());
                static_caching_rule(model_id)
            }
            Err(error) => {
                log::debug!("catalog lookup for {model_id} failed: {error}");
                static_caching_rule(model_id)
            }
        }
    }

    /// Snapshot of a cached entry, if present.
    pub fn lookup(&self, model_id: &str) -> Option<CatalogEntry> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(model_id)
            .cloned()
    }

    fn is_known_miss(&self, model_id: &str) -> bool {
        self.misses
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(model_id)
    }

    async fn fetch(
        &self,
        client: &BedrockCatalogClient,
        model_id: &str,
    ) -> Result<Option<CatalogEntry>, String> {
        let foundation_id = strip_geo_prefix(model_id);

        let response = client
            .get_foundation_model()
            .model_identifier(foundation_id)
            .send()
            .await;

        match response {
            Ok(output) => {
                let provider_name = output
                    .model_details()
                    .and_then(|details| details.provider_name())
                    .map(str::to_owned);

                Ok(Some(CatalogEntry {
                    provider_name,
                    caching_supported: static_caching_rule(model_id),
                }))
            }
            Err(error) => {
                let service_error = error.into_service_error();
                if service_error.is_resource_not_found_exception() {
                    Ok(None)
                } else {
                    Err(format!("{service_error:?}"))
                }
            }
        }
    }
}

/// Static support table; the catalog API does not report cache capability.
fn static_caching_rule(model_id: &str) -> bool {
    model_id.contains("anthropic.")
        && CACHING_MODEL_MARKERS
            .iter()
            .any(|marker| model_id.contains(marker))
}

fn strip_geo_prefix(model_id: &str) -> &str {
    for prefix in GEO_PREFIXES {
        if let Some(stripped) = model_id.strip_prefix(prefix) {
            return stripped;
        }
    }
    model_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_rule_matches_recent_anthropic_models() {
        assert!(static_caching_rule(
            "us.anthropic.claude-sonnet-4-20250514-v1:0"
        ));
        assert!(static_caching_rule(
            "anthropic.claude-3-5-haiku-20241022-v1:0"
        ));
    }

    #[test]
    fn static_rule_rejects_older_and_foreign_models() {
        assert!(!static_caching_rule("anthropic.claude-3-sonnet-20240229-v1:0"));
        assert!(!static_caching_rule("amazon.nova-pro-v1:0"));
        assert!(!static_caching_rule("meta.llama3-70b-instruct-v1:0"));
    }

    #[test]
    fn geo_prefixes_are_stripped_for_catalog_lookup() {
        assert_eq!(
            strip_geo_prefix("us.anthropic.claude-sonnet-4-20250514-v1:0"),
            "anthropic.claude-sonnet-4-20250514-v1:0"
        );
        assert_eq!(strip_geo_prefix("amazon.nova-lite-v1:0"), "amazon.nova-lite-v1:0");
    }
}
