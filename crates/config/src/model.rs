//! Model binding configuration.

use std::collections::BTreeMap;

use secrecy::SecretString;
use serde::Deserialize;
use serde_json::Value;

/// Recognized keys of the [`ModelConfig::provider_opts`] table.
///
/// The table stays open (unknown keys are preserved for forward
/// compatibility); these constants cover the keys the built-in providers
/// read.
pub mod provider_opts {
    pub const REGION: &str = "region";
    pub const PROFILE: &str = "profile";
    pub const ROLE_ARN: &str = "role_arn";
    pub const ROLE_SESSION_NAME: &str = "role_session_name";
    pub const EXTERNAL_ID: &str = "external_id";
    pub const ENDPOINT_URL: &str = "endpoint_url";
    pub const API_KEY: &str = "api_key";
    pub const INTERLEAVED_THINKING: &str = "interleaved_thinking";
    pub const DISABLE_PROMPT_CACHING: &str = "disable_prompt_caching";
}

/// Provider backing a model binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// OpenAI-compatible HTTP provider.
    Openai,
    /// AWS Bedrock via the Converse API.
    Bedrock,
}

impl ProviderKind {
    /// Stable name used in `"provider/model"` identifiers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Openai => "openai",
            Self::Bedrock => "bedrock",
        }
    }
}

/// Extended-thinking budget for reasoning-capable models.
///
/// Bedrock Anthropic models consume `tokens`; Responses-style OpenAI models
/// consume `effort`. Validation is provider-specific and happens at adapter
/// construction, not at parse time.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThinkingBudget {
    #[serde(default)]
    pub tokens: Option<u32>,
    #[serde(default)]
    pub effort: Option<String>,
}

/// Configuration for a single provider/model binding.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Which provider adapter serves this model.
    pub provider: ProviderKind,

    /// Provider-side model identifier.
    pub model: String,

    /// Custom base URL (HTTP providers) or endpoint override.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Maximum tokens to generate per turn.
    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub top_p: Option<f32>,

    #[serde(default)]
    pub frequency_penalty: Option<f32>,

    #[serde(default)]
    pub presence_penalty: Option<f32>,

    /// Whether the model may emit several tool calls in one turn.
    #[serde(default)]
    pub parallel_tool_calls: Option<bool>,

    /// Attach per-message usage snapshots to assistant messages.
    #[serde(default)]
    pub track_usage: bool,

    /// Environment key holding the API credential. Falls back to the
    /// provider default (`OPENAI_API_KEY` for OpenAI) when unset.
    #[serde(default)]
    pub token_key: Option<String>,

    /// Provider-specific switches; see [`provider_opts`] for recognized keys.
    #[serde(default)]
    pub provider_opts: BTreeMap<String, Value>,

    /// Extended-thinking budget, if the model should reason before answering.
    #[serde(default)]
    pub thinking_budget: Option<ThinkingBudget>,
}

impl ModelConfig {
    /// Minimal config for the given provider and model.
    pub fn new(provider: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            base_url: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            parallel_tool_calls: None,
            track_usage: false,
            token_key: None,
            provider_opts: BTreeMap::new(),
            thinking_budget: None,
        }
    }

    fn opt_str(&self, key: &str) -> Option<&str> {
        self.provider_opts.get(key).and_then(Value::as_str)
    }

    fn opt_bool(&self, key: &str) -> bool {
        self.provider_opts
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// AWS region override.
    pub fn region(&self) -> Option<&str> {
        self.opt_str(provider_opts::REGION)
    }

    /// AWS shared-config profile name.
    pub fn profile(&self) -> Option<&str> {
        self.opt_str(provider_opts::PROFILE)
    }

    /// IAM role to assume before calling Bedrock.
    pub fn role_arn(&self) -> Option<&str> {
        self.opt_str(provider_opts::ROLE_ARN)
    }

    /// Session name for the assumed role.
    pub fn role_session_name(&self) -> Option<&str> {
        self.opt_str(provider_opts::ROLE_SESSION_NAME)
    }

    /// External id for the assumed role.
    pub fn external_id(&self) -> Option<&str> {
        self.opt_str(provider_opts::EXTERNAL_ID)
    }

    /// Endpoint URL override (VPC endpoints, test servers).
    pub fn endpoint_url(&self) -> Option<&str> {
        self.opt_str(provider_opts::ENDPOINT_URL)
    }

    /// Inline API credential. Takes precedence over environment lookup.
    pub fn api_key(&self) -> Option<SecretString> {
        self.opt_str(provider_opts::API_KEY)
            .map(|key| SecretString::from(key.to_owned()))
    }

    /// Whether interleaved thinking is requested (Anthropic beta).
    pub fn interleaved_thinking(&self) -> bool {
        self.opt_bool(provider_opts::INTERLEAVED_THINKING)
    }

    /// Whether prompt-cache annotations are explicitly disabled.
    pub fn disable_prompt_caching(&self) -> bool {
        self.opt_bool(provider_opts::DISABLE_PROMPT_CACHING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use insta::assert_debug_snapshot;
    use secrecy::ExposeSecret;

    #[test]
    fn minimal_openai_config() {
        let config = indoc! {r#"
            provider = "openai"
            model = "gpt-4o"
        "#};

        let config: ModelConfig = toml::from_str(config).unwrap();

        assert_debug_snapshot!(&config, @r#"
        ModelConfig {
            provider: Openai,
            model: "gpt-4o",
            base_url: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            parallel_tool_calls: None,
            track_usage: false,
            token_key: None,
            provider_opts: {},
            thinking_budget: None,
        }
        "#);
    }

    #[test]
    fn bedrock_config_with_provider_opts() {
        let config = indoc! {r#"
            provider = "bedrock"
            model = "us.anthropic.claude-sonnet-4-20250514-v1:0"
            max_tokens = 8192

            [provider_opts]
            region = "eu-west-1"
            profile = "staging"
            interleaved_thinking = true
            disable_prompt_caching = false
        "#};

        let config: ModelConfig = toml::from_str(config).unwrap();

        assert_eq!(config.region(), Some("eu-west-1"));
        assert_eq!(config.profile(), Some("staging"));
        assert!(config.interleaved_thinking());
        assert!(!config.disable_prompt_caching());
        assert_eq!(config.role_arn(), None);
    }

    #[test]
    fn inline_api_key_is_exposed_through_accessor() {
        let config = indoc! {r#"
            provider = "openai"
            model = "gpt-4o-mini"

            [provider_opts]
            api_key = "sk-test-1234"
        "#};

        let config: ModelConfig = toml::from_str(config).unwrap();
        let key = config.api_key().expect("api key");

        assert_eq!(key.expose_secret(), "sk-test-1234");
    }

    #[test]
    fn thinking_budget_roundtrip() {
        let config = indoc! {r#"
            provider = "bedrock"
            model = "anthropic.claude-3-7-sonnet-20250219-v1:0"

            [thinking_budget]
            tokens = 2048
        "#};

        let config: ModelConfig = toml::from_str(config).unwrap();
        let budget = config.thinking_budget.as_ref().expect("budget");

        assert_eq!(budget.tokens, Some(2048));
        assert_eq!(budget.effort, None);
    }

    #[test]
    fn unknown_top_level_field_is_rejected() {
        let config = indoc! {r#"
            provider = "openai"
            model = "gpt-4o"
            max_output_tokens = 100
        "#};

        let err = toml::from_str::<ModelConfig>(config).unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn unknown_provider_opt_is_preserved() {
        let config = indoc! {r#"
            provider = "openai"
            model = "gpt-4o"

            [provider_opts]
            organization = "org-42"
        "#};

        let config: ModelConfig = toml::from_str(config).unwrap();
        assert_eq!(
            config.provider_opts.get("organization").and_then(|v| v.as_str()),
            Some("org-42")
        );
    }
}
