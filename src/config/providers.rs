//! Provider backend configuration
//!
//! Each `[providers.<name>]` section describes one upstream endpoint: where
//! it lives, how to authenticate, which models it serves, and which
//! transformers shape traffic to and from it.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

// ─────────────────────────────────────────────────────────────────────────────
// Message Format
// ─────────────────────────────────────────────────────────────────────────────

/// Wire format expected by a provider backend
///
/// The format tag selects the endpoint transformer that converts between the
/// Anthropic Messages schema and the provider's native schema:
/// - Anthropic: `/v1/messages`, no conversion needed
/// - OpenAI: `/v1/chat/completions` (OpenAI, OpenRouter, Groq, DeepSeek, XAI, Mistral, Ollama)
/// - Gemini: `:generateContent` with `x-goog-api-key` auth
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageFormat {
    Anthropic,
    #[default]
    Openai,
    Gemini,
}

impl MessageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Openai => "openai",
            Self::Gemini => "gemini",
        }
    }

    /// Default request path for this format, appended to the provider base URL
    ///
    /// Gemini URLs are model-dependent and built by its transformer instead.
    pub fn default_api_path(&self) -> &'static str {
        match self {
            Self::Anthropic => "/v1/messages",
            Self::Openai => "/v1/chat/completions",
            Self::Gemini => "",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transformer References
// ─────────────────────────────────────────────────────────────────────────────

/// Reference to a named transformer, optionally parameterized
///
/// Config accepts either a bare name or a table with options:
/// ```toml
/// transformers = ["tooluse", { name = "maxtoken", options = { max_tokens = 4096 } }]
/// ```
///
/// An entry may carry a `models` filter; filtered entries only apply when the
/// selected upstream model matches one of the listed names.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TransformerRef {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        options: HashMap<String, Value>,
        #[serde(default)]
        models: Vec<String>,
    },
}

impl TransformerRef {
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Detailed { name, .. } => name,
        }
    }

    pub fn options(&self) -> HashMap<String, Value> {
        match self {
            Self::Name(_) => HashMap::new(),
            Self::Detailed { options, .. } => options.clone(),
        }
    }

    /// Whether this entry applies to the given upstream model
    pub fn applies_to(&self, model: &str) -> bool {
        match self {
            Self::Name(_) => true,
            Self::Detailed { models, .. } => {
                models.is_empty() || models.iter().any(|m| m == model)
            }
        }
    }

    /// Whether this entry is model-scoped (runs after the global entries)
    pub fn is_model_scoped(&self) -> bool {
        matches!(self, Self::Detailed { models, .. } if !models.is_empty())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// One `[providers.<name>]` section
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Base URL for the provider's API (e.g., "https://api.openai.com")
    pub base_url: String,

    /// Credential attached on dispatch; opaque to the gateway
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable to read the credential from (preferred over api_key)
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Model identifiers this provider serves
    #[serde(default)]
    pub models: Vec<String>,

    /// Disabled providers stay registered but reject routing
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Ordered transformer references applied to traffic for this provider
    #[serde(default)]
    pub transformers: Vec<TransformerRef>,

    /// Wire format tag selecting the endpoint transformer
    #[serde(default)]
    pub message_format: MessageFormat,

    /// Custom credential header name (default: `Authorization: Bearer`)
    #[serde(default)]
    pub auth_header: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl ProviderConfig {
    /// Resolve the credential: env var takes precedence over the inline value
    pub fn resolve_key(&self) -> Option<String> {
        if let Some(env_name) = &self.api_key_env {
            if let Ok(value) = std::env::var(env_name) {
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }
        self.api_key.clone()
    }

    /// Validate the invariants a registered provider must hold
    pub fn validate(&self, name: &str) -> Result<(), String> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(format!(
                "provider '{}': base_url must use http or https, got '{}'",
                name, self.base_url
            ));
        }
        if self.enabled && self.models.is_empty() {
            return Err(format!(
                "provider '{}': enabled providers must list at least one model",
                name
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transformer_ref_bare_name() {
        let parsed: Vec<TransformerRef> = toml::from_str::<toml::Value>(
            r#"transformers = ["tooluse", "deepseek"]"#,
        )
        .unwrap()
        .get("transformers")
        .unwrap()
        .clone()
        .try_into()
        .unwrap();

        assert_eq!(parsed[0].name(), "tooluse");
        assert!(parsed[0].options().is_empty());
        assert!(parsed[1].applies_to("anything"));
    }

    #[test]
    fn test_transformer_ref_with_options_and_models() {
        let toml_str = r#"
            transformers = [{ name = "maxtoken", options = { max_tokens = 4096 }, models = ["gpt-4"] }]
        "#;
        let parsed: Vec<TransformerRef> = toml::from_str::<toml::Value>(toml_str)
            .unwrap()
            .get("transformers")
            .unwrap()
            .clone()
            .try_into()
            .unwrap();

        assert_eq!(parsed[0].name(), "maxtoken");
        assert_eq!(
            parsed[0].options().get("max_tokens").and_then(|v| v.as_u64()),
            Some(4096)
        );
        assert!(parsed[0].applies_to("gpt-4"));
        assert!(!parsed[0].applies_to("gpt-3.5-turbo"));
        assert!(parsed[0].is_model_scoped());
    }

    #[test]
    fn test_provider_validation_rejects_bad_scheme() {
        let provider = ProviderConfig {
            base_url: "ftp://example.com".to_string(),
            api_key: None,
            api_key_env: None,
            models: vec!["m".to_string()],
            enabled: true,
            transformers: Vec::new(),
            message_format: MessageFormat::Openai,
            auth_header: None,
        };
        assert!(provider.validate("bad").is_err());
    }

    #[test]
    fn test_provider_validation_requires_models_when_enabled() {
        let provider = ProviderConfig {
            base_url: "https://example.com".to_string(),
            api_key: None,
            api_key_env: None,
            models: Vec::new(),
            enabled: true,
            transformers: Vec::new(),
            message_format: MessageFormat::Openai,
            auth_header: None,
        };
        assert!(provider.validate("empty").is_err());

        let disabled = ProviderConfig {
            enabled: false,
            ..provider
        };
        assert!(disabled.validate("empty").is_ok());
    }

    #[test]
    fn test_message_format_paths() {
        assert_eq!(MessageFormat::Anthropic.default_api_path(), "/v1/messages");
        assert_eq!(
            MessageFormat::Openai.default_api_path(),
            "/v1/chat/completions"
        );
    }
}
