//! Routing table configuration
//!
//! Routes map a routing condition to a `(provider, model)` target. Targets
//! are written in the same `"provider,model"` encoding clients may use for
//! explicit selection, split on the first comma only.
//!
//! ```toml
//! [routes]
//! default = "openai,gpt-4"
//! long_context = "anthropic,claude-3-opus"
//! background = "openai,gpt-3.5-turbo"
//! think = "anthropic,claude-3-opus"
//!
//! [routes.models]
//! "gpt-4" = "openai,gpt-4"
//! ```

use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;

/// A `(provider, model)` routing target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub provider: String,
    pub model: String,
}

impl FromStr for RouteTarget {
    type Err = String;

    /// Parse `"provider,model"`, splitting on the first comma only so model
    /// names containing commas survive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, model) = s
            .split_once(',')
            .ok_or_else(|| format!("route target '{}' must be 'provider,model'", s))?;
        let provider = provider.trim();
        let model = model.trim();
        if provider.is_empty() || model.is_empty() {
            return Err(format!(
                "route target '{}' must name both a provider and a model",
                s
            ));
        }
        Ok(Self {
            provider: provider.to_string(),
            model: model.to_string(),
        })
    }
}

impl<'de> Deserialize<'de> for RouteTarget {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The `[routes]` section
///
/// `default` is mandatory; the reserved routes are optional and skipped when
/// absent. `models` holds direct overrides keyed by the exact client-requested
/// model string.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutesConfig {
    pub default: RouteTarget,

    #[serde(default, alias = "longContext")]
    pub long_context: Option<RouteTarget>,

    #[serde(default)]
    pub background: Option<RouteTarget>,

    #[serde(default)]
    pub think: Option<RouteTarget>,

    /// Direct overrides: requested model string → target
    #[serde(default)]
    pub models: HashMap<String, RouteTarget>,
}

impl RoutesConfig {
    /// Every route target in the table, for provider-existence validation
    pub fn all_targets(&self) -> Vec<&RouteTarget> {
        let mut targets = vec![&self.default];
        targets.extend(self.long_context.iter());
        targets.extend(self.background.iter());
        targets.extend(self.think.iter());
        targets.extend(self.models.values());
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_target_parse() {
        let target: RouteTarget = "openai,gpt-4".parse().unwrap();
        assert_eq!(target.provider, "openai");
        assert_eq!(target.model, "gpt-4");
    }

    #[test]
    fn test_route_target_splits_first_comma_only() {
        let target: RouteTarget = "openrouter,anthropic/claude-3,beta".parse().unwrap();
        assert_eq!(target.provider, "openrouter");
        assert_eq!(target.model, "anthropic/claude-3,beta");
    }

    #[test]
    fn test_route_target_rejects_missing_parts() {
        assert!("openai".parse::<RouteTarget>().is_err());
        assert!(",gpt-4".parse::<RouteTarget>().is_err());
        assert!("openai,".parse::<RouteTarget>().is_err());
    }

    #[test]
    fn test_routes_config_from_toml() {
        let toml_str = r#"
            default = "openai,gpt-4"
            long_context = "anthropic,claude-3-opus"

            [models]
            "gpt-4" = "openai,gpt-4"
        "#;
        let routes: RoutesConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(routes.default.provider, "openai");
        assert_eq!(
            routes.long_context.as_ref().unwrap().model,
            "claude-3-opus"
        );
        assert!(routes.background.is_none());
        assert_eq!(routes.models["gpt-4"].provider, "openai");
        assert_eq!(routes.all_targets().len(), 3);
    }

    #[test]
    fn test_long_context_alias() {
        let toml_str = r#"
            default = "openai,gpt-4"
            longContext = "anthropic,claude-3-opus"
        "#;
        let routes: RoutesConfig = toml::from_str(toml_str).unwrap();
        assert!(routes.long_context.is_some());
    }
}
