//! Configuration loading and validation tests

use super::*;

fn sample_toml() -> &'static str {
    r#"
        host = "0.0.0.0"
        port = 8080
        api_key = "secret"

        [log]
        level = "debug"

        [performance]
        request_timeout_secs = 60
        rate_limit_enabled = true
        rate_limit_requests_per_second = 5.0

        [providers.openai]
        base_url = "https://api.openai.com"
        api_key = "sk-test"
        models = ["gpt-4", "gpt-3.5-turbo"]

        [providers.anthropic]
        base_url = "https://api.anthropic.com"
        api_key = "sk-ant"
        models = ["claude-3-opus"]
        message_format = "anthropic"
        transformers = ["maxtoken"]

        [routes]
        default = "openai,gpt-4"
        long_context = "anthropic,claude-3-opus"
        background = "openai,gpt-3.5-turbo"
        think = "anthropic,claude-3-opus"

        [routes.models]
        "gpt-4" = "openai,gpt-4"
    "#
}

fn parse(toml_str: &str) -> anyhow::Result<Config> {
    let file: FileConfig = toml::from_str(toml_str)?;
    let config = Config::from_file(file)?;
    config.validate()?;
    Ok(config)
}

#[test]
fn test_full_config_parses() {
    let config = parse(sample_toml()).unwrap();

    assert_eq!(config.host, "0.0.0.0");
    assert_eq!(config.port, 8080);
    assert_eq!(config.api_key.as_deref(), Some("secret"));
    assert_eq!(config.log.level, "debug");
    assert_eq!(config.performance.request_timeout_secs, 60);
    assert!(config.performance.rate_limit_enabled);

    let openai = &config.providers["openai"];
    assert_eq!(openai.message_format, MessageFormat::Openai);
    assert!(openai.enabled);
    assert_eq!(openai.models.len(), 2);

    let anthropic = &config.providers["anthropic"];
    assert_eq!(anthropic.message_format, MessageFormat::Anthropic);
    assert_eq!(anthropic.transformers[0].name(), "maxtoken");

    assert_eq!(config.routes.default.provider, "openai");
    assert_eq!(config.routes.models["gpt-4"].model, "gpt-4");
}

#[test]
fn test_missing_routes_section_is_an_error() {
    let toml_str = r#"
        [providers.openai]
        base_url = "https://api.openai.com"
        models = ["gpt-4"]
    "#;
    assert!(toml::from_str::<FileConfig>(toml_str).is_err());
}

#[test]
fn test_route_to_unknown_provider_rejected() {
    let toml_str = r#"
        [providers.openai]
        base_url = "https://api.openai.com"
        models = ["gpt-4"]

        [routes]
        default = "missing,gpt-4"
    "#;
    let err = parse(toml_str).unwrap_err();
    assert!(err.to_string().contains("unknown provider"));
}

#[test]
fn test_defaults_applied() {
    let toml_str = r#"
        [providers.openai]
        base_url = "https://api.openai.com"
        models = ["gpt-4"]

        [routes]
        default = "openai,gpt-4"
    "#;
    let config = parse(toml_str).unwrap();

    assert_eq!(config.host, "127.0.0.1");
    assert_eq!(config.port, 3456);
    assert!(config.api_key.is_none());
    assert_eq!(config.performance.request_timeout_secs, 30);
    assert_eq!(config.shutdown_timeout_secs, 10);
}

#[test]
fn test_bind_addr() {
    let config = parse(sample_toml()).unwrap();
    let addr = config.bind_addr().unwrap();
    assert_eq!(addr.port(), 8080);
}

#[test]
fn test_enabled_provider_without_models_rejected() {
    let toml_str = r#"
        [providers.openai]
        base_url = "https://api.openai.com"
        models = []

        [routes]
        default = "openai,gpt-4"
    "#;
    assert!(parse(toml_str).is_err());
}
