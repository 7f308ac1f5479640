use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// A missing credential is valid: requests are then answered with the
/// configured notice instead of being relayed.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_upstream(config)?;
    validate_log_level(config)?;
    validate_prompt_template(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if server.timeout == 0 {
        return Err(validation_err("server.timeout must be greater than 0"));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    Ok(())
}

fn validate_upstream(config: &AppConfig) -> Result<(), ConfigError> {
    let upstream = &config.upstream;
    validate_http_url("upstream.base_url", &upstream.base_url)?;
    if let Some(proxy) = upstream.proxy.as_deref() {
        validate_http_url("upstream.proxy", proxy.trim())?;
    }
    if upstream.model.trim().is_empty() {
        return Err(validation_err("upstream.model cannot be empty"));
    }
    if !(0.0..=2.0).contains(&upstream.temperature) {
        return Err(validation_err("upstream.temperature must be within 0..=2"));
    }
    if !(0.0..=1.0).contains(&upstream.top_p) {
        return Err(validation_err("upstream.top_p must be within 0..=1"));
    }
    for (name, value) in [
        ("frequency_penalty", upstream.frequency_penalty),
        ("presence_penalty", upstream.presence_penalty),
    ] {
        if !(-2.0..=2.0).contains(&value) {
            return Err(validation_err(format!(
                "upstream.{name} must be within -2..=2"
            )));
        }
    }
    if upstream.max_tokens == 0 {
        return Err(validation_err("upstream.max_tokens must be greater than 0"));
    }
    Ok(())
}

fn validate_http_url(field_name: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(validation_err(format!("{field_name} cannot be empty")));
    }
    let parsed = url::Url::parse(value)
        .map_err(|err| validation_err(format!("{field_name} is not a valid URL: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "{field_name} must use http:// or https://"
        )));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}

fn validate_prompt_template(config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(ref tmpl) = config.features.prompt_template {
        if !tmpl.contains("{fact}") || !tmpl.contains("{appeal}") {
            return Err(validation_err(
                "prompt_template must contain {fact} and {appeal} placeholders",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;

    #[test]
    fn test_valid_default_config() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let mut config = AppConfig::default();
        config.upstream.base_url = "ftp://api.example.com".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("http:// or https://"));
    }

    #[test]
    fn test_rejects_invalid_proxy() {
        let mut config = AppConfig::default();
        config.upstream.proxy = Some("not a url".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_sampling() {
        let mut config = AppConfig::default();
        config.upstream.top_p = 1.5;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.upstream.presence_penalty = -3.0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("presence_penalty"));
    }

    #[test]
    fn test_rejects_zero_max_tokens() {
        let mut config = AppConfig::default();
        config.upstream.max_tokens = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        let mut config = AppConfig::default();
        config.features.log_level = "TRACE".to_string();
        assert!(validate_config(&config).is_err());

        config.features.log_level = "warning".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_prompt_template_needs_placeholders() {
        let mut config = AppConfig::default();
        config.features.prompt_template = Some("only {fact}".to_string());
        assert!(validate_config(&config).is_err());

        config.features.prompt_template = Some("{fact} / {appeal}".to_string());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_missing_credential_is_valid() {
        let mut config = AppConfig::default();
        config.upstream.api_key = None;
        assert!(validate_config(&config).is_ok());
    }
}
