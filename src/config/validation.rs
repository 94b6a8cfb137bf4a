use crate::config::types::{Config, FetcherConfig, OutputConfig, UserAgentConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_fetcher_config(&config.fetcher)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates fetcher configuration
pub(crate) fn validate_fetcher_config(config: &FetcherConfig) -> Result<(), ConfigError> {
    if config.max_threads < 1 || config.max_threads > 1000 {
        return Err(ConfigError::Validation(format!(
            "max_threads must be between 1 and 1000, got {}",
            config.max_threads
        )));
    }

    if config.max_urls_per_batch < 1 {
        return Err(ConfigError::Validation(format!(
            "max_urls_per_batch must be >= 1, got {}",
            config.max_urls_per_batch
        )));
    }

    // Catches delays given in seconds instead of milliseconds
    if config.default_crawl_delay != 0 && config.default_crawl_delay < 100 {
        return Err(ConfigError::Validation(format!(
            "default_crawl_delay must be 0 or >= 100ms (it is in milliseconds), got {}",
            config.default_crawl_delay
        )));
    }

    if config.fetch_interval < 1000 {
        return Err(ConfigError::Validation(format!(
            "fetch_interval must be >= 1000ms, got {}ms",
            config.fetch_interval
        )));
    }

    if config.min_response_rate == Some(0) {
        return Err(ConfigError::Validation(
            "min_response_rate must be > 0 when set".to_string(),
        ));
    }

    if config.max_content_size == 0 {
        return Err(ConfigError::Validation(
            "max_content_size must be > 0".to_string(),
        ));
    }

    if config.request_timeout < 100 {
        return Err(ConfigError::Validation(format!(
            "request_timeout must be >= 100ms, got {}ms",
            config.request_timeout
        )));
    }

    if config.accept_language.trim().is_empty() {
        return Err(ConfigError::Validation(
            "accept_language cannot be empty".to_string(),
        ));
    }

    if let Some(types) = &config.valid_mime_types {
        for mime in types {
            let (kind, subtype) = mime.split_once('/').unwrap_or(("", ""));
            if kind.trim().is_empty() || subtype.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Invalid mime type '{}' in valid_mime_types",
                    mime
                )));
            }
        }
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if let Some(path) = &config.status_path {
        if path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "status_path cannot be empty when set".to_string(),
            ));
        }
    }
    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let (local, domain) = email
        .split_once('@')
        .ok_or_else(|| ConfigError::Validation(format!("Invalid email format: '{}'", email)))?;

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
