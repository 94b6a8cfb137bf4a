use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads, parses and validates a fetch configuration file
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use sumi_fetch::config::load_config;
///
/// let config = load_config(Path::new("fetch.toml")).unwrap();
/// println!("Threads: {}", config.fetcher.max_threads);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// The hash is logged at startup so status output can be tied back to the
/// exact settings that produced it.
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(hash_content(&content))
}

fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Loads a configuration and returns both the config and its hash
///
/// The file is read once, so the hash always matches the parsed settings.
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    Ok((config, hash_content(&content)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const USER_AGENT_SECTION: &str = r#"
[user-agent]
crawler-name = "TestFetcher"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"
"#;

    #[test]
    fn test_load_minimal_config_uses_defaults() {
        let content = format!("[fetcher]\nmax-threads = 4\n{}", USER_AGENT_SECTION);
        let file = create_temp_config(&content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.fetcher.max_threads, 4);
        assert_eq!(config.fetcher.max_urls_per_batch, 50);
        assert_eq!(config.fetcher.default_crawl_delay, 30_000);
        assert_eq!(config.fetcher.max_content_size, 64 * 1024);
        assert_eq!(config.fetcher.max_redirects, 20);
        assert_eq!(
            config.fetcher.accept_language,
            "en-us,en-gb,en;q=0.7,*;q=0.3"
        );
        assert!(config.fetcher.crawl_end_time.is_none());
        assert!(config.output.status_path.is_none());
        assert_eq!(config.user_agent.crawler_name, "TestFetcher");
    }

    #[test]
    fn test_load_full_config() {
        let content = format!(
            r#"
[fetcher]
max-threads = 20
max-urls-per-batch = 10
default-crawl-delay = 5000
fetch-interval = 60000
crawl-end-time = "2030-01-01T00:00:00Z"
min-response-rate = 1024
max-content-size = 131072
max-redirects = 5
valid-mime-types = ["text/html", "application/xhtml+xml"]
request-timeout = 10000
use-pld = true

[output]
status-path = "./status.tsv"
{}"#,
            USER_AGENT_SECTION
        );
        let file = create_temp_config(&content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.fetcher.max_urls_per_batch, 10);
        assert_eq!(config.fetcher.min_response_rate, Some(1024));
        assert_eq!(
            config.fetcher.crawl_end_time.map(|t| t.to_rfc3339()),
            Some("2030-01-01T00:00:00+00:00".to_string())
        );
        assert_eq!(config.fetcher.valid_mime_types.as_ref().map(Vec::len), Some(2));
        assert!(config.fetcher.use_pld);
        assert_eq!(config.output.status_path.as_deref(), Some("./status.tsv"));
        assert_eq!(
            Duration::from_millis(config.fetcher.default_crawl_delay),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/fetch.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let content = format!(
            "[fetcher]\nmax-threads = 4\ndefault-crawl-delay = 30\n{}",
            USER_AGENT_SECTION
        );
        let file = create_temp_config(&content);
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_load_with_hash_matches_file_hash() {
        let content = format!("[fetcher]\nmax-threads = 4\n{}", USER_AGENT_SECTION);
        let file = create_temp_config(&content);

        let (_, hash) = load_config_with_hash(file.path()).unwrap();
        assert_eq!(hash, compute_config_hash(file.path()).unwrap());
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        assert_ne!(
            compute_config_hash(file1.path()).unwrap(),
            compute_config_hash(file2.path()).unwrap()
        );
    }
}
