use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "RENDERBOX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/renderbox.toml";
const ENV_PREFIX: &str = "RENDERBOX";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = load_from_sources(config_path)?;
    load_secrets(&mut config);

    Ok(config)
}

/// Storage credentials live in the environment only, never in TOML.
fn load_secrets(config: &mut Config) {
    if let Ok(access_key) = env::var("S3_ACCESS_KEY") {
        config.storage.access_key = Some(access_key);
    }
    if let Ok(secret_key) = env::var("S3_SECRET_KEY") {
        config.storage.secret_key = Some(secret_key);
    }

    // AWS-style names as a fallback
    if config.storage.access_key.is_none() {
        if let Ok(access_key) = env::var("AWS_ACCESS_KEY_ID") {
            config.storage.access_key = Some(access_key);
        }
    }
    if config.storage.secret_key.is_none() {
        if let Ok(secret_key) = env::var("AWS_SECRET_ACCESS_KEY") {
            config.storage.secret_key = Some(secret_key);
        }
    }
}

/// Load configuration from a specific path and the environment.
/// Useful for testing with custom config files.
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // RENDERBOX__SERVER__BIND_ADDR -> server.bind_addr
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::QueueBackend;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn defaults_without_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.queue.backend, QueueBackend::Fjall);
        assert_eq!(config.worker.concurrency, 5);
        assert_eq!(config.worker.rate_limit, 10);
    }

    #[test]
    fn toml_overrides_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "127.0.0.1:9000"

[queue]
backend = "dir"
dir_path = "/tmp/render-jobs"
max_attempts = 5

[worker]
concurrency = 2
rate_limit = 4
wait_timeout_secs = 10

[storage]
bucket = "render-artifacts"
endpoint = "https://storage.example.com"
public_domain = "https://cdn.example.com"

[retention]
job_ttl_days = 3
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.queue.backend, QueueBackend::Dir);
        assert_eq!(config.queue.max_attempts, 5);
        assert_eq!(config.worker.concurrency, 2);
        assert_eq!(
            config.worker.wait_timeout(),
            std::time::Duration::from_secs(10)
        );
        assert_eq!(config.storage.bucket.as_deref(), Some("render-artifacts"));
        assert_eq!(
            config.storage.public_domain.as_deref(),
            Some("https://cdn.example.com")
        );
        assert_eq!(config.retention.job_ttl_days, 3);
    }

    // Note: environment override tests omitted due to unsafe env::set_var usage
}
