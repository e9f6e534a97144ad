//! Layered configuration: struct defaults, then a TOML file, then
//! environment variables.
//!
//! Environment overrides use the pattern `RENDERBOX__<section>__<key>`,
//! for example `RENDERBOX__SERVER__BIND_ADDR=0.0.0.0:9000`. The TOML
//! file defaults to `config/renderbox.toml` and can be pointed elsewhere
//! with `RENDERBOX_CONFIG`. Storage credentials are read only from the
//! environment (`S3_ACCESS_KEY`/`S3_SECRET_KEY`, or the AWS names).

mod models;
mod sources;
mod validation;

pub use models::{
    BrowserConfig, Config, QueueBackend, QueueConfig, RetentionConfig, ServerConfig,
    StorageConfig, WorkerConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment).
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path. Useful for tests.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
