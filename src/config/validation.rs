use super::models::Config;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("worker.concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("worker.rate_limit must be at least 1")]
    ZeroRateLimit,

    #[error("worker.wait_timeout_secs must be positive")]
    ZeroWaitTimeout,

    #[error("queue.max_attempts must be at least 1")]
    ZeroMaxAttempts,

    #[error("retention.job_ttl_days must be positive")]
    ZeroRetention,

    #[error("storage.bucket is set but credentials are missing from the environment")]
    MissingStorageCredentials,

    #[error("max_payload_bytes ({actual}) exceeds the 50MB ceiling")]
    PayloadCeilingExceeded { actual: u64 },
}

const PAYLOAD_CEILING: u64 = 50 * 1024 * 1024;

pub fn validate(config: &Config) -> Result<(), ValidationError> {
    if config.worker.concurrency == 0 {
        return Err(ValidationError::ZeroConcurrency);
    }
    if config.worker.rate_limit == 0 {
        return Err(ValidationError::ZeroRateLimit);
    }
    if config.worker.wait_timeout_secs == 0 {
        return Err(ValidationError::ZeroWaitTimeout);
    }
    if config.queue.max_attempts == 0 {
        return Err(ValidationError::ZeroMaxAttempts);
    }
    if config.retention.job_ttl_days == 0 {
        return Err(ValidationError::ZeroRetention);
    }
    if config.server.max_payload_bytes > PAYLOAD_CEILING {
        return Err(ValidationError::PayloadCeilingExceeded {
            actual: config.server.max_payload_bytes,
        });
    }
    // a bucket without credentials would silently disable uploads
    if config.storage.bucket.is_some()
        && (config.storage.access_key.is_none() || config.storage.secret_key.is_none())
    {
        return Err(ValidationError::MissingStorageCredentials);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn zero_concurrency_rejected() {
        let mut config = Config::default();
        config.worker.concurrency = 0;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::ZeroConcurrency)
        ));
    }

    #[test]
    fn bucket_without_credentials_rejected() {
        let mut config = Config::default();
        config.storage.bucket = Some("artifacts".to_string());
        assert!(matches!(
            validate(&config),
            Err(ValidationError::MissingStorageCredentials)
        ));
    }

    #[test]
    fn bucket_with_credentials_accepted() {
        let mut config = Config::default();
        config.storage.bucket = Some("artifacts".to_string());
        config.storage.access_key = Some("ak".to_string());
        config.storage.secret_key = Some("sk".to_string());
        assert!(validate(&config).is_ok());
    }
}
