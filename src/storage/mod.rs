//! Artifact uploads on top of the object_store crate.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use object_store::aws::AmazonS3Builder;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, path::Path as StoragePath};
use thiserror::Error;
use uuid::Uuid;

use crate::config::StorageConfig;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Metadata returned after a successful upload.
#[derive(Debug, Clone)]
pub struct PublishedArtifact {
    pub key: String,
    pub url: String,
    pub size: usize,
}

/// Uploads rendered artifacts and hands back a retrieval URL.
///
/// When no storage credentials are configured the publisher runs in a
/// disabled state: [`publish`](ArtifactPublisher::publish) returns
/// `Ok(None)` and callers fall back to inlining the artifact bytes.
#[derive(Clone)]
pub struct ArtifactPublisher {
    store: Option<Arc<dyn ObjectStore>>,
    bucket: String,
    endpoint: Option<String>,
    public_domain: Option<String>,
}

impl ArtifactPublisher {
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let (Some(bucket), Some(access_key), Some(secret_key)) = (
            config.bucket.as_deref(),
            config.access_key.as_deref(),
            config.secret_key.as_deref(),
        ) else {
            tracing::warn!(
                "storage credentials not configured, artifact uploads disabled"
            );
            return Ok(Self {
                store: None,
                bucket: String::new(),
                endpoint: None,
                public_domain: None,
            });
        };

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key)
            .with_region(config.region.as_deref().unwrap_or("auto"));
        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }
        let store = builder.build()?;

        Ok(Self {
            store: Some(Arc::new(store)),
            bucket: bucket.to_string(),
            endpoint: config.endpoint.clone(),
            public_domain: config.public_domain.clone(),
        })
    }

    /// In-memory backend for tests.
    pub fn in_memory() -> Self {
        Self {
            store: Some(Arc::new(object_store::memory::InMemory::new())),
            bucket: "renderbox-test".to_string(),
            endpoint: None,
            public_domain: None,
        }
    }

    /// A publisher that never uploads.
    pub fn disabled() -> Self {
        Self {
            store: None,
            bucket: String::new(),
            endpoint: None,
            public_domain: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Upload one artifact. `Ok(None)` means uploads are disabled and the
    /// caller should degrade to an inline result.
    pub async fn publish(
        &self,
        job_id: Uuid,
        extension: &str,
        content_type: &mime::Mime,
        bytes: Bytes,
    ) -> Result<Option<PublishedArtifact>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };

        let key = format!("{job_id}-{}.{extension}", Utc::now().timestamp_millis());
        let path = StoragePath::from(key.as_str());
        let size = bytes.len();

        let mut attributes = Attributes::new();
        attributes.insert(
            Attribute::ContentType,
            content_type.to_string().into(),
        );

        store
            .put_opts(&path, bytes.into(), PutOptions::from(attributes))
            .await?;

        tracing::info!(key, size, "Artifact uploaded");

        Ok(Some(PublishedArtifact {
            url: self.url_for(&key),
            key,
            size,
        }))
    }

    /// Public URL for a stored key. Prefers the configured public domain,
    /// then the raw endpoint, then an opaque scheme for in-memory stores.
    fn url_for(&self, key: &str) -> String {
        if let Some(domain) = &self.public_domain {
            return format!("{}/{key}", domain.trim_end_matches('/'));
        }
        if let Some(endpoint) = &self.endpoint {
            return format!("{}/{}/{key}", endpoint.trim_end_matches('/'), self.bucket);
        }
        format!("memory://{}/{key}", self.bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_publish_returns_artifact() {
        let publisher = ArtifactPublisher::in_memory();
        assert!(publisher.is_enabled());
        let id = Uuid::now_v7();

        let published = publisher
            .publish(id, "pdf", &mime::APPLICATION_PDF, Bytes::from_static(b"%PDF-1.7"))
            .await
            .unwrap()
            .unwrap();

        assert!(published.key.starts_with(&id.to_string()));
        assert!(published.key.ends_with(".pdf"));
        assert_eq!(published.size, 8);
        assert!(published.url.starts_with("memory://renderbox-test/"));
    }

    #[tokio::test]
    async fn disabled_publisher_returns_none() {
        let publisher = ArtifactPublisher::disabled();
        assert!(!publisher.is_enabled());
        let published = publisher
            .publish(
                Uuid::now_v7(),
                "png",
                &mime::IMAGE_PNG,
                Bytes::from_static(b"\x89PNG"),
            )
            .await
            .unwrap();
        assert!(published.is_none());
    }

    #[test]
    fn public_domain_wins_over_endpoint() {
        let publisher = ArtifactPublisher {
            store: None,
            bucket: "artifacts".to_string(),
            endpoint: Some("https://storage.internal:9000".to_string()),
            public_domain: Some("https://cdn.example.com/".to_string()),
        };
        assert_eq!(
            publisher.url_for("a.pdf"),
            "https://cdn.example.com/a.pdf"
        );
    }
}
