use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::warn;

use crate::queue::JobRecord;
use crate::render::{RenderExecutor, RenderedArtifact};
use crate::job::JobResult;
use crate::storage::{ArtifactPublisher, PublishedArtifact};
use crate::worker::{JobProcessor, ProcessError, ProcessedJob};

/// The production processor: render, then publish.
///
/// With no storage configured the artifact is inlined into the result as
/// base64 so the caller still gets their document. A failing configured
/// store is a real error and goes through the queue's retry path.
pub struct RenderPipeline {
    executor: Arc<RenderExecutor>,
    publisher: ArtifactPublisher,
}

impl RenderPipeline {
    pub fn new(executor: Arc<RenderExecutor>, publisher: ArtifactPublisher) -> Self {
        Self {
            executor,
            publisher,
        }
    }
}

#[async_trait]
impl JobProcessor for RenderPipeline {
    async fn process(&self, record: &JobRecord) -> Result<ProcessedJob, ProcessError> {
        let artifact = self.executor.render(&record.job).await?;

        let published = self
            .publisher
            .publish(
                record.id,
                artifact.extension,
                &artifact.content_type,
                artifact.bytes.clone(),
            )
            .await?;
        if published.is_none() {
            warn!(job_id = %record.id, "no artifact store configured, inlining result");
        }

        Ok(ProcessedJob {
            artifact_bytes: artifact.bytes.len() as u64,
            result: build_result(published, &artifact),
        })
    }
}

fn build_result(published: Option<PublishedArtifact>, artifact: &RenderedArtifact) -> JobResult {
    let duration_ms = artifact.duration.as_millis() as u64;
    match published {
        Some(published) => JobResult {
            url: Some(published.url),
            inline: None,
            content_type: artifact.content_type.to_string(),
            duration_ms,
        },
        None => JobResult {
            url: None,
            inline: Some(BASE64.encode(&artifact.bytes)),
            content_type: artifact.content_type.to_string(),
            duration_ms,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    fn pdf_artifact() -> RenderedArtifact {
        RenderedArtifact {
            bytes: Bytes::from_static(b"%PDF-1.7 test"),
            content_type: mime::APPLICATION_PDF,
            extension: "pdf",
            duration: Duration::from_millis(250),
        }
    }

    #[test]
    fn published_artifact_yields_url() {
        let published = PublishedArtifact {
            key: "abc.pdf".to_string(),
            url: "https://cdn.example.com/abc.pdf".to_string(),
            size: 13,
        };
        let result = build_result(Some(published), &pdf_artifact());
        assert_eq!(result.url.as_deref(), Some("https://cdn.example.com/abc.pdf"));
        assert!(result.inline.is_none());
        assert_eq!(result.content_type, "application/pdf");
        assert_eq!(result.duration_ms, 250);
    }

    #[test]
    fn missing_upload_inlines_base64() {
        let artifact = pdf_artifact();
        let result = build_result(None, &artifact);
        assert!(result.url.is_none());
        let inline = result.inline.unwrap();
        assert_eq!(BASE64.decode(inline).unwrap(), artifact.bytes.to_vec());
    }
}
