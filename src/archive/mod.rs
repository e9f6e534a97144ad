//! Streaming ZIP assembly for finished batches.
//!
//! Artifacts are fetched one at a time and appended to the archive as
//! they arrive, so the full batch is never buffered in memory. A fetch
//! failure skips that entry rather than aborting the archive.

use async_trait::async_trait;
use async_zip::tokio::write::ZipFileWriter;
use async_zip::{Compression, ZipEntryBuilder};
use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncWrite;
use tracing::{debug, warn};

#[derive(Debug, Error)]
#[error("fetch failed: {0}")]
pub struct FetchError(pub String);

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Zip error: {0}")]
    Zip(#[from] async_zip::error::ZipError),
}

/// Retrieves artifact bytes by URL. Abstracted so the assembler can be
/// tested without a storage backend.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(FetchError(format!(
                "unexpected status {} for {url}",
                response.status()
            )));
        }
        response
            .bytes()
            .await
            .map_err(|e| FetchError(e.to_string()))
    }
}

/// Write one archive entry per fetchable URL into `writer`.
///
/// Returns the number of entries actually written. Unreachable artifacts
/// are logged and skipped; an error from the underlying writer aborts,
/// since the stream is broken anyway.
pub async fn write_archive<W>(
    writer: W,
    urls: &[String],
    fetcher: &dyn ArtifactFetcher,
) -> Result<usize, ArchiveError>
where
    W: AsyncWrite + Unpin,
{
    let mut zip = ZipFileWriter::with_tokio(writer);
    let mut added = 0usize;

    for (index, url) in urls.iter().enumerate() {
        let bytes = match fetcher.fetch(url).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(url, error = %err, "skipping unreachable artifact");
                continue;
            }
        };

        let name = format!("document-{}.{}", index + 1, extension_of(url));
        let entry = ZipEntryBuilder::new(name.into(), Compression::Deflate);
        zip.write_entry_whole(entry, &bytes).await?;
        added += 1;
    }

    if let Err(err) = zip.close().await {
        // entries already streamed out; nothing left to salvage
        warn!(error = %err, "failed to finalize archive");
    }

    debug!(requested = urls.len(), added, "Archive assembled");

    Ok(added)
}

fn extension_of(url: &str) -> &str {
    let name = url.rsplit('/').next().unwrap_or(url);
    match name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && ext.len() <= 4 && ext.chars().all(|c| c.is_ascii_alphanumeric()) => ext,
        _ => "pdf",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapFetcher {
        artifacts: HashMap<String, Bytes>,
    }

    #[async_trait]
    impl ArtifactFetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
            self.artifacts
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError(format!("no artifact at {url}")))
        }
    }

    fn fetcher(entries: &[(&str, &[u8])]) -> MapFetcher {
        MapFetcher {
            artifacts: entries
                .iter()
                .map(|(url, data)| (url.to_string(), Bytes::copy_from_slice(data)))
                .collect(),
        }
    }

    #[tokio::test]
    async fn archives_every_reachable_artifact() {
        let fetcher = fetcher(&[
            ("https://cdn/a.pdf", b"%PDF-a"),
            ("https://cdn/b.pdf", b"%PDF-b"),
        ]);
        let urls = vec![
            "https://cdn/a.pdf".to_string(),
            "https://cdn/b.pdf".to_string(),
        ];

        let mut buffer = Vec::new();
        let added = write_archive(&mut buffer, &urls, &fetcher).await.unwrap();

        assert_eq!(added, 2);
        // local file header magic
        assert_eq!(&buffer[..4], b"PK\x03\x04");
    }

    #[tokio::test]
    async fn unreachable_artifacts_are_skipped() {
        let fetcher = fetcher(&[("https://cdn/a.pdf", b"%PDF-a")]);
        let urls = vec![
            "https://cdn/a.pdf".to_string(),
            "https://cdn/missing.pdf".to_string(),
        ];

        let mut buffer = Vec::new();
        let added = write_archive(&mut buffer, &urls, &fetcher).await.unwrap();

        assert_eq!(added, 1);
        assert!(!buffer.is_empty());
    }

    #[tokio::test]
    async fn empty_url_list_yields_empty_archive() {
        let fetcher = fetcher(&[]);
        let mut buffer = Vec::new();
        let added = write_archive(&mut buffer, &[], &fetcher).await.unwrap();
        assert_eq!(added, 0);
        // still a valid zip: end-of-central-directory record only
        assert_eq!(&buffer[..4], b"PK\x05\x06");
    }

    #[test]
    fn extension_falls_back_to_pdf() {
        assert_eq!(extension_of("https://cdn/a.png"), "png");
        assert_eq!(extension_of("https://cdn/a.pdf"), "pdf");
        assert_eq!(extension_of("https://cdn/no-extension"), "pdf");
        assert_eq!(extension_of("https://cdn/weird.longext"), "pdf");
    }
}
