use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, PrintToPdfParams};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams,
};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, Page};
use tracing::{debug, warn};

use crate::browser::{BrowserError, BrowserPool};
use crate::job::{JobSource, OutputKind, RenderJob, RenderOptions, WaitStrategy};
use crate::template;

/// Grace period after navigation for straggling network activity.
const NETWORK_SETTLE: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("browser pool: {0}")]
    Browser(#[from] BrowserError),
    #[error("page error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("page did not finish loading within {0:?}")]
    Timeout(Duration),
    #[error("target setup: {0}")]
    Target(String),
}

/// A finished render, ready for the publisher.
#[derive(Debug, Clone)]
pub struct RenderedArtifact {
    pub bytes: Bytes,
    pub content_type: mime::Mime,
    pub extension: &'static str,
    pub duration: Duration,
}

/// Drives a shared browser through the load/render cycle for one job.
///
/// Every job gets its own incognito browser context so cookies and cache
/// never leak between callers. The context and its page are torn down on
/// both the success and failure paths.
pub struct RenderExecutor {
    pool: Arc<BrowserPool>,
    wait_timeout: Duration,
}

impl RenderExecutor {
    pub fn new(pool: Arc<BrowserPool>, wait_timeout: Duration) -> Self {
        Self { pool, wait_timeout }
    }

    pub async fn render(&self, job: &RenderJob) -> Result<RenderedArtifact, RenderError> {
        let started = Instant::now();
        let browser = self.pool.acquire().await?;

        let context_id = browser
            .create_browser_context(CreateBrowserContextParams::default())
            .await?;

        let outcome = self.render_in_context(&browser, &context_id, job).await;

        if let Err(err) = browser.dispose_browser_context(context_id).await {
            warn!(error = %err, "failed to dispose browser context");
        }

        let (bytes, content_type, extension) = outcome?;
        let duration = started.elapsed();
        debug!(
            output = ?job.output,
            bytes = bytes.len(),
            elapsed_ms = duration.as_millis() as u64,
            "render finished"
        );

        Ok(RenderedArtifact {
            bytes,
            content_type,
            extension,
            duration,
        })
    }

    async fn render_in_context(
        &self,
        browser: &Browser,
        context_id: &chromiumoxide::cdp::browser_protocol::browser::BrowserContextId,
        job: &RenderJob,
    ) -> Result<(Bytes, mime::Mime, &'static str), RenderError> {
        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(RenderError::Target)?;
        let page = browser.new_page(target).await?;

        let outcome = self.drive(&page, job).await;

        if let Err(err) = page.close().await {
            warn!(error = %err, "failed to close page");
        }

        outcome
    }

    async fn drive(
        &self,
        page: &Page,
        job: &RenderJob,
    ) -> Result<(Bytes, mime::Mime, &'static str), RenderError> {
        tokio::time::timeout(self.wait_timeout, self.load(page, job))
            .await
            .map_err(|_| RenderError::Timeout(self.wait_timeout))??;

        let bytes = match job.output {
            OutputKind::Pdf => {
                let params = print_params(&job.options);
                Bytes::from(page.pdf(params).await?)
            }
            OutputKind::Screenshot => {
                if let Some(scale) = job.options.scale {
                    let metrics = SetDeviceMetricsOverrideParams::builder()
                        .width(0)
                        .height(0)
                        .device_scale_factor(scale)
                        .mobile(false)
                        .build()
                        .map_err(RenderError::Target)?;
                    page.execute(metrics).await?;
                }
                let shot = ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(true)
                    .build();
                Bytes::from(page.screenshot(shot).await?)
            }
        };

        Ok((bytes, job.output.content_type(), job.output.extension()))
    }

    async fn load(&self, page: &Page, job: &RenderJob) -> Result<(), RenderError> {
        match &job.source {
            JobSource::Url(url) => {
                page.goto(url.as_str()).await?;
                page.wait_for_navigation().await?;
            }
            JobSource::Html(markup) => {
                let content = template::merge(markup, job.data.as_ref());
                page.set_content(content).await?;
            }
        }
        if matches!(job.options.wait_for, WaitStrategy::NetworkIdle) {
            tokio::time::sleep(NETWORK_SETTLE).await;
        }
        Ok(())
    }
}

/// Maps user-facing options onto the Chrome print command.
///
/// Paper dimensions are always passed in portrait orientation; Chrome
/// swaps them itself when `landscape` is set.
fn print_params(options: &RenderOptions) -> PrintToPdfParams {
    let (width, height) = options.format.dimensions();
    let margin = options.margin.unwrap_or(crate::job::DEFAULT_MARGIN_INCHES);
    PrintToPdfParams {
        landscape: Some(options.landscape),
        print_background: Some(true),
        paper_width: Some(width),
        paper_height: Some(height),
        margin_top: Some(margin),
        margin_bottom: Some(margin),
        margin_left: Some(margin),
        margin_right: Some(margin),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::PaperFormat;

    #[test]
    fn print_params_default_margin() {
        let options = RenderOptions::default();
        let params = print_params(&options);
        assert_eq!(params.margin_top, Some(crate::job::DEFAULT_MARGIN_INCHES));
        assert_eq!(params.margin_left, Some(crate::job::DEFAULT_MARGIN_INCHES));
        assert_eq!(params.landscape, Some(false));
        assert_eq!(params.print_background, Some(true));
    }

    #[test]
    fn print_params_a4_dimensions() {
        let options = RenderOptions::default();
        let params = print_params(&options);
        assert_eq!(params.paper_width, Some(8.27));
        assert_eq!(params.paper_height, Some(11.69));
    }

    #[test]
    fn print_params_custom_margin_and_landscape() {
        let options = RenderOptions {
            format: PaperFormat::Letter,
            landscape: true,
            margin: Some(1.0),
            ..Default::default()
        };
        let params = print_params(&options);
        assert_eq!(params.landscape, Some(true));
        assert_eq!(params.margin_bottom, Some(1.0));
        // portrait dimensions regardless of orientation
        assert_eq!(params.paper_width, Some(8.5));
        assert_eq!(params.paper_height, Some(11.0));
    }
}
