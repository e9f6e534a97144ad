//! Render job model and submission-time validation.
//!
//! A [`RenderRequest`] is the caller-facing payload accepted by the API.
//! Validation happens here, before anything is enqueued: a request carrying
//! both `html` and `url` (or neither) is rejected and never reaches the
//! queue. A validated request becomes a [`RenderJob`], which is immutable
//! once created; only the queue record around it changes state.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobValidationError {
    #[error("exactly one of 'html' or 'url' is required")]
    MissingSource,

    #[error("'html' and 'url' are mutually exclusive")]
    ConflictingSource,

    #[error("'data' must be a JSON object")]
    InvalidData,

    #[error("'scale' must be between 0.1 and 4.0")]
    InvalidScale,
}

/// Output artifact kind. Unrecognized kinds are rejected at deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Pdf,
    Screenshot,
}

impl OutputKind {
    pub fn content_type(&self) -> mime::Mime {
        match self {
            OutputKind::Pdf => mime::APPLICATION_PDF,
            OutputKind::Screenshot => mime::IMAGE_PNG,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputKind::Pdf => "pdf",
            OutputKind::Screenshot => "png",
        }
    }
}

/// Paper sizes understood by the PDF serializer, in inches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PaperFormat {
    A3,
    #[default]
    A4,
    A5,
    Letter,
    Legal,
    Tabloid,
}

impl PaperFormat {
    /// Portrait (width, height) in inches.
    pub fn dimensions(&self) -> (f64, f64) {
        match self {
            PaperFormat::A3 => (11.69, 16.54),
            PaperFormat::A4 => (8.27, 11.69),
            PaperFormat::A5 => (5.83, 8.27),
            PaperFormat::Letter => (8.5, 11.0),
            PaperFormat::Legal => (8.5, 14.0),
            PaperFormat::Tabloid => (11.0, 17.0),
        }
    }
}

/// How long to wait after the load phase before serializing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WaitStrategy {
    /// Navigation finished (load event).
    Load,
    /// Navigation finished plus a short network settle window.
    #[default]
    #[serde(rename = "networkidle")]
    NetworkIdle,
}

/// Closed set of recognized render options with explicit defaults.
///
/// Unknown keys are rejected rather than silently dropped, so a typo like
/// `"landscpe"` fails the submission instead of producing a portrait PDF.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RenderOptions {
    #[serde(default)]
    pub format: PaperFormat,
    #[serde(default)]
    pub landscape: bool,
    /// Uniform page margin in inches. Defaults to [`DEFAULT_MARGIN_INCHES`].
    #[serde(default)]
    pub margin: Option<f64>,
    #[serde(default)]
    pub wait_for: WaitStrategy,
    /// Device scale multiplier for screenshots.
    #[serde(default)]
    pub scale: Option<f64>,
}

/// 20 CSS pixels at 96 dpi, matching the service's historical default.
pub const DEFAULT_MARGIN_INCHES: f64 = 0.21;

/// Caller-facing submission payload (`POST /render`, items of `POST /bulk`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    pub output_kind: OutputKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Template data merged into `html` before rendering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<RenderOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
}

/// What the job renders: raw markup or a live URL. Exactly one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobSource {
    Html(String),
    Url(String),
}

/// A validated render job. Immutable once created; queue-managed state and
/// the attached result live on the queue's record, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderJob {
    pub output: OutputKind,
    pub source: JobSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default)]
    pub options: RenderOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
}

impl RenderRequest {
    /// Validate the payload and convert it into an enqueueable job.
    pub fn into_job(self) -> Result<RenderJob, JobValidationError> {
        let source = match (self.html, self.url) {
            (Some(html), None) => JobSource::Html(html),
            (None, Some(url)) => JobSource::Url(url),
            (Some(_), Some(_)) => return Err(JobValidationError::ConflictingSource),
            (None, None) => return Err(JobValidationError::MissingSource),
        };

        if let Some(data) = &self.data {
            if !data.is_object() {
                return Err(JobValidationError::InvalidData);
            }
        }

        let options = self.options.unwrap_or_default();
        if let Some(scale) = options.scale {
            if !(0.1..=4.0).contains(&scale) {
                return Err(JobValidationError::InvalidScale);
            }
        }

        Ok(RenderJob {
            output: self.output_kind,
            source,
            data: self.data,
            options,
            caller_id: self.caller_id,
            batch_id: self.batch_id,
        })
    }
}

/// Outcome of one completed job, attached to its queue record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    /// Durable artifact URL when publishing was configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Base64-encoded artifact when publishing was not configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<String>,
    pub content_type: String,
    pub duration_ms: u64,
}

/// Queue-visible lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Active,
    Completed,
    Failed,
}
