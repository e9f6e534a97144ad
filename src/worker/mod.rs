//! Worker pool that drains the job queue.

mod pipeline;
mod pool;
mod rate;

use async_trait::async_trait;
use thiserror::Error;

use crate::job::JobResult;
use crate::queue::JobRecord;
use crate::render::RenderError;
use crate::storage::StorageError;

pub use pipeline::RenderPipeline;
pub use pool::{WorkerPool, WorkerSettings};
pub use rate::RateLimiter;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    #[error("publish failed: {0}")]
    Publish(#[from] StorageError),

    #[error("{0}")]
    Other(String),
}

/// Result of one processed job, with enough detail for the usage ledger.
#[derive(Debug, Clone)]
pub struct ProcessedJob {
    pub result: JobResult,
    pub artifact_bytes: u64,
}

/// Seam between the pool and the render machinery, so the pool can be
/// exercised without a browser.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, record: &JobRecord) -> Result<ProcessedJob, ProcessError>;
}
