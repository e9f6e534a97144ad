//! Durable job queue with two interchangeable backends.
//!
//! The [`JobQueue`] trait is the seam between the HTTP surface and the
//! worker pool. [`FjallJobQueue`] is the production backend; [`DirQueue`]
//! keeps one JSON file per job for environments without an embedded
//! database.

mod dir;
mod fjall_queue;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::job::{JobResult, JobState, RenderJob};

pub use dir::DirQueue;
pub use fjall_queue::FjallJobQueue;

/// Default number of delivery attempts before a job is failed for good.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Everything the queue knows about one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub job: RenderJob,
    pub state: JobState,
    pub attempts: u32,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(job: RenderJob) -> Self {
        let now = Utc::now();
        Self {
            // v7 keys sort by creation time
            id: Uuid::now_v7(),
            job,
            state: JobState::Queued,
            attempts: 0,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, JobState::Completed | JobState::Failed)
    }
}

/// What happened to a job after [`JobQueue::fail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Put back in the queue for another attempt.
    Retried,
    /// Attempts exhausted, the job is failed permanently.
    Terminal,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Persist a job and make it visible to workers.
    async fn enqueue(&self, job: RenderJob) -> Result<Uuid>;

    /// Persist a group of jobs atomically. Either every job becomes
    /// visible or none do.
    async fn enqueue_many(&self, jobs: Vec<RenderJob>) -> Result<Vec<Uuid>>;

    /// Claim the oldest queued job, marking it active and counting the
    /// attempt. Returns `None` when the queue is empty.
    async fn dequeue(&self) -> Result<Option<JobRecord>>;

    /// Mark an active job completed and attach its result.
    async fn complete(&self, id: Uuid, result: JobResult) -> Result<()>;

    /// Record a failed attempt. Re-queues the job until its attempts are
    /// exhausted, then fails it permanently.
    async fn fail(&self, id: Uuid, error: &str) -> Result<FailureOutcome>;

    /// Look up a job record by id.
    async fn status(&self, id: Uuid) -> Result<Option<JobRecord>>;

    /// Drop terminal records older than `ttl`. Returns how many were
    /// removed.
    async fn prune_expired(&self, ttl: Duration) -> Result<usize>;
}
