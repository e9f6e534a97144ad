//! Wire models for the render API.
//!
//! Submission payloads live in [`crate::job`] ([`crate::job::RenderRequest`]);
//! this module holds the response side of the contract. All fields use
//! camelCase on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::batch::BatchProgress;
use crate::job::{JobResult, JobState};
use crate::queue::JobRecord;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JobQueuedResponse {
    pub job_id: Uuid,
    pub state: JobState,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BulkAcceptedResponse {
    pub batch_id: String,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    #[serde(rename = "id")]
    pub job_id: Uuid,
    pub state: JobState,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<JobRecord> for JobStatusResponse {
    fn from(record: JobRecord) -> Self {
        Self {
            job_id: record.id,
            state: record.state,
            attempts: record.attempts,
            result: record.result,
            error: record.error,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Processing,
    Completed,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatusResponse {
    pub batch_id: String,
    pub total: u64,
    pub completed: u64,
    pub percentage: u64,
    pub status: BatchStatus,
    pub urls: Vec<String>,
}

impl BatchStatusResponse {
    pub fn from_progress(batch_id: String, progress: &BatchProgress) -> Self {
        Self {
            batch_id,
            total: progress.total,
            completed: progress.completed,
            percentage: progress.percentage(),
            status: if progress.is_complete() {
                BatchStatus::Completed
            } else {
                BatchStatus::Processing
            },
            urls: progress.urls.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
}
