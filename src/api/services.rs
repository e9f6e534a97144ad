use axum::{Json, extract::State, http::HeaderMap, response::IntoResponse};
use http_body_util::BodyExt;
use tokio_util::io::ReaderStream;
use tracing::{error, info};
use uuid::Uuid;

use super::{
    models::{
        BatchStatusResponse, BulkAcceptedResponse, HealthResponse, JobQueuedResponse,
        JobStatusResponse,
    },
    state::AppState,
};
use crate::api::error::ApiError;
use crate::archive::write_archive;
use crate::job::{JobState, RenderJob, RenderRequest};

/// Single render submission (POST /render).
///
/// Validates the payload, persists the job, and returns 202 immediately;
/// the caller polls GET /jobs/{id} for the outcome.
pub async fn submit_render(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let body_bytes = read_json_body(&state, &headers, body).await?;

    let request: RenderRequest = serde_json::from_slice(&body_bytes)?;
    let job = request.into_job()?;

    let job_id = state
        .queue
        .enqueue(job)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to enqueue job: {}", e)))?;

    state.metrics.job_accepted();
    info!(%job_id, "Render job accepted");

    Ok((
        axum::http::StatusCode::ACCEPTED,
        Json(JobQueuedResponse {
            job_id,
            state: JobState::Queued,
        }),
    ))
}

/// Bulk render submission (POST /bulk).
///
/// The whole array is validated before anything is enqueued, and the
/// batch counter is registered before the jobs become visible, so no
/// completion can race a missing counter. Either every job is accepted
/// or the request fails with no work queued.
pub async fn submit_bulk(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let body_bytes = read_json_body(&state, &headers, body).await?;

    let requests: Vec<RenderRequest> = serde_json::from_slice(&body_bytes)?;
    if requests.is_empty() {
        return Err(ApiError::InvalidPayload(
            "bulk submission requires at least one item".to_string(),
        ));
    }

    let batch_id = format!("batch_{}", Uuid::new_v4().simple());

    let mut jobs = Vec::with_capacity(requests.len());
    for (index, request) in requests.into_iter().enumerate() {
        let mut job: RenderJob = request
            .into_job()
            .map_err(|e| ApiError::InvalidPayload(format!("item {index}: {e}")))?;
        job.batch_id = Some(batch_id.clone());
        jobs.push(job);
    }
    let count = jobs.len();

    state
        .batches
        .init_batch(&batch_id, count as u64)
        .map_err(|e| ApiError::Internal(format!("Failed to register batch: {}", e)))?;

    state
        .queue
        .enqueue_many(jobs)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to enqueue batch: {}", e)))?;

    state.metrics.batch_accepted();
    for _ in 0..count {
        state.metrics.job_accepted();
    }
    info!(batch_id, count, "Bulk batch accepted");

    Ok((
        axum::http::StatusCode::ACCEPTED,
        Json(BulkAcceptedResponse { batch_id, count }),
    ))
}

/// Job status poll (GET /jobs/{job_id}).
pub async fn get_job(
    State(state): State<AppState>,
    axum::extract::Path(job_id): axum::extract::Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id: Uuid = job_id
        .parse()
        .map_err(|_| ApiError::InvalidPayload(format!("invalid job id: {job_id}")))?;

    let record = state
        .queue
        .status(job_id)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to get job: {}", e)))?
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id}")))?;

    Ok((
        axum::http::StatusCode::OK,
        Json(JobStatusResponse::from(record)),
    ))
}

/// Batch progress poll (GET /batches/{batch_id}).
pub async fn get_batch(
    State(state): State<AppState>,
    axum::extract::Path(batch_id): axum::extract::Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let progress = state
        .batches
        .progress(&batch_id)
        .map_err(|e| ApiError::Internal(format!("Failed to get batch: {}", e)))?
        .ok_or_else(|| ApiError::NotFound(format!("batch {batch_id}")))?;

    Ok((
        axum::http::StatusCode::OK,
        Json(BatchStatusResponse::from_progress(batch_id, &progress)),
    ))
}

/// Bulk archive download (GET /batches/{batch_id}/zip).
///
/// Refused until every batch item is terminal; after that the archive is
/// streamed as it is assembled, never buffered whole.
pub async fn download_batch_zip(
    State(state): State<AppState>,
    axum::extract::Path(batch_id): axum::extract::Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let progress = state
        .batches
        .progress(&batch_id)
        .map_err(|e| ApiError::Internal(format!("Failed to get batch: {}", e)))?
        .ok_or_else(|| ApiError::NotFound(format!("batch {batch_id}")))?;

    if !progress.is_complete() {
        return Err(ApiError::BatchNotReady(format!(
            "{} of {} items finished",
            progress.completed, progress.total
        )));
    }

    let (writer, reader) = tokio::io::duplex(64 * 1024);
    let fetcher = std::sync::Arc::clone(&state.fetcher);
    let urls = progress.urls;
    let task_batch_id = batch_id.clone();
    tokio::spawn(async move {
        if let Err(err) = write_archive(writer, &urls, fetcher.as_ref()).await {
            // the response stream just ends short; the client sees a truncated body
            error!(batch_id = %task_batch_id, error = %err, "archive stream failed");
        }
    });

    let body = axum::body::Body::from_stream(ReaderStream::new(reader));
    let disposition = format!("attachment; filename=\"batch-{batch_id}.zip\"");

    Ok((
        axum::http::StatusCode::OK,
        [
            (axum::http::header::CONTENT_TYPE, "application/zip".to_string()),
            (axum::http::header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}

/// Health check (GET /health).
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    use std::collections::HashMap;

    let mut components = HashMap::new();
    components.insert("api".to_string(), "healthy".to_string());
    components.insert("queue".to_string(), "healthy".to_string());
    components.insert(
        "browser".to_string(),
        if state.browser.is_warm().await {
            "warm".to_string()
        } else {
            "cold".to_string()
        },
    );

    let response = HealthResponse {
        status: "healthy".to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (axum::http::StatusCode::OK, Json(response))
}

/// Reads the request body, enforcing Content-Type and the configured
/// size ceiling. Decompression is handled upstream by the
/// RequestDecompressionLayer middleware.
async fn read_json_body(
    state: &AppState,
    headers: &HeaderMap,
    body: axum::body::Body,
) -> Result<Vec<u8>, ApiError> {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidPayload("missing Content-Type header".into()))?;
    super::utils::parse_content_type(content_type)?;

    let data = body
        .collect()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .to_bytes()
        .to_vec();

    super::utils::validate_body_size(&data, state.config.server.max_payload_bytes as usize)?;

    Ok(data)
}
