use axum::{Router, routing::get, routing::post};
use tower_http::decompression::RequestDecompressionLayer;

use super::services::{
    download_batch_zip, get_batch, get_job, health, submit_bulk, submit_render,
};
use super::state::AppState;

/// Assemble the HTTP surface over a fully wired state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/render", post(submit_render))
        .route("/bulk", post(submit_bulk))
        .route("/jobs/{job_id}", get(get_job))
        .route("/batches/{batch_id}", get(get_batch))
        .route("/batches/{batch_id}/zip", get(download_batch_zip))
        .route("/health", get(health))
        .with_state(state)
        // Transparently decompress gzip request bodies
        .layer(RequestDecompressionLayer::new())
}
