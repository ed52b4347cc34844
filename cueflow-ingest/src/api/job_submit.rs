//! Job submission endpoint
//!
//! Feed gateways POST jobs here; they are queued and executed
//! asynchronously. Validation failures surface as `JobRejected` events,
//! not as HTTP errors.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::Serialize;
use tracing::info;

use crate::jobs::IngestJob;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct JobAccepted {
    pub status: String,
    pub job: String,
    pub rundown_external_id: String,
}

/// POST /ingest/job
pub async fn submit_job(
    State(state): State<AppState>,
    Json(job): Json<IngestJob>,
) -> Result<(StatusCode, Json<JobAccepted>), (StatusCode, String)> {
    let name = job.name().to_string();
    let rundown_external_id = job.rundown_external_id().to_string();
    info!(job = %name, rundown_external_id = %rundown_external_id, "job submitted");

    state
        .jobs
        .enqueue(job)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(JobAccepted {
            status: "queued".to_string(),
            job: name,
            rundown_external_id,
        }),
    ))
}

pub fn job_routes() -> Router<AppState> {
    Router::new().route("/ingest/job", post(submit_job))
}
