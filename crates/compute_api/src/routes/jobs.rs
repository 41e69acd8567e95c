use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use compute_protocol::{Job, JobId, JobState};
use compute_security::BearerPrincipal;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/cancel", post(cancel_job))
}

#[derive(Deserialize)]
struct SubmitJobBody {
    kind: compute_protocol::JobKind,
    #[serde(default)]
    payload: serde_json::Value,
    requirements: compute_protocol::Requirements,
    #[serde(default)]
    priority: u8,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    max_retries: Option<u32>,
}

async fn submit_job(
    State(state): State<Arc<AppState>>,
    principal: BearerPrincipal,
    Json(body): Json<SubmitJobBody>,
) -> Result<(axum::http::StatusCode, Json<Job>), ApiError> {
    let submission = compute_protocol::JobSubmission {
        submitter: principal.as_consumer(),
        kind: body.kind,
        payload: body.payload,
        requirements: body.requirements,
        priority: body.priority,
        timeout_secs: body.timeout_secs,
        max_retries: body.max_retries,
    };
    let job = state.scheduler.submit(submission).await?;
    Ok((axum::http::StatusCode::ACCEPTED, Json(job)))
}

#[derive(Deserialize, Default)]
struct ListJobsQuery {
    state: Option<JobState>,
    submitter: Option<String>,
}

async fn list_jobs(State(state): State<Arc<AppState>>, Query(query): Query<ListJobsQuery>) -> Json<Vec<Job>> {
    let submitter = query
        .submitter
        .as_deref()
        .and_then(|s| s.parse::<compute_protocol::ConsumerId>().ok());
    let filter = job_journal::JobFilter {
        state: query.state,
        submitter,
        ..Default::default()
    };
    Json(state.scheduler.list(&filter))
}

async fn get_job(State(state): State<Arc<AppState>>, Path(id): Path<JobId>) -> Result<Json<Job>, ApiError> {
    state
        .scheduler
        .get(id)
        .map(Json)
        .ok_or_else(|| compute_protocol::DomainError::not_found(format!("job {id} not found")).into())
}

async fn cancel_job(
    State(state): State<Arc<AppState>>,
    principal: BearerPrincipal,
    Path(id): Path<JobId>,
) -> Result<Json<Job>, ApiError> {
    let cancelled = state.scheduler.cancel(id, principal.as_consumer()).await?;
    cancelled
        .map(Json)
        .ok_or_else(|| compute_protocol::DomainError::not_found(format!("job {id} not found")).into())
}
