use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use compute_protocol::{AllocationId, JobId, ResourceId, ResourceVector};
use compute_security::BearerPrincipal;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/allocations", post(create_allocation))
        .route("/allocations/:id/release", post(release_allocation))
}

#[derive(Deserialize)]
struct CreateAllocationBody {
    resource_id: ResourceId,
    #[serde(default)]
    job_id: Option<JobId>,
    amount: ResourceVector,
    #[serde(default)]
    lease_seconds: Option<u64>,
}

#[derive(Serialize)]
struct CreateAllocationResponse {
    id: AllocationId,
}

async fn create_allocation(
    State(state): State<Arc<AppState>>,
    principal: BearerPrincipal,
    Json(body): Json<CreateAllocationBody>,
) -> Result<(axum::http::StatusCode, Json<CreateAllocationResponse>), ApiError> {
    let id = state.ledger.allocate(
        body.resource_id,
        principal.as_consumer(),
        body.job_id,
        body.amount,
        body.lease_seconds,
    )?;
    Ok((axum::http::StatusCode::ACCEPTED, Json(CreateAllocationResponse { id })))
}

async fn release_allocation(State(state): State<Arc<AppState>>, Path(id): Path<AllocationId>) -> axum::http::StatusCode {
    state.ledger.release(id);
    axum::http::StatusCode::OK
}
