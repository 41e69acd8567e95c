use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::post;
use axum::{Json, Router};
use compute_protocol::{AgentId, ResourceId, ResourceVector};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/resources", post(register_resource).get(list_resources))
}

#[derive(Deserialize)]
struct RegisterResourceBody {
    agent_id: AgentId,
    capacity: ResourceVector,
    #[serde(default)]
    metadata: serde_json::Value,
}

#[derive(Serialize)]
struct RegisterResourceResponse {
    id: ResourceId,
}

async fn register_resource(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterResourceBody>,
) -> (axum::http::StatusCode, Json<RegisterResourceResponse>) {
    let id = state.ledger.register_resource(body.agent_id, body.capacity, body.metadata);
    (axum::http::StatusCode::ACCEPTED, Json(RegisterResourceResponse { id }))
}

#[derive(Deserialize, Default)]
struct ListResourcesQuery {
    agent_id: Option<AgentId>,
}

async fn list_resources(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListResourcesQuery>,
) -> Json<Vec<compute_protocol::Resource>> {
    let result = state.ledger.query(&resource_ledger::QueryFilter {
        agent_id: query.agent_id,
        ..Default::default()
    });
    Json(result.resources)
}
