use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use compute_protocol::{DomainError, Match, MatchId, MatchParty};
use compute_security::BearerPrincipal;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/matches/:id", get(get_match))
        .route("/matches/:id/confirm", post(confirm_match))
}

async fn get_match(State(state): State<Arc<AppState>>, Path(id): Path<MatchId>) -> Result<Json<Match>, ApiError> {
    state
        .marketplace
        .get_match(id)
        .map(Json)
        .ok_or_else(|| DomainError::not_found(format!("match {id} not found")).into())
}

/// §6 authorizes by owner identity rather than a request field: the party
/// confirming is whichever side of the match the bearer token belongs to.
async fn confirm_match(
    State(state): State<Arc<AppState>>,
    principal: BearerPrincipal,
    Path(id): Path<MatchId>,
) -> Result<Json<Match>, ApiError> {
    let existing = state
        .marketplace
        .get_match(id)
        .ok_or_else(|| ApiError::from(DomainError::not_found(format!("match {id} not found"))))?;

    let party = if principal.as_consumer() == existing.consumer_id {
        MatchParty::Consumer
    } else if principal.as_provider() == existing.provider_id {
        MatchParty::Provider
    } else {
        return Err(DomainError::forbidden("caller is not a party to this match").into());
    };

    let updated = state.marketplace.confirm_match(id, party).await?;
    Ok(Json(updated))
}
