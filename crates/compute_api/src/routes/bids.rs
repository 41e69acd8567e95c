use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use compute_protocol::{Bid, BidSubmission};
use compute_security::BearerPrincipal;

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/bids", post(create_bid))
}

async fn create_bid(
    State(state): State<Arc<AppState>>,
    principal: BearerPrincipal,
    Json(mut submission): Json<BidSubmission>,
) -> (axum::http::StatusCode, Json<Bid>) {
    submission.consumer_id = principal.as_consumer();
    let bid = state.marketplace.create_bid(submission).await;
    (axum::http::StatusCode::ACCEPTED, Json(bid))
}
