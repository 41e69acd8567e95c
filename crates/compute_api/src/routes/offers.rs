use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::post;
use axum::{Json, Router};
use compute_protocol::{Offer, OfferState, OfferSubmission};
use compute_security::BearerPrincipal;
use serde::Deserialize;

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/offers", post(create_offer).get(list_offers))
}

async fn create_offer(
    State(state): State<Arc<AppState>>,
    principal: BearerPrincipal,
    Json(mut submission): Json<OfferSubmission>,
) -> (axum::http::StatusCode, Json<Offer>) {
    submission.provider_id = principal.as_provider();
    let offer = state.marketplace.create_offer(submission).await;
    (axum::http::StatusCode::ACCEPTED, Json(offer))
}

#[derive(Deserialize, Default)]
struct ListOffersQuery {
    state: Option<OfferState>,
}

async fn list_offers(State(state): State<Arc<AppState>>, Query(query): Query<ListOffersQuery>) -> Json<Vec<Offer>> {
    let filter = marketplace::OfferFilter {
        provider_id: None,
        state: query.state,
    };
    Json(state.marketplace.list_offers(&filter))
}
