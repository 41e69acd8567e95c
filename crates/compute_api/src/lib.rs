//! axum REST surface over the scheduler, marketplace and resource ledger
//! (§6): bearer-token auth, the `{code, message}` error body, and the
//! minimum `/jobs`, `/offers`, `/bids`, `/matches`, `/resources`,
//! `/allocations` surface.
//!
//! Router assembly (state struct + CORS + trace layering) is grounded on
//! the teacher's `fourthplaces-mntogether` `server::app::build_app` shape
//! — the teacher repo itself has no HTTP layer to generalize from.

pub mod error;
mod routes;
pub mod state;

use std::sync::Arc;

use axum::http::Method;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .merge(routes::jobs::router())
        .merge(routes::offers::router())
        .merge(routes::bids::router())
        .merge(routes::matches::router())
        .merge(routes::resources::router())
        .merge(routes::allocations::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

async fn health() -> &'static str {
    "ok"
}
