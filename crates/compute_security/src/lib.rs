//! Bearer-token extraction and ed25519 signing helpers for the HTTP
//! boundary (§6). JWT issuance, credential formats and a keystore are out
//! of scope (§1 non-goals); this crate only recovers a caller identity from
//! a bearer token and signs/verifies request bodies once a keypair exists.

pub mod auth;
pub mod signing;

pub use auth::BearerPrincipal;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum SecurityError {
    #[error("missing Authorization header")]
    MissingToken,
    #[error("malformed bearer token")]
    MalformedToken,
    #[error("signature verification failed")]
    InvalidSignature,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for SecurityError {
    fn into_response(self) -> Response {
        let code = match self {
            SecurityError::MissingToken | SecurityError::MalformedToken => "UNAUTHORIZED",
            SecurityError::InvalidSignature => "UNAUTHORIZED",
        };
        let body = ErrorBody {
            code,
            message: self.to_string(),
        };
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}
