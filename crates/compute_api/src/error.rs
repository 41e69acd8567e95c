use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use compute_protocol::{DomainError, ErrorKind};
use serde::Serialize;

/// Newtype so this crate can implement `IntoResponse` for a foreign type
/// (§7's kind-to-status mapping lives here, once, for every route).
pub struct ApiError(pub DomainError);

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self(err)
    }
}

impl From<scheduler::SchedulerError> for ApiError {
    fn from(err: scheduler::SchedulerError) -> Self {
        Self(err.into())
    }
}

impl From<marketplace::MarketplaceError> for ApiError {
    fn from(err: marketplace::MarketplaceError) -> Self {
        Self(err.into())
    }
}

impl From<resource_ledger::LedgerError> for ApiError {
    fn from(err: resource_ledger::LedgerError) -> Self {
        Self(err.into())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: ErrorKind,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            code: self.0.kind,
            message: self.0.message,
        };
        (status, Json(body)).into_response()
    }
}
