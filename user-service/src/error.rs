use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::ledger::LedgerError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Ledger(LedgerError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Ledger(err) => {
                let status = match &err {
                    LedgerError::NonPositiveAmount
                    | LedgerError::SubCentAmount
                    | LedgerError::NegativeInitialBalance => {
                        StatusCode::BAD_REQUEST
                    }
                    LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
                    LedgerError::InsufficientFunds { .. } | LedgerError::AlreadyExists(_) => {
                        StatusCode::CONFLICT
                    }
                    LedgerError::Store(e) => {
                        tracing::error!(error = %e, "internal server error");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, err.to_string())
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}
