use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::service::OrderError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Order(OrderError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Order(err) => {
                let status = match &err {
                    OrderError::NonPositiveAmount | OrderError::SubCentAmount | OrderError::MissingEmail => StatusCode::BAD_REQUEST,
                    OrderError::NotFound(_) => StatusCode::NOT_FOUND,
                    OrderError::Conflict { .. } => StatusCode::CONFLICT,
                    OrderError::NotAnOutcome(_) | OrderError::Store(_) => {
                        tracing::error!(error = %err, "internal server error");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, err.to_string())
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::Order(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}
