use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::ApiError;
use crate::models::Payment;
use crate::service::PaymentService;

#[derive(Clone)]
pub struct AppState {
    pub payments: PaymentService,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/payments/:id", get(get_payment))
        .route("/api/v1/payments/user/:user_id", get(list_payments_by_user))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Payment>, ApiError> {
    Ok(Json(state.payments.get_payment(id).await?))
}

pub async fn list_payments_by_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<Payment>>, ApiError> {
    Ok(Json(state.payments.list_payments_by_user(user_id).await?))
}

pub async fn health_check() -> &'static str {
    "OK"
}
