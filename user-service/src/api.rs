use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::ApiError;
use crate::ledger::Ledger;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Ledger,
}

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    #[serde(with = "shared::money::as_number")]
    pub amount: BigDecimal,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    #[serde(with = "shared::money::as_number")]
    pub balance: BigDecimal,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/balance/:id", get(get_balance))
        .route("/api/v1/balance/:id/add", post(add_balance))
        .route("/api/v1/balance/:id/withdraw", post(withdraw))
        .route("/api/v1/balance/:id/open", post(open_account))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state.ledger.get_balance(user_id).await?;
    Ok(Json(BalanceResponse { balance }))
}

async fn add_balance(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    request: Result<Json<AmountRequest>, JsonRejection>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let Json(request) = request?;
    let balance = state.ledger.add_balance(user_id, &request.amount).await?;
    Ok(Json(BalanceResponse { balance }))
}

async fn withdraw(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    request: Result<Json<AmountRequest>, JsonRejection>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let Json(request) = request?;
    let balance = state.ledger.withdraw(user_id, &request.amount).await?;
    Ok(Json(BalanceResponse { balance }))
}

async fn open_account(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    request: Result<Json<AmountRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<BalanceResponse>), ApiError> {
    let Json(request) = request?;
    let account = state.ledger.open_account(user_id, &request.amount).await?;
    Ok((
        StatusCode::CREATED,
        Json(BalanceResponse {
            balance: account.balance,
        }),
    ))
}

pub async fn health_check() -> &'static str {
    "OK"
}
