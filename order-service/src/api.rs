use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::ApiError;
use crate::models::Order;
use crate::service::{CreateOrder, OrderService};

#[derive(Clone)]
pub struct AppState {
    pub orders: OrderService,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    #[serde(rename = "userID")]
    pub user_id: i64,
    pub email: String,
    #[serde(with = "shared::money::as_number")]
    pub amount: BigDecimal,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/orders", post(create_order))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/user/:user_id", get(list_orders_by_user))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn create_order(
    State(state): State<AppState>,
    request: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let Json(request) = request?;
    let order = state
        .orders
        .create_order(CreateOrder {
            user_id: request.user_id,
            email: request.email,
            amount: request.amount,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(state.orders.get_order(id).await?))
}

pub async fn list_orders_by_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<Order>>, ApiError> {
    Ok(Json(state.orders.list_orders_by_user(user_id).await?))
}

pub async fn health_check() -> &'static str {
    "OK"
}
