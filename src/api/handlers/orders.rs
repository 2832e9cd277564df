//! Order and Account Handlers (authenticated)

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::auth::AuthUser;
use crate::api::AppState;
use crate::error::{ApiResponse, ServiceError};
use crate::models::{
    CreateOrderRequest, OrderResponse, OrderStatus, PositionView, Trade, Wallet,
};
use crate::services::CreateOrderOutcome;

/// POST /orders
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<CreateOrderRequest>,
) -> Result<Json<ApiResponse<CreateOrderOutcome>>, ServiceError> {
    let outcome = state.trading.create_order(auth.user_id, req).await?;
    Ok(Json(ApiResponse::success(outcome)))
}

/// DELETE /orders/:id
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.trading.cancel_order(auth.user_id, order_id).await?;
    Ok(Json(ApiResponse::success(order.into())))
}

#[derive(Debug, Deserialize)]
pub struct MyOrdersQuery {
    pub status: Option<OrderStatus>,
    pub limit: Option<i64>,
}

/// GET /orders/my
pub async fn my_orders(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<MyOrdersQuery>,
) -> Result<Json<ApiResponse<Vec<OrderResponse>>>, ServiceError> {
    let orders = state
        .query
        .get_user_orders(auth.user_id, query.status, query.limit)
        .await?;
    let orders = orders.into_iter().map(OrderResponse::from).collect();
    Ok(Json(ApiResponse::success(orders)))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

/// GET /trades/my
pub async fn my_trades(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ApiResponse<Vec<Trade>>>, ServiceError> {
    let trades = state.query.get_user_trades(auth.user_id, query.limit).await?;
    Ok(Json(ApiResponse::success(trades)))
}

/// GET /positions/my
pub async fn my_positions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ApiResponse<Vec<PositionView>>>, ServiceError> {
    let positions = state.query.get_user_positions(auth.user_id).await?;
    Ok(Json(ApiResponse::success(positions)))
}

/// GET /wallet
pub async fn my_wallet(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ApiResponse<Wallet>>, ServiceError> {
    let wallet = state.query.get_wallet(auth.user_id).await?;
    Ok(Json(ApiResponse::success(wallet)))
}
