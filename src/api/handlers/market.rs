//! Public Market-Data Handlers

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::AppState;
use crate::error::{ApiResponse, ServiceError};
use crate::models::{MarketData, MarketKey, OrderBookView, Outcome, PriceCandle, Trade};

fn parse_option(option: &str) -> Result<Outcome, ServiceError> {
    Outcome::parse(option)
        .ok_or_else(|| ServiceError::invalid(format!("unknown option: {option}")))
}

/// GET /milestones/:id/market
pub async fn get_market_data(
    State(state): State<Arc<AppState>>,
    Path(milestone_id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<MarketData>>>, ServiceError> {
    let data = state.query.get_market_data(milestone_id).await?;
    Ok(Json(ApiResponse::success(data)))
}

#[derive(Debug, Deserialize)]
pub struct DepthQuery {
    pub depth: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct OrderbookResponse {
    pub orderbook: OrderBookView,
}

/// GET /milestones/:id/orderbook/:option
pub async fn get_orderbook(
    State(state): State<Arc<AppState>>,
    Path((milestone_id, option)): Path<(i64, String)>,
    Query(query): Query<DepthQuery>,
) -> Result<Json<ApiResponse<OrderbookResponse>>, ServiceError> {
    let market = MarketKey::new(milestone_id, parse_option(&option)?);
    let orderbook = state.query.get_orderbook(&market, query.depth).await?;
    Ok(Json(ApiResponse::success(OrderbookResponse { orderbook })))
}

#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    pub limit: Option<i64>,
}

/// GET /milestones/:id/trades/:option
pub async fn get_recent_trades(
    State(state): State<Arc<AppState>>,
    Path((milestone_id, option)): Path<(i64, String)>,
    Query(query): Query<TradesQuery>,
) -> Result<Json<ApiResponse<Vec<Trade>>>, ServiceError> {
    let market = MarketKey::new(milestone_id, parse_option(&option)?);
    let trades = state.query.get_recent_trades(&market, query.limit).await?;
    Ok(Json(ApiResponse::success(trades)))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub interval: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PriceHistoryResponse {
    pub data: Vec<PriceCandle>,
    pub interval: String,
    pub count: usize,
}

/// GET /milestones/:id/price-history/:option
pub async fn get_price_history(
    State(state): State<Arc<AppState>>,
    Path((milestone_id, option)): Path<(i64, String)>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<PriceHistoryResponse>>, ServiceError> {
    let market = MarketKey::new(milestone_id, parse_option(&option)?);
    let interval = query.interval.unwrap_or_else(|| "1h".to_string());
    let data = state
        .query
        .get_price_history(&market, &interval, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(PriceHistoryResponse {
        count: data.len(),
        data,
        interval,
    })))
}
