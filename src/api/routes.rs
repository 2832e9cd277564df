use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::AppState;
use crate::broadcast;

pub fn create_router() -> Router<Arc<AppState>> {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/milestones/:id/market", get(handlers::market::get_market_data))
        .route(
            "/milestones/:id/orderbook/:option",
            get(handlers::market::get_orderbook),
        )
        .route(
            "/milestones/:id/trades/:option",
            get(handlers::market::get_recent_trades),
        )
        .route(
            "/milestones/:id/price-history/:option",
            get(handlers::market::get_price_history),
        )
        .route("/milestones/:id/stream", get(broadcast::milestone_stream));

    // Authenticated routes: the AuthUser extractor rejects requests the
    // gateway did not stamp with a caller id.
    let user_routes = Router::new()
        .route("/orders", post(handlers::orders::create_order))
        .route("/orders/:order_id", delete(handlers::orders::cancel_order))
        .route("/orders/my", get(handlers::orders::my_orders))
        .route("/trades/my", get(handlers::orders::my_trades))
        .route("/positions/my", get(handlers::orders::my_positions))
        .route("/wallet", get(handlers::orders::my_wallet));

    // Internal seam for the milestone lifecycle service.
    let internal_routes = Router::new().route(
        "/internal/milestones/:id/status",
        post(handlers::lifecycle::set_status),
    );

    Router::new()
        .merge(public_routes)
        .merge(user_routes)
        .merge(internal_routes)
}
