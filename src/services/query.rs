//! Query Service (CQRS Read Side)
//!
//! Every public read goes cache-first with a short TTL and falls back to
//! the store (or the live book for depth views), repopulating the cache on
//! the way out. A user's own orders and positions are read-your-writes
//! because the command handler returns them directly; cross-user views are
//! eventually consistent.

use std::sync::Arc;

use crate::cache::CacheManager;
use crate::db::HistoryInterval;
use crate::engine::{now_ms, EngineManager};
use crate::error::ServiceError;
use crate::models::{
    MarketData, MarketKey, Order, OrderBookLevel, OrderBookView, OrderSide, OrderStatus,
    PositionView, PriceCandle, Trade, Wallet,
};
use crate::services::market_data::MarketDataService;
use crate::services::positions::PositionService;
use crate::services::wallet::WalletService;

const DEFAULT_DEPTH: usize = 20;
const MAX_LIMIT: i64 = 200;

pub struct QueryService {
    pool: sqlx::PgPool,
    cache: Arc<CacheManager>,
    engine: Arc<EngineManager>,
    market_data: Arc<MarketDataService>,
    positions: PositionService,
    wallets: WalletService,
}

impl QueryService {
    pub fn new(
        pool: sqlx::PgPool,
        cache: Arc<CacheManager>,
        engine: Arc<EngineManager>,
        market_data: Arc<MarketDataService>,
    ) -> Self {
        let positions = PositionService::new(pool.clone());
        let wallets = WalletService::new(pool.clone());
        Self {
            pool,
            cache,
            engine,
            market_data,
            positions,
            wallets,
        }
    }

    /// Snapshot for both options of a milestone.
    pub async fn get_market_data(&self, milestone_id: i64) -> Result<Vec<MarketData>, ServiceError> {
        let rows = self.market_data.get_for_milestone(milestone_id).await?;
        if rows.is_empty() {
            return Err(ServiceError::NotFound(format!("milestone {milestone_id} markets")));
        }

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let market = MarketKey::new(row.milestone_id, row.option);
            match self.cache.market().get_market_data(&market).await {
                Some(cached) => out.push(cached),
                None => {
                    self.cache.market().set_market_data(&market, &row).await;
                    out.push(row);
                }
            }
        }
        Ok(out)
    }

    /// Depth view: cache, then the live book if this instance owns the
    /// market, then an aggregation over open order rows.
    pub async fn get_orderbook(
        &self,
        market: &MarketKey,
        depth: Option<usize>,
    ) -> Result<OrderBookView, ServiceError> {
        let depth = depth.unwrap_or(DEFAULT_DEPTH).clamp(1, 100);

        if let Some(view) = self.cache.market().get_orderbook(market).await {
            return Ok(view);
        }

        if self.engine.is_open(market) {
            if let Ok(view) = self.engine.snapshot(market, depth).await {
                self.cache.market().set_orderbook(market, &view).await;
                return Ok(view);
            }
        }

        let view = self.orderbook_from_store(market, depth).await?;
        self.cache.market().set_orderbook(market, &view).await;
        Ok(view)
    }

    async fn orderbook_from_store(
        &self,
        market: &MarketKey,
        depth: usize,
    ) -> Result<OrderBookView, ServiceError> {
        let levels: Vec<(OrderSide, rust_decimal::Decimal, i64, i64)> = sqlx::query_as(
            r#"
            SELECT side, price, SUM(remaining)::bigint, COUNT(*)::bigint
            FROM orders
            WHERE milestone_id = $1 AND option_id = $2
              AND status IN ('pending', 'partial') AND deleted_at IS NULL
            GROUP BY side, price
            "#,
        )
        .bind(market.milestone_id)
        .bind(market.option)
        .fetch_all(&self.pool)
        .await?;

        let mut bids = Vec::new();
        let mut asks = Vec::new();
        for (side, price, quantity, order_count) in levels {
            let level = OrderBookLevel {
                price,
                quantity,
                order_count: order_count as usize,
            };
            match side {
                OrderSide::Buy => bids.push(level),
                OrderSide::Sell => asks.push(level),
            }
        }
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));
        bids.truncate(depth);
        asks.truncate(depth);

        Ok(OrderBookView {
            milestone_id: market.milestone_id,
            option: market.option,
            bids,
            asks,
            timestamp: now_ms(),
        })
    }

    pub async fn get_user_orders(
        &self,
        user_id: i64,
        status: Option<OrderStatus>,
        limit: Option<i64>,
    ) -> Result<Vec<Order>, ServiceError> {
        let limit = clamp_limit(limit);
        let orders = match status {
            Some(status) => {
                sqlx::query_as::<_, Order>(
                    r#"
                    SELECT * FROM orders
                    WHERE user_id = $1 AND status = $2 AND deleted_at IS NULL
                    ORDER BY created_at DESC
                    LIMIT $3
                    "#,
                )
                .bind(user_id)
                .bind(status)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Order>(
                    r#"
                    SELECT * FROM orders
                    WHERE user_id = $1 AND deleted_at IS NULL
                    ORDER BY created_at DESC
                    LIMIT $2
                    "#,
                )
                .bind(user_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(orders)
    }

    pub async fn get_user_trades(
        &self,
        user_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<Trade>, ServiceError> {
        let trades = sqlx::query_as::<_, Trade>(
            r#"
            SELECT * FROM trades
            WHERE buyer_id = $1 OR seller_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(clamp_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(trades)
    }

    pub async fn get_user_positions(&self, user_id: i64) -> Result<Vec<PositionView>, ServiceError> {
        let positions = self.positions.get_user_positions(user_id).await?;

        let mut views = Vec::with_capacity(positions.len());
        for position in positions {
            let market = MarketKey::new(position.milestone_id, position.option);
            let last_price = match self.cache.market().get_market_data(&market).await {
                Some(data) => Some(data.last_price),
                None => self
                    .market_data
                    .get(&market)
                    .await?
                    .map(|data| data.last_price),
            };
            let unrealized = last_price
                .map(|price| position.unrealized_pnl_cents(price))
                .unwrap_or(0);
            views.push(PositionView {
                position,
                last_price,
                unrealized_pnl_cents: unrealized,
            });
        }
        Ok(views)
    }

    pub async fn get_recent_trades(
        &self,
        market: &MarketKey,
        limit: Option<i64>,
    ) -> Result<Vec<Trade>, ServiceError> {
        let limit = clamp_limit(limit);

        if let Some(cached) = self.cache.market().get_recent_trades(market).await {
            if cached.len() as i64 >= limit {
                let mut trades = cached;
                trades.truncate(limit as usize);
                return Ok(trades);
            }
        }

        let trades = sqlx::query_as::<_, Trade>(
            r#"
            SELECT * FROM trades
            WHERE milestone_id = $1 AND option_id = $2
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(market.milestone_id)
        .bind(market.option)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        self.cache.market().set_recent_trades(market, &trades).await;
        Ok(trades)
    }

    pub async fn get_price_history(
        &self,
        market: &MarketKey,
        interval: &str,
        limit: Option<i64>,
    ) -> Result<Vec<PriceCandle>, ServiceError> {
        let interval = HistoryInterval::parse(interval)
            .ok_or_else(|| ServiceError::invalid(format!("unknown interval: {interval}")))?;

        let candles = self
            .market_data
            .history()
            .get_recent(
                market.milestone_id,
                market.option,
                interval,
                clamp_limit(limit),
            )
            .await?;
        Ok(candles)
    }

    pub async fn get_wallet(&self, user_id: i64) -> Result<Wallet, ServiceError> {
        self.wallets.get_or_default(user_id).await
    }
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(50).clamp(1, MAX_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None), 50);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(10)), 10);
        assert_eq!(clamp_limit(Some(100_000)), MAX_LIMIT);
    }
}
