//! Market Data Aggregator / Price Oracle
//!
//! Maintains the per-market snapshot (last price, 24h rollups, quotes) and
//! the OHLCV history. The owning instance updates it on every trade; the
//! read side serves it cache-first.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};

use crate::db::PriceHistoryOps;
use crate::error::ServiceError;
use crate::models::{MarketData, MarketKey, OrderBookView, Outcome};

/// Price movement produced by one trade, for `priced` events and
/// broadcast frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceMove {
    pub old_price: Decimal,
    pub new_price: Decimal,
}

impl PriceMove {
    pub fn changed(&self) -> bool {
        self.old_price != self.new_price
    }
}

pub struct MarketDataService {
    pool: PgPool,
    history: PriceHistoryOps,
}

impl MarketDataService {
    pub fn new(pool: PgPool) -> Self {
        let history = PriceHistoryOps::new(pool.clone());
        Self { pool, history }
    }

    pub fn history(&self) -> &PriceHistoryOps {
        &self.history
    }

    /// Seed both options of a milestone at complementary 0.50 prices so
    /// the pair starts summing to 1.0.
    pub async fn seed_milestone(&self, milestone_id: i64) -> Result<(), ServiceError> {
        for option in [Outcome::Success, Outcome::Fail] {
            sqlx::query(
                r#"
                INSERT INTO market_data (milestone_id, option_id)
                VALUES ($1, $2)
                ON CONFLICT (milestone_id, option_id) DO NOTHING
                "#,
            )
            .bind(milestone_id)
            .bind(option)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Fold one trade into the market snapshot inside the caller's
    /// transaction. Returns the price move for event emission.
    pub async fn record_trade(
        tx: &mut Transaction<'_, Postgres>,
        market: &MarketKey,
        price: Decimal,
        quantity: i64,
        at: DateTime<Utc>,
    ) -> Result<PriceMove, ServiceError> {
        let old_price: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT last_price FROM market_data
            WHERE milestone_id = $1 AND option_id = $2
            FOR UPDATE
            "#,
        )
        .bind(market.milestone_id)
        .bind(market.option)
        .fetch_optional(&mut **tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO market_data
                (milestone_id, option_id, last_price, prev_price, volume_24h, trades_24h,
                 high_24h, low_24h, last_trade_at, updated_at)
            VALUES ($1, $2, $3, $3, $4, 1, $3, $3, $5, NOW())
            ON CONFLICT (milestone_id, option_id) DO UPDATE SET
                prev_price = market_data.last_price,
                last_price = EXCLUDED.last_price,
                volume_24h = market_data.volume_24h + EXCLUDED.volume_24h,
                trades_24h = market_data.trades_24h + 1,
                high_24h = GREATEST(market_data.high_24h, EXCLUDED.high_24h),
                low_24h = LEAST(market_data.low_24h, EXCLUDED.low_24h),
                last_trade_at = EXCLUDED.last_trade_at,
                updated_at = NOW()
            "#,
        )
        .bind(market.milestone_id)
        .bind(market.option)
        .bind(price)
        .bind(quantity)
        .bind(at)
        .execute(&mut **tx)
        .await?;

        Ok(PriceMove {
            old_price: old_price.unwrap_or(price),
            new_price: price,
        })
    }

    /// Record the event-log high-water mark reflected by this transaction.
    pub async fn bump_event_version(
        tx: &mut Transaction<'_, Postgres>,
        market: &MarketKey,
        version: i64,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            UPDATE market_data
            SET last_event_version = GREATEST(last_event_version, $1)
            WHERE milestone_id = $2 AND option_id = $3
            "#,
        )
        .bind(version)
        .bind(market.milestone_id)
        .bind(market.option)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn last_event_version(&self, market: &MarketKey) -> Result<i64, ServiceError> {
        let version: Option<i64> = sqlx::query_scalar(
            "SELECT last_event_version FROM market_data WHERE milestone_id = $1 AND option_id = $2",
        )
        .bind(market.milestone_id)
        .bind(market.option)
        .fetch_optional(&self.pool)
        .await?;
        Ok(version.unwrap_or(0))
    }

    /// Write OHLCV buckets for a trade (outside the settlement
    /// transaction; history is derived data).
    pub async fn record_history(
        &self,
        market: &MarketKey,
        price: Decimal,
        quantity: i64,
        at: DateTime<Utc>,
    ) {
        if let Err(e) = self
            .history
            .record_trade(market.milestone_id, market.option, price, quantity, at)
            .await
        {
            tracing::warn!("Failed to record price history for {}: {}", market, e);
        }
    }

    /// Refresh top-of-book quotes from an engine snapshot.
    pub async fn update_quotes(
        &self,
        market: &MarketKey,
        view: &OrderBookView,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            UPDATE market_data
            SET bid = $1, ask = $2, spread = $3, updated_at = NOW()
            WHERE milestone_id = $4 AND option_id = $5
            "#,
        )
        .bind(view.best_bid())
        .bind(view.best_ask())
        .bind(view.spread())
        .bind(market.milestone_id)
        .bind(market.option)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, market: &MarketKey) -> Result<Option<MarketData>, ServiceError> {
        let data = sqlx::query_as::<_, MarketData>(
            r#"
            SELECT milestone_id, option_id, last_price, prev_price, change_24h,
                   volume_24h, trades_24h, high_24h, low_24h, bid, ask, spread,
                   last_trade_at, last_event_version
            FROM market_data
            WHERE milestone_id = $1 AND option_id = $2
            "#,
        )
        .bind(market.milestone_id)
        .bind(market.option)
        .fetch_optional(&self.pool)
        .await?;
        Ok(data)
    }

    pub async fn get_for_milestone(
        &self,
        milestone_id: i64,
    ) -> Result<Vec<MarketData>, ServiceError> {
        let data = sqlx::query_as::<_, MarketData>(
            r#"
            SELECT milestone_id, option_id, last_price, prev_price, change_24h,
                   volume_24h, trades_24h, high_24h, low_24h, bid, ask, spread,
                   last_trade_at, last_event_version
            FROM market_data
            WHERE milestone_id = $1
            ORDER BY option_id
            "#,
        )
        .bind(milestone_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(data)
    }

    /// Recompute the rolling 24h window from the trades table. The
    /// incremental counters drift as trades age out; this runs on a timer
    /// to true them up.
    pub async fn refresh_24h(&self, market: &MarketKey) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            UPDATE market_data md
            SET volume_24h = w.volume,
                trades_24h = w.trades,
                high_24h = COALESCE(w.high, md.last_price),
                low_24h = COALESCE(w.low, md.last_price),
                change_24h = md.last_price - COALESCE(w.open, md.last_price),
                updated_at = NOW()
            FROM (
                SELECT COALESCE(SUM(quantity), 0) AS volume,
                       COUNT(*) AS trades,
                       MAX(price) AS high,
                       MIN(price) AS low,
                       (ARRAY_AGG(price ORDER BY created_at ASC))[1] AS open
                FROM trades
                WHERE milestone_id = $1 AND option_id = $2
                  AND created_at > NOW() - INTERVAL '24 hours'
            ) w
            WHERE md.milestone_id = $1 AND md.option_id = $2
            "#,
        )
        .bind(market.milestone_id)
        .bind(market.option)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Markets with any activity, for the refresh loop.
    pub async fn active_markets(&self) -> Result<Vec<MarketKey>, ServiceError> {
        let rows: Vec<(i64, Outcome)> = sqlx::query_as(
            "SELECT milestone_id, option_id FROM market_data",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(milestone_id, option)| MarketKey::new(milestone_id, option))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_move_changed() {
        let flat = PriceMove {
            old_price: dec!(0.50),
            new_price: dec!(0.50),
        };
        assert!(!flat.changed());

        let moved = PriceMove {
            old_price: dec!(0.50),
            new_price: dec!(0.70),
        };
        assert!(moved.changed());
    }
}
