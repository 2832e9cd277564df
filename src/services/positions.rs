//! Position Service
//!
//! Materialises per-user signed inventory on every fill. Increases
//! recompute the cost-weighted average price; decreases preserve it and
//! realise PnL on the closed quantity. A fill larger than the open
//! position flips it, opening the remainder at the fill price.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::ServiceError;
use crate::models::{MarketKey, Position};

/// Outcome of folding one fill into a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionDelta {
    pub new_quantity: i64,
    pub realized_pnl_cents: i64,
    /// Shares closed against an existing short (collateral behind them
    /// can be released by the caller).
    pub closed_short_quantity: i64,
}

pub struct PositionService {
    pool: PgPool,
}

impl PositionService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_user_positions(&self, user_id: i64) -> Result<Vec<Position>, ServiceError> {
        let positions = sqlx::query_as::<_, Position>(
            r#"
            SELECT user_id, milestone_id, option_id, quantity, avg_price,
                   total_cost_cents, realized_pnl_cents, updated_at
            FROM positions
            WHERE user_id = $1 AND quantity != 0
            ORDER BY milestone_id, option_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(positions)
    }

    pub async fn get(
        &self,
        user_id: i64,
        market: &MarketKey,
    ) -> Result<Option<Position>, ServiceError> {
        let position = sqlx::query_as::<_, Position>(
            r#"
            SELECT user_id, milestone_id, option_id, quantity, avg_price,
                   total_cost_cents, realized_pnl_cents, updated_at
            FROM positions
            WHERE user_id = $1 AND milestone_id = $2 AND option_id = $3
            "#,
        )
        .bind(user_id)
        .bind(market.milestone_id)
        .bind(market.option)
        .fetch_optional(&self.pool)
        .await?;

        Ok(position)
    }

    /// Long inventory available to back a sell without collateral.
    pub async fn long_quantity(
        &self,
        user_id: i64,
        market: &MarketKey,
    ) -> Result<i64, ServiceError> {
        Ok(self
            .get(user_id, market)
            .await?
            .map(|p| p.quantity.max(0))
            .unwrap_or(0))
    }

    /// Fold a fill into the user's position inside the caller's
    /// transaction. `delta` is signed: +qty for a buy, −qty for a sell.
    pub async fn apply_fill(
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
        market: &MarketKey,
        delta: i64,
        price: Decimal,
    ) -> Result<PositionDelta, ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO positions (user_id, milestone_id, option_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, milestone_id, option_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(market.milestone_id)
        .bind(market.option)
        .execute(&mut **tx)
        .await?;

        let current = sqlx::query_as::<_, Position>(
            r#"
            SELECT user_id, milestone_id, option_id, quantity, avg_price,
                   total_cost_cents, realized_pnl_cents, updated_at
            FROM positions
            WHERE user_id = $1 AND milestone_id = $2 AND option_id = $3
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .bind(market.milestone_id)
        .bind(market.option)
        .fetch_one(&mut **tx)
        .await?;

        let next = fold_fill(&current, delta, price);

        sqlx::query(
            r#"
            UPDATE positions
            SET quantity = $1, avg_price = $2, total_cost_cents = $3,
                realized_pnl_cents = realized_pnl_cents + $4, updated_at = NOW()
            WHERE user_id = $5 AND milestone_id = $6 AND option_id = $7
            "#,
        )
        .bind(next.quantity)
        .bind(next.avg_price)
        .bind(next.total_cost_cents)
        .bind(next.realized_pnl_cents)
        .bind(user_id)
        .bind(market.milestone_id)
        .bind(market.option)
        .execute(&mut **tx)
        .await?;

        Ok(PositionDelta {
            new_quantity: next.quantity,
            realized_pnl_cents: next.realized_pnl_cents,
            closed_short_quantity: next.closed_short_quantity,
        })
    }

    /// Net open interest per market; longs and shorts cancel to zero when
    /// the books are consistent.
    pub async fn net_quantity(&self, market: &MarketKey) -> Result<i64, ServiceError> {
        let net: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(quantity)::bigint FROM positions WHERE milestone_id = $1 AND option_id = $2",
        )
        .bind(market.milestone_id)
        .bind(market.option)
        .fetch_one(&self.pool)
        .await?;

        Ok(net.unwrap_or(0))
    }
}

struct FoldedPosition {
    quantity: i64,
    avg_price: Decimal,
    total_cost_cents: i64,
    /// Realised on this fill only (the row accumulates).
    realized_pnl_cents: i64,
    closed_short_quantity: i64,
}

/// Pure position arithmetic, kept separate from the row plumbing so the
/// math is testable without a store.
fn fold_fill(current: &Position, delta: i64, price: Decimal) -> FoldedPosition {
    let q0 = current.quantity;

    // Same direction (or opening from flat): cost-weighted average.
    if q0 == 0 || (q0 > 0) == (delta > 0) {
        let added_cost = cost_cents(delta.abs(), price);
        let quantity = q0 + delta;
        let total_cost_cents = current.total_cost_cents + added_cost;
        let avg_price = average_price(total_cost_cents, quantity.abs());
        return FoldedPosition {
            quantity,
            avg_price,
            total_cost_cents,
            realized_pnl_cents: 0,
            closed_short_quantity: 0,
        };
    }

    // Opposite direction: close up to |q0|, realise PnL on the closed
    // quantity at the preserved average price.
    let closed = delta.abs().min(q0.abs());
    let per_share = if q0 > 0 {
        price - current.avg_price
    } else {
        current.avg_price - price
    };
    let realized_pnl_cents = (per_share * Decimal::from(closed) * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .unwrap_or(0);
    let closed_short_quantity = if q0 < 0 { closed } else { 0 };

    let remaining_after_close = delta.abs() - closed;
    if remaining_after_close == 0 {
        let quantity = q0 + delta;
        let total_cost_cents = if quantity == 0 {
            0
        } else {
            // Pro-rata cost of the still-open shares at the old average.
            cost_cents(quantity.abs(), current.avg_price)
        };
        FoldedPosition {
            quantity,
            avg_price: current.avg_price,
            total_cost_cents,
            realized_pnl_cents,
            closed_short_quantity,
        }
    } else {
        // Flipped through zero: the surplus opens the other side at the
        // fill price.
        let quantity = if delta > 0 {
            remaining_after_close
        } else {
            -remaining_after_close
        };
        let total_cost_cents = cost_cents(remaining_after_close, price);
        FoldedPosition {
            quantity,
            avg_price: price,
            total_cost_cents,
            realized_pnl_cents,
            closed_short_quantity,
        }
    }
}

fn cost_cents(quantity: i64, price: Decimal) -> i64 {
    (Decimal::from(quantity) * price * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .unwrap_or(0)
}

fn average_price(total_cost_cents: i64, quantity: i64) -> Decimal {
    if quantity == 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(total_cost_cents) / (Decimal::from(quantity) * Decimal::ONE_HUNDRED))
        .round_dp(6)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Outcome;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn position(quantity: i64, avg_price: Decimal, total_cost_cents: i64) -> Position {
        Position {
            user_id: 1,
            milestone_id: 42,
            option: Outcome::Success,
            quantity,
            avg_price,
            total_cost_cents,
            realized_pnl_cents: 0,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_open_long_from_flat() {
        let next = fold_fill(&position(0, Decimal::ZERO, 0), 100, dec!(0.40));
        assert_eq!(next.quantity, 100);
        assert_eq!(next.total_cost_cents, 4000);
        assert_eq!(next.avg_price, dec!(0.40));
        assert_eq!(next.realized_pnl_cents, 0);
    }

    #[test]
    fn test_increase_recomputes_weighted_average() {
        // 100 @ 0.40 then 50 @ 0.70 -> 150 shares costing 7500 -> avg 0.50
        let next = fold_fill(&position(100, dec!(0.40), 4000), 50, dec!(0.70));
        assert_eq!(next.quantity, 150);
        assert_eq!(next.total_cost_cents, 7500);
        assert_eq!(next.avg_price, dec!(0.50));
    }

    #[test]
    fn test_decrease_preserves_average_and_realises() {
        // long 100 @ 0.40, sell 30 @ 0.55: realized (0.55-0.40)*30*100 = 450
        let next = fold_fill(&position(100, dec!(0.40), 4000), -30, dec!(0.55));
        assert_eq!(next.quantity, 70);
        assert_eq!(next.avg_price, dec!(0.40));
        assert_eq!(next.realized_pnl_cents, 450);
        assert_eq!(next.total_cost_cents, 2800);
        assert_eq!(next.closed_short_quantity, 0);
    }

    #[test]
    fn test_close_short_realises_inverted() {
        // short 50 @ 0.60, buy 20 @ 0.45: realized (0.60-0.45)*20*100 = 300
        let next = fold_fill(&position(-50, dec!(0.60), 3000), 20, dec!(0.45));
        assert_eq!(next.quantity, -30);
        assert_eq!(next.realized_pnl_cents, 300);
        assert_eq!(next.closed_short_quantity, 20);
    }

    #[test]
    fn test_flip_through_zero_opens_at_fill_price() {
        // long 10 @ 0.30, sell 25 @ 0.50: close 10 (+200), open short 15 @ 0.50
        let next = fold_fill(&position(10, dec!(0.30), 300), -25, dec!(0.50));
        assert_eq!(next.quantity, -15);
        assert_eq!(next.avg_price, dec!(0.50));
        assert_eq!(next.realized_pnl_cents, 200);
        assert_eq!(next.total_cost_cents, 750);
    }

    #[test]
    fn test_close_to_flat() {
        let next = fold_fill(&position(10, dec!(0.30), 300), -10, dec!(0.30));
        assert_eq!(next.quantity, 0);
        assert_eq!(next.total_cost_cents, 0);
        assert_eq!(next.realized_pnl_cents, 0);
    }
}
