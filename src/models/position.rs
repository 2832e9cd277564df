use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::market::Outcome;

/// A user's net inventory on one market. Materialised on every fill.
///
/// `quantity` is signed: positive long, negative short. `avg_price` is the
/// cost-weighted average of the open side; realized PnL accrues when the
/// position shrinks toward zero.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Position {
    pub user_id: i64,
    pub milestone_id: i64,
    #[sqlx(rename = "option_id")]
    #[serde(rename = "option_id")]
    pub option: Outcome,
    pub quantity: i64,
    pub avg_price: Decimal,
    pub total_cost_cents: i64,
    pub realized_pnl_cents: i64,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Mark-to-market PnL against `last_price`, in cents.
    pub fn unrealized_pnl_cents(&self, last_price: Decimal) -> i64 {
        use rust_decimal::prelude::ToPrimitive;
        ((last_price - self.avg_price) * Decimal::from(self.quantity) * Decimal::ONE_HUNDRED)
            .round()
            .to_i64()
            .unwrap_or(0)
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0
    }
}

/// Position enriched with mark-to-market fields for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct PositionView {
    #[serde(flatten)]
    pub position: Position,
    pub last_price: Option<Decimal>,
    pub unrealized_pnl_cents: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(quantity: i64, avg_price: Decimal) -> Position {
        Position {
            user_id: 1,
            milestone_id: 42,
            option: Outcome::Success,
            quantity,
            avg_price,
            total_cost_cents: 0,
            realized_pnl_cents: 0,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_unrealized_long() {
        // long 100 @ 0.40, marked at 0.55: +15 cents/share = 1500
        let p = position(100, dec!(0.40));
        assert_eq!(p.unrealized_pnl_cents(dec!(0.55)), 1500);
    }

    #[test]
    fn test_unrealized_short() {
        // short 50 @ 0.60, marked at 0.70: -10 cents/share on 50 short = -500
        let p = position(-50, dec!(0.60));
        assert_eq!(p.unrealized_pnl_cents(dec!(0.70)), -500);
    }

    #[test]
    fn test_flat_has_no_mark() {
        let p = position(0, dec!(0.50));
        assert_eq!(p.unrealized_pnl_cents(dec!(0.99)), 0);
        assert!(p.is_flat());
    }
}
