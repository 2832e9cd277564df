use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::market::Outcome;
use super::order::datetime_as_millis;

/// Cents exchanged for a fill: `⌊quantity · price · 100⌋`.
///
/// A zero total after rounding is still a valid trade; the share quantity
/// is accounted regardless.
pub fn trade_total_cents(quantity: i64, price: Decimal) -> i64 {
    (Decimal::from(quantity) * price * Decimal::ONE_HUNDRED)
        .floor()
        .to_i64()
        .unwrap_or(0)
}

/// Per-side platform fee: half of `total · rate`, floored, so odd cents
/// favour the user.
pub fn side_fee_cents(total_cents: i64, fee_rate: Decimal) -> i64 {
    (Decimal::from(total_cents) * fee_rate / Decimal::TWO)
        .floor()
        .to_i64()
        .unwrap_or(0)
}

/// An executed match. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trade {
    pub id: Uuid,
    pub milestone_id: i64,
    #[sqlx(rename = "option_id")]
    #[serde(rename = "option_id")]
    pub option: Outcome,
    pub buy_order_id: Uuid,
    pub sell_order_id: Uuid,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub quantity: i64,
    pub price: Decimal,
    pub total_cents: i64,
    pub buyer_fee_cents: i64,
    pub seller_fee_cents: i64,
    #[serde(with = "datetime_as_millis")]
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_total_cents_floors() {
        // 30 * 0.70 * 100 = 2100 exactly
        assert_eq!(trade_total_cents(30, dec!(0.70)), 2100);
        assert_eq!(trade_total_cents(1, dec!(0.01)), 1);
        assert_eq!(trade_total_cents(0, dec!(0.50)), 0);
    }

    #[test]
    fn test_fee_split_equally_floored() {
        // 2% of 2100 = 42, each side pays 21
        assert_eq!(side_fee_cents(2100, dec!(0.02)), 21);
        // 2% of 101 = 2.02, half = 1.01 -> 1 per side
        assert_eq!(side_fee_cents(101, dec!(0.02)), 1);
        // tiny totals round to zero fee
        assert_eq!(side_fee_cents(1, dec!(0.02)), 0);
    }
}
