use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Per-user balances in USDC cents (and BLUEPRINT token cents).
///
/// Invariants: balances never go negative; every debit is matched by a
/// credit or an outstanding reservation in `usdc_locked_cents`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Wallet {
    pub user_id: i64,
    pub usdc_balance_cents: i64,
    pub usdc_locked_cents: i64,
    pub blueprint_balance_cents: i64,
    pub blueprint_locked_cents: i64,
    pub total_deposited_cents: i64,
    pub total_withdrawn_cents: i64,
    pub total_fees_paid_cents: i64,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Cents available for new reservations.
    pub fn available_cents(&self) -> i64 {
        self.usdc_balance_cents
    }

    pub fn total_cents(&self) -> i64 {
        self.usdc_balance_cents + self.usdc_locked_cents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals() {
        let w = Wallet {
            user_id: 1,
            usdc_balance_cents: 7_500,
            usdc_locked_cents: 2_500,
            blueprint_balance_cents: 0,
            blueprint_locked_cents: 0,
            total_deposited_cents: 10_000,
            total_withdrawn_cents: 0,
            total_fees_paid_cents: 0,
            updated_at: Utc::now(),
        };
        assert_eq!(w.available_cents(), 7_500);
        assert_eq!(w.total_cents(), 10_000);
    }
}
