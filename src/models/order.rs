use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;
use validator::Validate;

use super::market::Outcome;

// Helper module to (de)serialize DateTime as a milliseconds timestamp
pub(crate) mod datetime_as_millis {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(dt.timestamp_millis())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = i64::deserialize(deserializer)?;
        DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {millis}")))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(
            dt: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match dt {
                Some(dt) => serializer.serialize_some(&dt.timestamp_millis()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let millis = Option::<i64>::deserialize(deserializer)?;
            millis
                .map(|millis| {
                    DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
                        serde::de::Error::custom(format!("timestamp out of range: {millis}"))
                    })
                })
                .transpose()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_side", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Partial,
    Filled,
    Cancelled,
    Expired,
}

impl OrderStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Expired
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Partial => "partial",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

/// How an order's exposure is backed. Recorded at creation and drives the
/// refund path on cancel/expire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "collateral_mode", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CollateralMode {
    /// Buy order: cash locked up front.
    Cash,
    /// Sell backed by an existing long position (delivers inventory).
    Inventory,
    /// Naked sell: `(1 - price)` collateral locked per share.
    ShortCollateral,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_id: i64,
    pub milestone_id: i64,
    #[sqlx(rename = "option_id")]
    #[serde(rename = "option_id")]
    pub option: Outcome,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: i64,
    pub filled: i64,
    pub remaining: i64,
    pub status: OrderStatus,
    pub collateral_mode: CollateralMode,
    /// Cents still reserved in the owner's wallet for this order.
    pub locked_cents: i64,
    #[serde(with = "datetime_as_millis")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "datetime_as_millis::option")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Cents a buy must reserve: `⌈quantity · price · 100⌉`.
    pub fn buy_lock_cents(quantity: i64, price: Decimal) -> i64 {
        (Decimal::from(quantity) * price * Decimal::ONE_HUNDRED)
            .ceil()
            .to_i64()
            .unwrap_or(i64::MAX)
    }

    /// Cents a naked sell must reserve: `⌈quantity · (1 − price) · 100⌉`.
    pub fn short_collateral_cents(quantity: i64, price: Decimal) -> i64 {
        (Decimal::from(quantity) * (Decimal::ONE - price) * Decimal::ONE_HUNDRED)
            .ceil()
            .to_i64()
            .unwrap_or(i64::MAX)
    }
}

/// Lowest and highest valid order prices; the tick is 0.01.
pub const MIN_PRICE: Decimal = Decimal::from_parts(1, 0, 0, false, 2); // 0.01
pub const MAX_PRICE: Decimal = Decimal::from_parts(99, 0, 0, false, 2); // 0.99

/// A price is valid when it lies on the 0.01 tick inside [0.01, 0.99].
pub fn is_valid_price(price: Decimal) -> bool {
    if price < MIN_PRICE || price > MAX_PRICE {
        return false;
    }
    (price * Decimal::ONE_HUNDRED).fract().is_zero()
}

fn validate_order_price(price: &Decimal) -> Result<(), validator::ValidationError> {
    if is_valid_price(*price) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("price_off_tick"))
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub milestone_id: i64,
    #[serde(rename = "option_id")]
    pub option: Outcome,
    pub side: OrderSide,
    #[validate(custom = "validate_order_price")]
    pub price: Decimal,
    #[validate(range(min = 1))]
    pub quantity: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub order_id: Uuid,
    pub milestone_id: i64,
    pub option_id: Outcome,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: i64,
    pub filled: i64,
    pub remaining: i64,
    pub status: OrderStatus,
    pub collateral_mode: CollateralMode,
    pub locked_cents: i64,
    #[serde(with = "datetime_as_millis")]
    pub created_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            order_id: order.id,
            milestone_id: order.milestone_id,
            option_id: order.option,
            side: order.side,
            price: order.price,
            quantity: order.quantity,
            filled: order.filled,
            remaining: order.remaining,
            status: order.status,
            collateral_mode: order.collateral_mode,
            locked_cents: order.locked_cents,
            created_at: order.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_bounds() {
        assert!(is_valid_price(dec!(0.01)));
        assert!(is_valid_price(dec!(0.99)));
        assert!(is_valid_price(dec!(0.50)));
        assert!(!is_valid_price(dec!(0.00)));
        assert!(!is_valid_price(dec!(1.00)));
        assert!(!is_valid_price(dec!(0.005)));
        assert!(!is_valid_price(dec!(0.505)));
    }

    #[test]
    fn test_buy_lock_rounds_up() {
        assert_eq!(Order::buy_lock_cents(50, dec!(0.50)), 2500);
        assert_eq!(Order::buy_lock_cents(3, dec!(0.33)), 99);
        assert_eq!(Order::buy_lock_cents(1, dec!(0.07)), 7);
    }

    #[test]
    fn test_short_collateral() {
        // 10 shares at 0.70: 10 * 0.30 * 100 = 300
        assert_eq!(Order::short_collateral_cents(10, dec!(0.70)), 300);
        assert_eq!(Order::short_collateral_cents(1, dec!(0.99)), 1);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Partial.is_terminal());
    }
}
