//! Market Identity and Market Data Models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary outcome option of a milestone market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "outcome_option", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Fail,
}

impl Outcome {
    /// The complementary option on the same milestone.
    pub fn complement(&self) -> Self {
        match self {
            Outcome::Success => Outcome::Fail,
            Outcome::Fail => Outcome::Success,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Outcome::Success),
            "fail" => Some(Outcome::Fail),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Fail => write!(f, "fail"),
        }
    }
}

/// A tradeable market: one outcome option of one milestone.
///
/// Complementary options are independent books; seeding keeps their prices
/// summing to roughly 1.0 but no hard invariant ties them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarketKey {
    pub milestone_id: i64,
    pub option: Outcome,
}

impl MarketKey {
    pub fn new(milestone_id: i64, option: Outcome) -> Self {
        Self {
            milestone_id,
            option,
        }
    }

    pub fn complement(&self) -> Self {
        Self {
            milestone_id: self.milestone_id,
            option: self.option.complement(),
        }
    }
}

impl fmt::Display for MarketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.milestone_id, self.option)
    }
}

/// Milestone lifecycle states. Trading is enabled only in `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "milestone_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MilestoneStatus {
    Draft,
    Funding,
    Active,
    Resolving,
    Resolved,
}

impl MilestoneStatus {
    pub fn is_tradeable(&self) -> bool {
        matches!(self, MilestoneStatus::Active)
    }
}

impl fmt::Display for MilestoneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MilestoneStatus::Draft => "draft",
            MilestoneStatus::Funding => "funding",
            MilestoneStatus::Active => "active",
            MilestoneStatus::Resolving => "resolving",
            MilestoneStatus::Resolved => "resolved",
        };
        write!(f, "{s}")
    }
}

/// Per-market rolling snapshot, persisted and cached.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MarketData {
    pub milestone_id: i64,
    #[sqlx(rename = "option_id")]
    #[serde(rename = "option_id")]
    pub option: Outcome,
    pub last_price: Decimal,
    pub prev_price: Decimal,
    pub change_24h: Decimal,
    pub volume_24h: i64,
    pub trades_24h: i64,
    pub high_24h: Decimal,
    pub low_24h: Decimal,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub spread: Option<Decimal>,
    pub last_trade_at: Option<DateTime<Utc>>,
    /// Highest event-log version already reflected in relational state.
    #[serde(skip)]
    #[sqlx(default)]
    pub last_event_version: i64,
}

/// One aggregated price level of an order-book view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: Decimal,
    pub quantity: i64,
    pub order_count: usize,
}

/// Depth-limited order-book view for API and broadcast consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookView {
    pub milestone_id: i64,
    #[serde(rename = "option_id")]
    pub option: Outcome,
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
    pub timestamp: i64,
}

impl OrderBookView {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }
}

/// Time-bucketed OHLCV row by option.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PriceCandle {
    pub milestone_id: i64,
    #[sqlx(rename = "option_id")]
    #[serde(rename = "option_id")]
    pub option: Outcome,
    pub bucket_start: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_complement() {
        assert_eq!(Outcome::Success.complement(), Outcome::Fail);
        assert_eq!(Outcome::Fail.complement(), Outcome::Success);
    }

    #[test]
    fn test_market_key_display() {
        let key = MarketKey::new(42, Outcome::Success);
        assert_eq!(key.to_string(), "42:success");
        assert_eq!(key.complement().to_string(), "42:fail");
    }

    #[test]
    fn test_only_active_is_tradeable() {
        assert!(MilestoneStatus::Active.is_tradeable());
        assert!(!MilestoneStatus::Funding.is_tradeable());
        assert!(!MilestoneStatus::Resolved.is_tradeable());
    }
}
