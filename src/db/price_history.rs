//! Price History Operations
//!
//! Time-bucketed OHLCV rows per market option. Buckets are upserted on
//! every trade by the owning instance and queried by the read side.

use chrono::{DateTime, Duration, DurationRound, Utc};
use sqlx::PgPool;

use crate::models::{Outcome, PriceCandle};

/// Supported history bucket widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryInterval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    OneDay,
}

impl HistoryInterval {
    /// Parse from query-string form (e.g. "1m", "1h", "1d").
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "1m" | "1min" => Some(HistoryInterval::OneMinute),
            "5m" | "5min" => Some(HistoryInterval::FiveMinutes),
            "15m" | "15min" => Some(HistoryInterval::FifteenMinutes),
            "1h" | "60m" => Some(HistoryInterval::OneHour),
            "1d" | "1day" => Some(HistoryInterval::OneDay),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryInterval::OneMinute => "1m",
            HistoryInterval::FiveMinutes => "5m",
            HistoryInterval::FifteenMinutes => "15m",
            HistoryInterval::OneHour => "1h",
            HistoryInterval::OneDay => "1d",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            HistoryInterval::OneMinute => Duration::minutes(1),
            HistoryInterval::FiveMinutes => Duration::minutes(5),
            HistoryInterval::FifteenMinutes => Duration::minutes(15),
            HistoryInterval::OneHour => Duration::hours(1),
            HistoryInterval::OneDay => Duration::days(1),
        }
    }

    /// Truncate a timestamp to the start of its bucket.
    pub fn bucket_start(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        at.duration_trunc(self.duration()).unwrap_or(at)
    }

    pub const ALL: [HistoryInterval; 5] = [
        HistoryInterval::OneMinute,
        HistoryInterval::FiveMinutes,
        HistoryInterval::FifteenMinutes,
        HistoryInterval::OneHour,
        HistoryInterval::OneDay,
    ];
}

pub struct PriceHistoryOps {
    pool: PgPool,
}

impl PriceHistoryOps {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fold one trade into the bucket of every interval.
    pub async fn record_trade(
        &self,
        milestone_id: i64,
        option: Outcome,
        price: rust_decimal::Decimal,
        quantity: i64,
        at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        for interval in HistoryInterval::ALL {
            let bucket = interval.bucket_start(at);
            sqlx::query(
                r#"
                INSERT INTO price_history (milestone_id, option_id, interval, bucket_start, open, high, low, close, volume)
                VALUES ($1, $2, $3, $4, $5, $5, $5, $5, $6)
                ON CONFLICT (milestone_id, option_id, interval, bucket_start) DO UPDATE SET
                    high = GREATEST(price_history.high, EXCLUDED.high),
                    low = LEAST(price_history.low, EXCLUDED.low),
                    close = EXCLUDED.close,
                    volume = price_history.volume + EXCLUDED.volume
                "#,
            )
            .bind(milestone_id)
            .bind(option)
            .bind(interval.as_str())
            .bind(bucket)
            .bind(price)
            .bind(quantity)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Most recent candles, newest first.
    pub async fn get_recent(
        &self,
        milestone_id: i64,
        option: Outcome,
        interval: HistoryInterval,
        limit: i64,
    ) -> Result<Vec<PriceCandle>, sqlx::Error> {
        sqlx::query_as::<_, PriceCandle>(
            r#"
            SELECT milestone_id, option_id, bucket_start, open, high, low, close, volume
            FROM price_history
            WHERE milestone_id = $1 AND option_id = $2 AND interval = $3
            ORDER BY bucket_start DESC
            LIMIT $4
            "#,
        )
        .bind(milestone_id)
        .bind(option)
        .bind(interval.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_parse() {
        assert_eq!(HistoryInterval::parse("1m"), Some(HistoryInterval::OneMinute));
        assert_eq!(HistoryInterval::parse("1H"), Some(HistoryInterval::OneHour));
        assert_eq!(HistoryInterval::parse("1d"), Some(HistoryInterval::OneDay));
        assert_eq!(HistoryInterval::parse("3w"), None);
    }

    #[test]
    fn test_bucket_truncation() {
        let at = DateTime::parse_from_rfc3339("2026-03-01T10:34:56Z")
            .unwrap()
            .with_timezone(&Utc);
        let bucket = HistoryInterval::FiveMinutes.bucket_start(at);
        assert_eq!(bucket.to_rfc3339(), "2026-03-01T10:30:00+00:00");
        let hour = HistoryInterval::OneHour.bucket_start(at);
        assert_eq!(hour.to_rfc3339(), "2026-03-01T10:00:00+00:00");
    }
}
