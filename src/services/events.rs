//! Event-Sourcing Log
//!
//! Per-market append-only log with a server-assigned, strictly monotonic,
//! gap-free `version`. Only the market lock holder may append; the unique
//! `(milestone_id, option_id, version)` index turns any race between a
//! stale holder and the new one into a retryable insert conflict. Events
//! are idempotent by `event_id` and kept for at least the retention
//! window.

use rand::Rng;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::cache::MarketLockManager;
use crate::error::ServiceError;
use crate::models::{EventPayload, MarketKey, OrderEvent, OrderEventKind};

const APPEND_ATTEMPTS: u32 = 3;

pub struct EventStore {
    pool: PgPool,
    server_id: String,
    locks: Arc<MarketLockManager>,
}

impl EventStore {
    pub fn new(pool: PgPool, server_id: String, locks: Arc<MarketLockManager>) -> Self {
        Self {
            pool,
            server_id,
            locks,
        }
    }

    /// Append one event and return its version. Rejected outright when
    /// this instance does not hold the market lock.
    pub async fn append(
        &self,
        market: &MarketKey,
        kind: OrderEventKind,
        order_id: Option<Uuid>,
        trade_id: Option<Uuid>,
        payload: &EventPayload,
    ) -> Result<i64, ServiceError> {
        if !self.locks.holds(market) {
            return Err(ServiceError::Forbidden(format!(
                "not the lock holder for market {market}"
            )));
        }

        let payload = serde_json::to_value(payload)
            .map_err(|e| ServiceError::internal(format!("event payload: {e}")))?;

        let mut last_err = None;
        for attempt in 0..APPEND_ATTEMPTS {
            let result: Result<i64, sqlx::Error> = sqlx::query_scalar(
                r#"
                INSERT INTO order_events
                    (event_id, milestone_id, option_id, version, kind, order_id, trade_id, payload, server_id)
                SELECT $1, $2, $3, COALESCE(MAX(version), 0) + 1, $4, $5, $6, $7, $8
                FROM order_events
                WHERE milestone_id = $2 AND option_id = $3
                RETURNING version
                "#,
            )
            .bind(OrderEvent::new_id())
            .bind(market.milestone_id)
            .bind(market.option)
            .bind(kind)
            .bind(order_id)
            .bind(trade_id)
            .bind(&payload)
            .bind(&self.server_id)
            .fetch_one(&self.pool)
            .await;

            match result {
                Ok(version) => {
                    metrics::counter!("events_appended").increment(1);
                    return Ok(version);
                }
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                    // Lost the version race; jittered backoff then retry.
                    let jitter = rand::thread_rng().gen_range(0..20);
                    tokio::time::sleep(Duration::from_millis(10 * (attempt as u64 + 1) + jitter))
                        .await;
                    last_err = Some(ServiceError::Conflict("event version race".to_string()));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_err.unwrap_or_else(|| ServiceError::internal("event append retries exhausted")))
    }

    /// Events strictly after `since_version`, oldest first.
    pub async fn read(
        &self,
        market: &MarketKey,
        since_version: i64,
        limit: i64,
    ) -> Result<Vec<OrderEvent>, ServiceError> {
        let events = sqlx::query_as::<_, OrderEvent>(
            r#"
            SELECT event_id, milestone_id, option_id, version, kind, order_id, trade_id,
                   payload, server_id, created_at
            FROM order_events
            WHERE milestone_id = $1 AND option_id = $2 AND version > $3
            ORDER BY version ASC
            LIMIT $4
            "#,
        )
        .bind(market.milestone_id)
        .bind(market.option)
        .bind(since_version)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    /// Highest appended version for a market (0 when the log is empty).
    pub async fn last_version(&self, market: &MarketKey) -> Result<i64, ServiceError> {
        let version: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(version) FROM order_events WHERE milestone_id = $1 AND option_id = $2",
        )
        .bind(market.milestone_id)
        .bind(market.option)
        .fetch_one(&self.pool)
        .await?;

        Ok(version.unwrap_or(0))
    }

    /// Long-poll tail: returns as soon as events past `since_version`
    /// exist, or empty after `max_wait`.
    pub async fn tail(
        &self,
        market: &MarketKey,
        since_version: i64,
        limit: i64,
        max_wait: Duration,
    ) -> Result<Vec<OrderEvent>, ServiceError> {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let events = self.read(market, since_version, limit).await?;
            if !events.is_empty() || tokio::time::Instant::now() >= deadline {
                return Ok(events);
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    /// Drop events older than the retention window. A consistent snapshot
    /// (the relational state plus `last_event_version`) always exists, so
    /// age is the only criterion.
    pub async fn sweep_retention(&self, retention_days: i64) -> Result<u64, ServiceError> {
        let result = sqlx::query(
            "DELETE FROM order_events WHERE created_at < NOW() - make_interval(days => $1::int)",
        )
        .bind(retention_days)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            tracing::info!("Event retention sweep removed {} events", result.rows_affected());
        }
        Ok(result.rows_affected())
    }
}
