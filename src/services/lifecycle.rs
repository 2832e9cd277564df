//! Milestone Lifecycle Hooks
//!
//! Milestones move `draft → funding → active → resolving → resolved`;
//! trading exists only inside `active`. The exchange does not own the
//! lifecycle — funding verification and resolution happen elsewhere — but
//! it enforces the gates: market init on activation, order rejection
//! outside `active`, and the irreversible freeze when a milestone
//! resolves. Resolution payout itself is an external concern.

use sqlx::PgPool;
use std::sync::Arc;

use crate::error::ServiceError;
use crate::models::{MarketKey, MilestoneStatus, Outcome};
use crate::services::market_data::MarketDataService;
use crate::services::trading::TradingService;

pub struct LifecycleService {
    pool: PgPool,
    trading: Arc<TradingService>,
    market_data: Arc<MarketDataService>,
}

impl LifecycleService {
    pub fn new(
        pool: PgPool,
        trading: Arc<TradingService>,
        market_data: Arc<MarketDataService>,
    ) -> Self {
        Self {
            pool,
            trading,
            market_data,
        }
    }

    pub async fn get_status(&self, milestone_id: i64) -> Result<MilestoneStatus, ServiceError> {
        let status: Option<MilestoneStatus> =
            sqlx::query_scalar("SELECT status FROM milestones WHERE id = $1")
                .bind(milestone_id)
                .fetch_optional(&self.pool)
                .await?;

        status.ok_or_else(|| ServiceError::NotFound(format!("milestone {milestone_id}")))
    }

    /// Lifecycle intake from the milestone service. Transitions are
    /// forward-only; `resolved` freezes both markets.
    pub async fn set_status(
        &self,
        milestone_id: i64,
        status: MilestoneStatus,
        resolved_option: Option<Outcome>,
    ) -> Result<(), ServiceError> {
        let current: Option<MilestoneStatus> =
            sqlx::query_scalar("SELECT status FROM milestones WHERE id = $1")
                .bind(milestone_id)
                .fetch_optional(&self.pool)
                .await?;

        if let Some(current) = current {
            if rank(current) > rank(status) {
                return Err(ServiceError::Conflict(format!(
                    "milestone {milestone_id} cannot move back from {current} to {status}"
                )));
            }
        }

        sqlx::query(
            r#"
            INSERT INTO milestones (id, status, resolved_option, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                resolved_option = EXCLUDED.resolved_option,
                updated_at = NOW()
            "#,
        )
        .bind(milestone_id)
        .bind(status)
        .bind(resolved_option)
        .execute(&self.pool)
        .await?;

        match status {
            MilestoneStatus::Active => {
                // Seed complementary books so the option pair opens at
                // prices summing to 1.0.
                self.market_data.seed_milestone(milestone_id).await?;
                tracing::info!("Milestone {} activated, markets seeded", milestone_id);
            }
            MilestoneStatus::Resolved => {
                self.freeze_milestone(milestone_id).await?;
                tracing::info!("Milestone {} resolved, markets frozen", milestone_id);
            }
            _ => {}
        }

        Ok(())
    }

    /// Freeze one market: idempotent, delegates the engine drain, order
    /// cancellation, and lock refunds to the trading service.
    pub async fn freeze(&self, market: &MarketKey) -> Result<usize, ServiceError> {
        self.trading.freeze_market(market).await
    }

    /// Freeze every market of a milestone (resolution intake).
    pub async fn freeze_milestone(&self, milestone_id: i64) -> Result<(), ServiceError> {
        for option in [Outcome::Success, Outcome::Fail] {
            let market = MarketKey::new(milestone_id, option);
            match self.freeze(&market).await {
                Ok(cancelled) => {
                    tracing::info!("Froze {} ({} orders cancelled)", market, cancelled);
                }
                // Another instance owns the market; it will observe the
                // resolved status and refuse new orders. Rows are still
                // cancelled on our side next sweep.
                Err(ServiceError::Conflict(msg)) => {
                    tracing::warn!("Could not freeze {} locally: {}", market, msg);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Shutdown drain: stop accepting work, flush the per-market queues,
    /// and hand every held lock back to the fleet.
    pub async fn drain(&self) -> Result<(), ServiceError> {
        self.trading.drain().await;
        Ok(())
    }
}

fn rank(status: MilestoneStatus) -> u8 {
    match status {
        MilestoneStatus::Draft => 0,
        MilestoneStatus::Funding => 1,
        MilestoneStatus::Active => 2,
        MilestoneStatus::Resolving => 3,
        MilestoneStatus::Resolved => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_is_forward_only() {
        assert!(rank(MilestoneStatus::Draft) < rank(MilestoneStatus::Funding));
        assert!(rank(MilestoneStatus::Funding) < rank(MilestoneStatus::Active));
        assert!(rank(MilestoneStatus::Active) < rank(MilestoneStatus::Resolving));
        assert!(rank(MilestoneStatus::Resolving) < rank(MilestoneStatus::Resolved));
    }
}
