//! Trading Service (Command Side)
//!
//! The write path: validate → reserve funds → persist the order → submit
//! through the market's serial queue → append events (log-first) → settle
//! trades, wallets, and positions transactionally → publish broadcast
//! frames. Every failure surfaces as a `ServiceError`; reservations are
//! rolled back on any path that does not ack the order.

use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::broadcast::BroadcastMessage;
use crate::cache::{CacheManager, MarketLockManager};
use crate::engine::{ms_to_datetime, BookOrder, EngineError, EngineManager, Fill, OrderBook, Replayer};
use crate::error::ServiceError;
use crate::models::{
    side_fee_cents, trade_total_cents, CollateralMode, CreateOrderRequest, EventPayload,
    MarketKey, MilestoneStatus, Order, OrderEventKind, OrderResponse, OrderSide, OrderStatus,
    Trade,
};
use crate::services::events::EventStore;
use crate::services::market_data::MarketDataService;
use crate::services::positions::PositionService;
use crate::services::wallet::WalletService;

/// Depth used for broadcast and cached book views.
const BROADCAST_DEPTH: usize = 20;
const SETTLE_ATTEMPTS: u32 = 3;
const REPLAY_BATCH: i64 = 10_000;

/// What the API returns from POST /orders.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CreateOrderOutcome {
    pub order: OrderResponse,
    pub trades: Vec<Trade>,
}

pub struct TradingService {
    pool: PgPool,
    engine: Arc<EngineManager>,
    events: Arc<EventStore>,
    locks: Arc<MarketLockManager>,
    cache: Arc<CacheManager>,
    market_data: Arc<MarketDataService>,
    positions: PositionService,
    fee_rate: Decimal,
    command_timeout: Duration,
}

impl TradingService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        engine: Arc<EngineManager>,
        events: Arc<EventStore>,
        locks: Arc<MarketLockManager>,
        cache: Arc<CacheManager>,
        market_data: Arc<MarketDataService>,
        fee_rate: Decimal,
        command_timeout: Duration,
    ) -> Self {
        let positions = PositionService::new(pool.clone());
        Self {
            pool,
            engine,
            events,
            locks,
            cache,
            market_data,
            positions,
            fee_rate,
            command_timeout,
        }
    }

    // ========================================================================
    // Create order
    // ========================================================================

    pub async fn create_order(
        &self,
        user_id: i64,
        req: CreateOrderRequest,
    ) -> Result<CreateOrderOutcome, ServiceError> {
        use validator::Validate;
        req.validate()
            .map_err(|e| ServiceError::invalid(format!("invalid order: {e}")))?;

        if let Some(expires_at) = req.expires_at {
            if expires_at <= Utc::now() {
                return Err(ServiceError::invalid("expires_at is in the past"));
            }
        }

        let market = MarketKey::new(req.milestone_id, req.option);
        self.ensure_milestone_tradeable(req.milestone_id).await?;
        self.ensure_market_open(&market).await?;

        if self.engine.is_frozen(&market) {
            return Err(ServiceError::MarketClosed(market.to_string()));
        }

        // Collateral mode: buys lock cash; sells deliver inventory when the
        // full quantity is covered, otherwise lock short collateral.
        let (collateral_mode, required_cents) = match req.side {
            OrderSide::Buy => (
                CollateralMode::Cash,
                Order::buy_lock_cents(req.quantity, req.price),
            ),
            OrderSide::Sell => {
                let long = self.positions.long_quantity(user_id, &market).await?;
                if long >= req.quantity {
                    (CollateralMode::Inventory, 0)
                } else {
                    (
                        CollateralMode::ShortCollateral,
                        Order::short_collateral_cents(req.quantity, req.price),
                    )
                }
            }
        };

        // Reserve funds and write the order row atomically; an
        // insufficient balance leaves no trace.
        let order_id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;
        WalletService::reserve(&mut tx, user_id, required_cents).await?;
        let order = sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders
                (id, user_id, milestone_id, option_id, side, price, quantity,
                 filled, remaining, status, collateral_mode, locked_cents, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $7, 'pending', $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(order_id)
        .bind(user_id)
        .bind(market.milestone_id)
        .bind(market.option)
        .bind(req.side)
        .bind(req.price)
        .bind(req.quantity)
        .bind(collateral_mode)
        .bind(required_cents)
        .bind(req.expires_at)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        // Log-first: the created event precedes matching.
        let created_payload = EventPayload::OrderCreated {
            user_id,
            side: order.side,
            price: order.price,
            quantity: order.quantity,
            created_at_ms: order.created_at.timestamp_millis(),
            expires_at_ms: order.expires_at.map(|at| at.timestamp_millis()),
        };
        if let Err(e) = self
            .events
            .append(
                &market,
                OrderEventKind::Created,
                Some(order_id),
                None,
                &created_payload,
            )
            .await
        {
            self.rollback_order(&market, &order, "event append failed").await;
            return Err(e);
        }

        // Submit through the serial queue under the command deadline.
        let book_order = BookOrder::from(&order);
        let result = match tokio::time::timeout(
            self.command_timeout,
            self.engine.submit(&market, book_order),
        )
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(engine_err)) => {
                self.rollback_order(&market, &order, "engine rejected").await;
                return Err(map_engine_error(engine_err));
            }
            Err(_elapsed) => {
                // Best-effort removal; the order may still be matched by
                // the worker, in which case settlement will notice the
                // cancelled row and compensate.
                let _ = self.engine.cancel(&market, order_id).await;
                self.rollback_order(&market, &order, "command deadline exceeded")
                    .await;
                return Err(ServiceError::Timeout);
            }
        };

        // Log-first for fills too: matched events go to the log before the
        // trade rows. A failure here is critical — this instance can no
        // longer guarantee a consistent record, so it stops acking and
        // gives up the market.
        let mut max_version = 0;
        for fill in &result.fills {
            let payload = EventPayload::OrderMatched {
                taker_order_id: fill.taker_order_id,
                maker_order_id: fill.maker_order_id,
                quantity: fill.quantity,
                price: fill.price,
                total_cents: trade_total_cents(fill.quantity, fill.price),
            };
            match self
                .events
                .append(
                    &market,
                    OrderEventKind::Matched,
                    Some(fill.maker_order_id),
                    Some(fill.trade_id),
                    &payload,
                )
                .await
            {
                Ok(version) => max_version = max_version.max(version),
                Err(e) => {
                    self.abandon_market(&market, "matched event append failed").await;
                    return Err(ServiceError::internal(format!(
                        "event log append failed after match: {e}"
                    )));
                }
            }
        }
        if result.status == OrderStatus::Filled {
            if let Ok(version) = self
                .events
                .append(
                    &market,
                    OrderEventKind::Filled,
                    Some(order_id),
                    None,
                    &EventPayload::OrderFilled,
                )
                .await
            {
                max_version = max_version.max(version);
            }
        }

        // Settle the fills against the store.
        let trades = match self.settle_fills(&market, &result.fills, max_version).await {
            Ok(trades) => trades,
            Err(e) => {
                // The log already holds the matches; mark them compensated
                // rather than deleting history.
                for fill in &result.fills {
                    let _ = self
                        .events
                        .append(
                            &market,
                            OrderEventKind::Cancelled,
                            Some(fill.maker_order_id),
                            Some(fill.trade_id),
                            &EventPayload::OrderCancelled { refund_cents: 0 },
                        )
                        .await;
                }
                return Err(e);
            }
        };

        metrics::counter!("orders_created").increment(1);
        metrics::counter!("trades_settled").increment(trades.len() as u64);

        let updated_order = self.fetch_order(order_id).await?;
        self.publish_post_trade(&market, &updated_order, &trades).await;

        Ok(CreateOrderOutcome {
            order: updated_order.into(),
            trades,
        })
    }

    // ========================================================================
    // Cancel order
    // ========================================================================

    pub async fn cancel_order(&self, user_id: i64, order_id: Uuid) -> Result<Order, ServiceError> {
        let order = self.fetch_order(order_id).await?;
        if order.user_id != user_id {
            return Err(ServiceError::Forbidden(
                "order belongs to another user".to_string(),
            ));
        }

        match order.status {
            // Idempotent: cancelling a cancelled order re-reports it and
            // emits nothing.
            OrderStatus::Cancelled => return Ok(order),
            OrderStatus::Filled | OrderStatus::Expired => {
                return Err(ServiceError::Conflict(format!(
                    "order is already {}",
                    order.status
                )));
            }
            OrderStatus::Pending | OrderStatus::Partial => {}
        }

        let market = MarketKey::new(order.milestone_id, order.option);
        self.ensure_market_open(&market).await?;

        let removed = self.engine.cancel(&market, order_id).await.map_err(map_engine_error)?;
        if removed.is_none() {
            // Not resting: a fill is settling concurrently. Let the caller
            // retry against the post-settlement status.
            return Err(ServiceError::Conflict(
                "order is being matched, retry".to_string(),
            ));
        }

        let refund_cents = order.locked_cents;
        let version = self
            .events
            .append(
                &market,
                OrderEventKind::Cancelled,
                Some(order_id),
                None,
                &EventPayload::OrderCancelled { refund_cents },
            )
            .await?;

        let mut tx = self.pool.begin().await?;
        WalletService::release(&mut tx, order.user_id, refund_cents).await?;
        let cancelled = sqlx::query_as::<_, Order>(
            r#"
            UPDATE orders
            SET status = 'cancelled', locked_cents = 0
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(order_id)
        .fetch_one(&mut *tx)
        .await?;
        MarketDataService::bump_event_version(&mut tx, &market, version).await?;
        tx.commit().await?;

        metrics::counter!("orders_cancelled").increment(1);
        self.publish_book_update(&market).await;
        self.publish(&market, &BroadcastMessage::OrderUpdate {
            order: cancelled.clone().into(),
        })
        .await;

        Ok(cancelled)
    }

    // ========================================================================
    // Freeze (milestone resolution intake)
    // ========================================================================

    /// Close a market permanently: reject new orders, cancel all resting
    /// orders, refund their locks. Idempotent.
    pub async fn freeze_market(&self, market: &MarketKey) -> Result<usize, ServiceError> {
        self.ensure_market_open(market).await?;

        let drained = self.engine.freeze(market).await.map_err(map_engine_error)?;

        let version = self
            .events
            .append(
                market,
                OrderEventKind::Frozen,
                None,
                None,
                &EventPayload::MarketFrozen {
                    cancelled_orders: drained.len(),
                },
            )
            .await?;

        let mut tx = self.pool.begin().await?;
        // Cover rows the engine never saw (e.g. stale rows from a previous
        // holder) as well as the drained ones.
        let open_rows = sqlx::query_as::<_, Order>(
            r#"
            SELECT * FROM orders
            WHERE milestone_id = $1 AND option_id = $2
              AND status IN ('pending', 'partial') AND deleted_at IS NULL
            FOR UPDATE
            "#,
        )
        .bind(market.milestone_id)
        .bind(market.option)
        .fetch_all(&mut *tx)
        .await?;

        for row in &open_rows {
            WalletService::release(&mut tx, row.user_id, row.locked_cents).await?;
            sqlx::query(
                "UPDATE orders SET status = 'cancelled', locked_cents = 0 WHERE id = $1",
            )
            .bind(row.id)
            .execute(&mut *tx)
            .await?;
        }
        MarketDataService::bump_event_version(&mut tx, market, version).await?;
        tx.commit().await?;

        self.cache.market().invalidate_market(market).await;
        self.publish_book_update(market).await;

        tracing::info!(
            "Froze market {} ({} resting orders cancelled)",
            market,
            open_rows.len()
        );
        Ok(open_rows.len())
    }

    // ========================================================================
    // Expiry sweep (the scheduler's half of the order state machine)
    // ========================================================================

    pub async fn sweep_expired(&self) -> Result<usize, ServiceError> {
        let mut swept = 0;
        for market in self.engine.open_markets() {
            let expired = match self.engine.sweep_expired(&market).await {
                Ok(expired) => expired,
                Err(e) => {
                    tracing::warn!("Expiry sweep failed for {}: {}", market, e);
                    continue;
                }
            };

            for book_order in expired {
                if let Err(e) = self.expire_order(&market, &book_order).await {
                    tracing::warn!("Failed to expire order {}: {}", book_order.id, e);
                } else {
                    swept += 1;
                }
            }
        }
        Ok(swept)
    }

    async fn expire_order(
        &self,
        market: &MarketKey,
        book_order: &BookOrder,
    ) -> Result<(), ServiceError> {
        let order = self.fetch_order(book_order.id).await?;
        let version = self
            .events
            .append(
                market,
                OrderEventKind::Cancelled,
                Some(order.id),
                None,
                &EventPayload::OrderCancelled {
                    refund_cents: order.locked_cents,
                },
            )
            .await?;

        let mut tx = self.pool.begin().await?;
        WalletService::release(&mut tx, order.user_id, order.locked_cents).await?;
        sqlx::query("UPDATE orders SET status = 'expired', locked_cents = 0 WHERE id = $1")
            .bind(order.id)
            .execute(&mut *tx)
            .await?;
        MarketDataService::bump_event_version(&mut tx, market, version).await?;
        tx.commit().await?;

        self.publish_book_update(market).await;
        Ok(())
    }

    // ========================================================================
    // Market ownership / recovery
    // ========================================================================

    /// Make this instance the market's writer, recovering the book from
    /// persisted open orders plus an event-log replay.
    pub async fn ensure_market_open(&self, market: &MarketKey) -> Result<(), ServiceError> {
        if self.engine.is_open(market) {
            return Ok(());
        }

        if !self.locks.acquire(market).await? {
            return Err(ServiceError::Conflict(format!(
                "market {market} is owned by another instance"
            )));
        }

        let open_orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT * FROM orders
            WHERE milestone_id = $1 AND option_id = $2
              AND status IN ('pending', 'partial') AND deleted_at IS NULL
            ORDER BY price, created_at, id
            "#,
        )
        .bind(market.milestone_id)
        .bind(market.option)
        .fetch_all(&self.pool)
        .await?;

        let mut book = OrderBook::new(*market);
        book.load(open_orders.iter().map(BookOrder::from).collect());

        // Replay anything the log holds beyond the relational snapshot
        // (appends that never reached settlement before a handover).
        let since = self.market_data.last_event_version(market).await?;
        let mut replayer = Replayer::new(since);
        loop {
            let events = self.events.read(market, replayer.last_applied_version(), REPLAY_BATCH).await?;
            if events.is_empty() {
                break;
            }
            for event in &events {
                replayer.apply(&mut book, event);
            }
        }

        let recovered = book.order_count();
        self.engine.open_market(book);
        tracing::info!(
            "Recovered market {} with {} resting orders (replayed from version {})",
            market,
            recovered,
            since
        );
        Ok(())
    }

    /// Shutdown path: drain every market queue, then release the leases
    /// so peers can take over immediately instead of waiting out the TTL.
    pub async fn drain(&self) {
        self.engine.shutdown().await;
        self.locks.release_all().await;
    }

    /// Give up a market after a critical fault: the peer that next
    /// acquires the lock rebuilds from the store and event log.
    async fn abandon_market(&self, market: &MarketKey, reason: &str) {
        tracing::error!("Abandoning market {}: {}", market, reason);
        self.engine.close_market(market).await;
        if let Err(e) = self.locks.release(market).await {
            tracing::warn!("Failed to release lock for {}: {}", market, e);
        }
    }

    // ========================================================================
    // Settlement
    // ========================================================================

    async fn settle_fills(
        &self,
        market: &MarketKey,
        fills: &[Fill],
        max_version: i64,
    ) -> Result<Vec<Trade>, ServiceError> {
        if fills.is_empty() {
            // Nothing matched; the order rests. Refresh quotes only.
            self.publish_book_update(market).await;
            return Ok(Vec::new());
        }

        let mut last_err = None;
        for attempt in 0..SETTLE_ATTEMPTS {
            match self.try_settle(market, fills, max_version).await {
                Ok(trades) => return Ok(trades),
                Err(e) if e.is_retryable() && attempt < SETTLE_ATTEMPTS - 1 => {
                    let jitter = rand::thread_rng().gen_range(0..50);
                    tokio::time::sleep(Duration::from_millis(
                        25 * (attempt as u64 + 1) + jitter,
                    ))
                    .await;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| ServiceError::internal("settlement retries exhausted")))
    }

    async fn try_settle(
        &self,
        market: &MarketKey,
        fills: &[Fill],
        max_version: i64,
    ) -> Result<Vec<Trade>, ServiceError> {
        let mut tx = self.pool.begin().await?;
        let mut trades = Vec::with_capacity(fills.len());

        for fill in fills {
            let total_cents = trade_total_cents(fill.quantity, fill.price);
            let buyer_fee = side_fee_cents(total_cents, self.fee_rate);
            let seller_fee = side_fee_cents(total_cents, self.fee_rate);
            let created_at = ms_to_datetime(fill.timestamp_ms);

            let trade = sqlx::query_as::<_, Trade>(
                r#"
                INSERT INTO trades
                    (id, milestone_id, option_id, buy_order_id, sell_order_id,
                     buyer_id, seller_id, quantity, price, total_cents,
                     buyer_fee_cents, seller_fee_cents, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ON CONFLICT (id) DO NOTHING
                RETURNING *
                "#,
            )
            .bind(fill.trade_id)
            .bind(market.milestone_id)
            .bind(market.option)
            .bind(fill.buy_order_id)
            .bind(fill.sell_order_id)
            .bind(fill.buyer_id)
            .bind(fill.seller_id)
            .bind(fill.quantity)
            .bind(fill.price)
            .bind(total_cents)
            .bind(buyer_fee)
            .bind(seller_fee)
            .bind(created_at)
            .fetch_optional(&mut *tx)
            .await?;

            // Conflict hit: this trade was already settled (duplicate
            // delivery); skip its side effects.
            let Some(trade) = trade else {
                continue;
            };

            self.settle_party(&mut tx, market, fill, true, total_cents, buyer_fee)
                .await?;
            self.settle_party(&mut tx, market, fill, false, total_cents, seller_fee)
                .await?;

            MarketDataService::record_trade(&mut tx, market, fill.price, fill.quantity, created_at)
                .await?;

            trades.push(trade);
        }

        MarketDataService::bump_event_version(&mut tx, market, max_version).await?;
        tx.commit().await?;

        // Derived history outside the settlement transaction.
        for trade in &trades {
            self.market_data
                .record_history(market, trade.price, trade.quantity, trade.created_at)
                .await;
        }

        Ok(trades)
    }

    /// Settle one side of a fill: order row bookkeeping, wallet flows,
    /// and the position fold.
    async fn settle_party(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        market: &MarketKey,
        fill: &Fill,
        is_buyer: bool,
        total_cents: i64,
        fee_cents: i64,
    ) -> Result<(), ServiceError> {
        let (user_id, order_id, delta) = if is_buyer {
            (fill.buyer_id, fill.buy_order_id, fill.quantity)
        } else {
            (fill.seller_id, fill.sell_order_id, -fill.quantity)
        };

        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(order_id)
            .fetch_one(&mut **tx)
            .await?;

        // Order row: move quantity from remaining to filled and reduce the
        // lock by the slice this fill consumes.
        let lock_consumed = match (is_buyer, order.collateral_mode) {
            (true, _) => Order::buy_lock_cents(fill.quantity, order.price).min(order.locked_cents),
            (false, CollateralMode::ShortCollateral) => {
                Order::short_collateral_cents(fill.quantity, order.price).min(order.locked_cents)
            }
            (false, _) => 0,
        };

        let new_filled = order.filled + fill.quantity;
        let new_remaining = order.remaining - fill.quantity;
        let new_status = if new_remaining == 0 {
            OrderStatus::Filled
        } else {
            OrderStatus::Partial
        };
        let new_locked = order.locked_cents - lock_consumed;

        sqlx::query(
            r#"
            UPDATE orders
            SET filled = $1, remaining = $2, status = $3, locked_cents = $4
            WHERE id = $5
            "#,
        )
        .bind(new_filled)
        .bind(new_remaining)
        .bind(new_status)
        .bind(new_locked)
        .bind(order_id)
        .execute(&mut **tx)
        .await?;

        // Wallet flows.
        if is_buyer {
            // The buyer reserved at its limit; the fill executed at the
            // maker price. Spend the trade total, refund the improvement,
            // net the fee out of the refund.
            let refund = lock_consumed - total_cents;
            WalletService::spend_locked(tx, user_id, lock_consumed, 0).await?;
            let net_credit = refund - fee_cents;
            if net_credit >= 0 {
                WalletService::credit(tx, user_id, net_credit, fee_cents).await?;
            } else {
                // Fee exceeds the price improvement; take the remainder
                // from the available balance, forgiving any shortfall.
                WalletService::credit(tx, user_id, 0, fee_cents).await?;
                let shortfall = -net_credit;
                sqlx::query(
                    r#"
                    UPDATE user_wallets
                    SET usdc_balance_cents = GREATEST(usdc_balance_cents - $1, 0)
                    WHERE user_id = $2
                    "#,
                )
                .bind(shortfall)
                .bind(user_id)
                .execute(&mut **tx)
                .await?;
            }
        } else {
            // Seller receives proceeds net of fee. Short collateral for
            // the filled shares stays locked, backing the short until the
            // position is closed or the milestone resolves.
            let proceeds = (total_cents - fee_cents).max(0);
            WalletService::credit(tx, user_id, proceeds, fee_cents).await?;
        }

        // Position fold; closing shorts releases their collateral.
        let prior_avg: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT avg_price FROM positions
            WHERE user_id = $1 AND milestone_id = $2 AND option_id = $3
            "#,
        )
        .bind(user_id)
        .bind(market.milestone_id)
        .bind(market.option)
        .fetch_optional(&mut **tx)
        .await?;

        let delta_result =
            PositionService::apply_fill(tx, user_id, market, delta, fill.price).await?;

        if delta_result.closed_short_quantity > 0 {
            if let Some(avg) = prior_avg {
                let collateral = Order::short_collateral_cents(
                    delta_result.closed_short_quantity,
                    avg.round_dp(2),
                );
                if collateral > 0 {
                    if let Err(e) = WalletService::release(tx, user_id, collateral).await {
                        // A mixed-mode history can leave less locked than
                        // the nominal collateral; release what exists.
                        tracing::warn!(
                            "Short collateral release clipped for user {}: {}",
                            user_id,
                            e
                        );
                    }
                }
            }
        }

        Ok(())
    }

    async fn rollback_order(&self, market: &MarketKey, order: &Order, reason: &str) {
        tracing::warn!("Rolling back order {}: {}", order.id, reason);

        // Compensate the already-appended created event so a replay does
        // not resurrect the rolled-back order.
        let _ = self
            .events
            .append(
                market,
                OrderEventKind::Cancelled,
                Some(order.id),
                None,
                &EventPayload::OrderCancelled {
                    refund_cents: order.locked_cents,
                },
            )
            .await;

        let result: Result<(), ServiceError> = async {
            let mut tx = self.pool.begin().await?;
            WalletService::release(&mut tx, order.user_id, order.locked_cents).await?;
            sqlx::query(
                "UPDATE orders SET status = 'cancelled', locked_cents = 0 WHERE id = $1 AND status IN ('pending', 'partial')",
            )
            .bind(order.id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            tracing::error!("Rollback of order {} failed: {}", order.id, e);
        }
    }

    // ========================================================================
    // Fan-out
    // ========================================================================

    async fn publish_post_trade(&self, market: &MarketKey, order: &Order, trades: &[Trade]) {
        for trade in trades {
            self.publish(
                market,
                &BroadcastMessage::Trade {
                    trade_id: trade.id,
                    option_id: trade.option,
                    quantity: trade.quantity,
                    price: trade.price,
                    buyer_id: trade.buyer_id,
                    seller_id: trade.seller_id,
                    total_amount: trade.total_cents,
                    timestamp: trade.created_at.timestamp_millis(),
                },
            )
            .await;
        }

        if !trades.is_empty() {
            if let Ok(Some(data)) = self.market_data.get(market).await {
                if data.prev_price != data.last_price {
                    // Price moves are part of the market's event history;
                    // replay ignores them (no book state), consumers don't.
                    let _ = self
                        .events
                        .append(
                            market,
                            OrderEventKind::Priced,
                            None,
                            None,
                            &EventPayload::Priced {
                                old_price: data.prev_price,
                                new_price: data.last_price,
                            },
                        )
                        .await;
                    self.publish(
                        market,
                        &BroadcastMessage::PriceChange {
                            option_id: market.option,
                            old: data.prev_price,
                            new: data.last_price,
                        },
                    )
                    .await;
                }
                self.cache.market().set_market_data(market, &data).await;
                self.publish(market, &BroadcastMessage::MarketUpdate { market: data })
                    .await;
            }
        }

        self.publish_book_update(market).await;
        self.publish(
            market,
            &BroadcastMessage::OrderUpdate {
                order: order.clone().into(),
            },
        )
        .await;
    }

    /// Snapshot the book, refresh caches and quotes, and broadcast the
    /// new depth view.
    async fn publish_book_update(&self, market: &MarketKey) {
        let view = match self.engine.snapshot(market, BROADCAST_DEPTH).await {
            Ok(view) => view,
            Err(e) => {
                tracing::debug!("No book snapshot for {}: {}", market, e);
                return;
            }
        };

        self.cache.market().set_orderbook(market, &view).await;
        if let Err(e) = self.market_data.update_quotes(market, &view).await {
            tracing::warn!("Failed to update quotes for {}: {}", market, e);
        }

        self.publish(
            market,
            &BroadcastMessage::OrderbookUpdate {
                option_id: market.option,
                buy_orders: view.bids,
                sell_orders: view.asks,
            },
        )
        .await;
    }

    async fn publish(&self, market: &MarketKey, message: &BroadcastMessage) {
        if let Err(e) = self.cache.publisher().publish_market(market, message).await {
            tracing::warn!("Broadcast publish failed for {}: {}", market, e);
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn fetch_order(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        let order = sqlx::query_as::<_, Order>(
            "SELECT * FROM orders WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        order.ok_or_else(|| ServiceError::NotFound(format!("order {order_id}")))
    }

    async fn ensure_milestone_tradeable(&self, milestone_id: i64) -> Result<(), ServiceError> {
        let status: Option<MilestoneStatus> =
            sqlx::query_scalar("SELECT status FROM milestones WHERE id = $1")
                .bind(milestone_id)
                .fetch_optional(&self.pool)
                .await?;

        match status {
            None => Err(ServiceError::NotFound(format!("milestone {milestone_id}"))),
            Some(status) if status.is_tradeable() => Ok(()),
            Some(status) => Err(ServiceError::MarketClosed(format!(
                "milestone {milestone_id} is {status}"
            ))),
        }
    }
}

fn map_engine_error(e: EngineError) -> ServiceError {
    match e {
        EngineError::QueueFull(_) => ServiceError::TryAgain,
        EngineError::MarketFrozen(market) => ServiceError::MarketClosed(market),
        EngineError::Rejected(msg) => ServiceError::invalid(msg),
        EngineError::MarketNotOpen(market) => {
            ServiceError::Conflict(format!("market {market} not open on this instance"))
        }
        EngineError::WorkerGone(market) => {
            ServiceError::Conflict(format!("market {market} is restarting"))
        }
    }
}
