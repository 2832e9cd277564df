//! Engine Manager
//!
//! One worker task per owned market, each draining a bounded command queue.
//! The queue is the serialisation unit: everything that mutates a market's
//! book flows through it in submission order. Markets are fully
//! independent; a panic in one worker never contaminates another.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::book::OrderBook;
use super::types::{now_ms, BookOrder, EngineError, MatchResult};
use crate::models::{MarketKey, OrderBookView};

pub enum EngineCommand {
    Submit {
        order: BookOrder,
        respond: oneshot::Sender<Result<MatchResult, EngineError>>,
    },
    Cancel {
        order_id: Uuid,
        respond: oneshot::Sender<Option<BookOrder>>,
    },
    Snapshot {
        depth: usize,
        respond: oneshot::Sender<OrderBookView>,
    },
    SweepExpired {
        respond: oneshot::Sender<Vec<BookOrder>>,
    },
    Freeze {
        respond: oneshot::Sender<Vec<BookOrder>>,
    },
}

struct MarketHandle {
    tx: mpsc::Sender<EngineCommand>,
    frozen: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

pub struct EngineManager {
    markets: DashMap<MarketKey, Arc<MarketHandle>>,
    queue_capacity: usize,
    /// Markets whose worker died on a panic; the supervisor releases their
    /// locks so another instance can take over.
    failure_tx: mpsc::UnboundedSender<MarketKey>,
}

impl EngineManager {
    pub fn new(queue_capacity: usize) -> (Self, mpsc::UnboundedReceiver<MarketKey>) {
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        (
            Self {
                markets: DashMap::new(),
                queue_capacity,
                failure_tx,
            },
            failure_rx,
        )
    }

    pub fn is_open(&self, market: &MarketKey) -> bool {
        self.markets.contains_key(market)
    }

    pub fn open_markets(&self) -> Vec<MarketKey> {
        self.markets.iter().map(|e| *e.key()).collect()
    }

    /// Start serving a market from a pre-built book (recovery output).
    /// No-op if the market is already open on this instance.
    pub fn open_market(&self, book: OrderBook) {
        let market = *book.market();
        if self.markets.contains_key(&market) {
            return;
        }

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let frozen = Arc::new(AtomicBool::new(false));
        let worker = tokio::spawn(run_market_worker(
            book,
            rx,
            frozen.clone(),
            self.failure_tx.clone(),
        ));

        metrics::gauge!("engine_open_markets").increment(1.0);
        self.markets.insert(
            market,
            Arc::new(MarketHandle {
                tx,
                frozen,
                worker: Mutex::new(Some(worker)),
            }),
        );
        tracing::info!("Engine worker started for market {}", market);
    }

    /// Stop serving a market (lock lost or shutdown). In-flight commands
    /// drain before the worker exits.
    pub async fn close_market(&self, market: &MarketKey) {
        if let Some((_, handle)) = self.markets.remove(market) {
            metrics::gauge!("engine_open_markets").decrement(1.0);
            let join = handle.worker.lock().take();
            // Dropping the map's Arc closes the sender once in-flight
            // operations finish; the worker then drains and exits.
            drop(handle);
            if let Some(join) = join {
                let _ = join.await;
            }
            tracing::info!("Engine worker stopped for market {}", market);
        }
    }

    /// Submit an order to its market's serial queue. `TryAgain` surfaces
    /// back-pressure instead of blocking the caller.
    pub async fn submit(
        &self,
        market: &MarketKey,
        order: BookOrder,
    ) -> Result<MatchResult, EngineError> {
        let handle = self.handle(market)?;
        let (respond, rx) = oneshot::channel();

        handle
            .tx
            .try_send(EngineCommand::Submit { order, respond })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => EngineError::QueueFull(market.to_string()),
                mpsc::error::TrySendError::Closed(_) => {
                    EngineError::WorkerGone(market.to_string())
                }
            })?;

        rx.await
            .map_err(|_| EngineError::WorkerGone(market.to_string()))?
    }

    /// Cancel a resting order. `Ok(None)` means it was not resting
    /// (already filled, cancelled, or never on this book).
    pub async fn cancel(
        &self,
        market: &MarketKey,
        order_id: Uuid,
    ) -> Result<Option<BookOrder>, EngineError> {
        let handle = self.handle(market)?;
        let (respond, rx) = oneshot::channel();

        handle
            .tx
            .try_send(EngineCommand::Cancel { order_id, respond })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => EngineError::QueueFull(market.to_string()),
                mpsc::error::TrySendError::Closed(_) => {
                    EngineError::WorkerGone(market.to_string())
                }
            })?;

        rx.await
            .map_err(|_| EngineError::WorkerGone(market.to_string()))
    }

    pub async fn snapshot(
        &self,
        market: &MarketKey,
        depth: usize,
    ) -> Result<OrderBookView, EngineError> {
        let handle = self.handle(market)?;
        let (respond, rx) = oneshot::channel();

        handle
            .tx
            .send(EngineCommand::Snapshot { depth, respond })
            .await
            .map_err(|_| EngineError::WorkerGone(market.to_string()))?;

        rx.await
            .map_err(|_| EngineError::WorkerGone(market.to_string()))
    }

    /// Cancel every expired resting order, returning them for refunds.
    pub async fn sweep_expired(
        &self,
        market: &MarketKey,
    ) -> Result<Vec<BookOrder>, EngineError> {
        let handle = self.handle(market)?;
        let (respond, rx) = oneshot::channel();

        handle
            .tx
            .send(EngineCommand::SweepExpired { respond })
            .await
            .map_err(|_| EngineError::WorkerGone(market.to_string()))?;

        rx.await
            .map_err(|_| EngineError::WorkerGone(market.to_string()))
    }

    /// Irreversibly close a market to new orders and drain its resting
    /// orders. Idempotent: a repeat freeze drains nothing.
    pub async fn freeze(&self, market: &MarketKey) -> Result<Vec<BookOrder>, EngineError> {
        let handle = self.handle(market)?;
        let (respond, rx) = oneshot::channel();

        handle
            .tx
            .send(EngineCommand::Freeze { respond })
            .await
            .map_err(|_| EngineError::WorkerGone(market.to_string()))?;

        rx.await
            .map_err(|_| EngineError::WorkerGone(market.to_string()))
    }

    pub fn is_frozen(&self, market: &MarketKey) -> bool {
        self.markets
            .get(market)
            .map(|h| h.frozen.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Drain all queues and stop all workers.
    pub async fn shutdown(&self) {
        for market in self.open_markets() {
            self.close_market(&market).await;
        }
    }

    fn handle(&self, market: &MarketKey) -> Result<Arc<MarketHandle>, EngineError> {
        self.markets
            .get(market)
            .map(|e| e.value().clone())
            .ok_or_else(|| EngineError::MarketNotOpen(market.to_string()))
    }
}

async fn run_market_worker(
    mut book: OrderBook,
    mut rx: mpsc::Receiver<EngineCommand>,
    frozen: Arc<AtomicBool>,
    failure_tx: mpsc::UnboundedSender<MarketKey>,
) {
    let market = *book.market();

    while let Some(cmd) = rx.recv().await {
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
            handle_command(&mut book, &frozen, &market, cmd)
        }));

        if outcome.is_err() {
            // The book may be inconsistent; stop serving and let the
            // supervisor release the lock so a peer rebuilds from the
            // store and event log.
            metrics::counter!("engine_worker_panics").increment(1);
            tracing::error!("Engine worker for {} panicked, shutting down market", market);
            let _ = failure_tx.send(market);
            return;
        }
    }
}

fn handle_command(
    book: &mut OrderBook,
    frozen: &AtomicBool,
    market: &MarketKey,
    cmd: EngineCommand,
) {
    match cmd {
        EngineCommand::Submit { order, respond } => {
            let result = if frozen.load(Ordering::Acquire) {
                Err(EngineError::MarketFrozen(market.to_string()))
            } else if order.is_expired_at(now_ms()) {
                Err(EngineError::Rejected("order already expired".to_string()))
            } else {
                metrics::counter!("engine_orders_submitted").increment(1);
                let result = book.submit(order);
                metrics::counter!("engine_trades_executed")
                    .increment(result.fills.len() as u64);
                Ok(result)
            };
            let _ = respond.send(result);
        }
        EngineCommand::Cancel { order_id, respond } => {
            let _ = respond.send(book.cancel(order_id));
        }
        EngineCommand::Snapshot { depth, respond } => {
            let _ = respond.send(book.snapshot(depth));
        }
        EngineCommand::SweepExpired { respond } => {
            let _ = respond.send(book.remove_expired(now_ms()));
        }
        EngineCommand::Freeze { respond } => {
            frozen.store(true, Ordering::Release);
            let _ = respond.send(book.drain_all());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderSide, OrderStatus, Outcome};
    use rust_decimal_macros::dec;

    fn order(user_id: i64, side: OrderSide, price: rust_decimal::Decimal, qty: i64) -> BookOrder {
        BookOrder {
            id: Uuid::new_v4(),
            user_id,
            side,
            price,
            quantity: qty,
            remaining: qty,
            created_at_ms: now_ms(),
            expires_at_ms: None,
        }
    }

    #[tokio::test]
    async fn test_submit_through_queue() {
        let market = MarketKey::new(1, Outcome::Success);
        let (manager, _failures) = EngineManager::new(64);
        manager.open_market(OrderBook::new(market));

        manager
            .submit(&market, order(1, OrderSide::Sell, dec!(0.70), 50))
            .await
            .unwrap();
        let result = manager
            .submit(&market, order(2, OrderSide::Buy, dec!(0.75), 30))
            .await
            .unwrap();

        assert_eq!(result.status, OrderStatus::Filled);
        assert_eq!(result.fills.len(), 1);
        assert_eq!(result.fills[0].price, dec!(0.70));
    }

    #[tokio::test]
    async fn test_unknown_market_is_not_open() {
        let (manager, _failures) = EngineManager::new(64);
        let market = MarketKey::new(9, Outcome::Fail);
        let err = manager
            .submit(&market, order(1, OrderSide::Buy, dec!(0.50), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MarketNotOpen(_)));
    }

    #[tokio::test]
    async fn test_freeze_rejects_new_orders_and_drains() {
        let market = MarketKey::new(2, Outcome::Success);
        let (manager, _failures) = EngineManager::new(64);
        manager.open_market(OrderBook::new(market));

        manager
            .submit(&market, order(1, OrderSide::Buy, dec!(0.40), 10))
            .await
            .unwrap();

        let drained = manager.freeze(&market).await.unwrap();
        assert_eq!(drained.len(), 1);
        assert!(manager.is_frozen(&market));

        // Idempotent.
        assert!(manager.freeze(&market).await.unwrap().is_empty());

        let err = manager
            .submit(&market, order(2, OrderSide::Sell, dec!(0.60), 5))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MarketFrozen(_)));
    }

    #[tokio::test]
    async fn test_expired_order_rejected_at_submission() {
        let market = MarketKey::new(3, Outcome::Fail);
        let (manager, _failures) = EngineManager::new(64);
        manager.open_market(OrderBook::new(market));

        let mut stale = order(1, OrderSide::Buy, dec!(0.50), 5);
        stale.expires_at_ms = Some(now_ms() - 1000);

        let err = manager.submit(&market, stale).await.unwrap_err();
        assert!(matches!(err, EngineError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_through_queue() {
        let market = MarketKey::new(4, Outcome::Success);
        let (manager, _failures) = EngineManager::new(64);
        manager.open_market(OrderBook::new(market));

        let o = order(1, OrderSide::Buy, dec!(0.30), 10);
        let id = o.id;
        manager.submit(&market, o).await.unwrap();

        assert!(manager.cancel(&market, id).await.unwrap().is_some());
        assert!(manager.cancel(&market, id).await.unwrap().is_none());
    }
}
