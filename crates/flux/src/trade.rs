use crate::changeset::{DeltaSet, Remembered};
use crate::error::FluxError;
use crate::pipeline::{Detection, Fetch, Flux, Persist};
use api_client::TradeSource;
use async_trait::async_trait;
use core_types::Trade;
use database::{OrderStore, TradeStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// Detects new and changed fills for orders that exist locally.
///
/// Fills whose owning order is unknown are dropped every cycle and counted
/// as orphaned.
pub struct TradeFetch {
    source: Arc<dyn TradeSource>,
    orders: Arc<dyn OrderStore>,
    trades: Arc<dyn TradeStore>,
    orphaned: AtomicU64,
}

impl TradeFetch {
    pub fn new(
        source: Arc<dyn TradeSource>,
        orders: Arc<dyn OrderStore>,
        trades: Arc<dyn TradeStore>,
    ) -> Self {
        Self {
            source,
            orders,
            trades,
            orphaned: AtomicU64::new(0),
        }
    }

    /// Fills dropped so far because their order is not stored locally.
    pub fn orphaned(&self) -> u64 {
        self.orphaned.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Fetch for TradeFetch {
    type Item = Trade;

    // Compared against the local store, so local drift is resynced even when
    // the exchange view has not moved.
    const DETECTION: Detection = Detection::Fetched;

    async fn fetch_current(&self) -> Result<Vec<Trade>, FluxError> {
        let external = self.source.fetch_trades().await?;
        let mut known_orders: HashMap<String, bool> = HashMap::new();
        let mut candidates = Vec::new();

        for trade in external {
            let known = match known_orders.get(&trade.order_id) {
                Some(&known) => known,
                None => {
                    let known = self.orders.find_order(&trade.order_id).await?.is_some();
                    known_orders.insert(trade.order_id.clone(), known);
                    known
                }
            };
            if !known {
                self.orphaned.fetch_add(1, Ordering::Relaxed);
                debug!(trade_id = %trade.trade_id, order_id = %trade.order_id, "Dropping trade for unknown order");
                continue;
            }

            match self.trades.find_trade(&trade.trade_id).await? {
                None => candidates.push(trade),
                Some(local) => {
                    let merged = local.merge_external(&trade);
                    if merged != local {
                        candidates.push(merged);
                    }
                }
            }
        }
        Ok(candidates)
    }
}

/// Upserts fills by trade id, attaching the local order reference.
pub struct TradePersist {
    orders: Arc<dyn OrderStore>,
    trades: Arc<dyn TradeStore>,
}

impl TradePersist {
    pub fn new(orders: Arc<dyn OrderStore>, trades: Arc<dyn TradeStore>) -> Self {
        Self { orders, trades }
    }

    async fn store(&self, mut trade: Trade) -> Result<Option<Trade>, FluxError> {
        if trade.order_ref.is_none() {
            match self.orders.find_order(&trade.order_id).await? {
                Some(order) => trade.order_ref = order.id,
                None => {
                    error!(
                        trade_id = %trade.trade_id,
                        order_id = %trade.order_id,
                        "Owning order vanished before the trade was stored"
                    );
                    return Ok(None);
                }
            }
        }
        Ok(Some(self.trades.upsert_trade(&trade).await?))
    }
}

#[async_trait]
impl Persist for TradePersist {
    type Item = Trade;

    async fn persist(&self, delta: DeltaSet<Trade>) -> Result<DeltaSet<Trade>, FluxError> {
        let mut stored = DeltaSet::new();
        for trade in delta {
            let trade_id = trade.trade_id.clone();
            match self.store(trade).await {
                Ok(Some(canonical)) => stored.insert(canonical),
                Ok(None) => {}
                Err(e) => error!(trade_id = %trade_id, error = %e, "Failed to persist trade"),
            }
        }
        Ok(stored)
    }
}

pub type TradeFlux = Flux<TradeFetch, TradePersist>;

pub fn trade_flux<S>(
    source: Arc<dyn TradeSource>,
    store: Arc<S>,
    remembered: Arc<Remembered<Trade>>,
) -> TradeFlux
where
    S: OrderStore + TradeStore + 'static,
{
    Flux::new(
        "trade",
        TradeFetch::new(source, store.clone(), store.clone()),
        TradePersist::new(store.clone(), store),
        remembered,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::tests::order;
    use api_client::error::ApiError;
    use chrono::{TimeZone, Utc};
    use core_types::OrderSide;
    use database::MemoryRepository;
    use rust_decimal_macros::dec;

    fn trade(trade_id: &str, order_id: &str) -> Trade {
        Trade {
            id: None,
            trade_id: trade_id.to_string(),
            order_id: order_id.to_string(),
            order_ref: None,
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            price: dec!(25000),
            quantity: dec!(0.1),
            fee: dec!(0.5),
            fee_asset: "USDT".to_string(),
            executed_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 5).unwrap(),
        }
    }

    struct FakeTrades(Vec<Trade>);

    #[async_trait]
    impl TradeSource for FakeTrades {
        async fn fetch_trades(&self) -> Result<Vec<Trade>, ApiError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn new_trade_on_local_order_carries_its_reference() {
        let repo = Arc::new(MemoryRepository::new());
        let local = repo.upsert_order(&order("O", Some("S"))).await.unwrap();
        let flux = trade_flux(
            Arc::new(FakeTrades(vec![trade("T", "O")])),
            repo.clone(),
            Arc::new(Remembered::new()),
        );

        let delta = flux.cycle().await.unwrap().into_vec();
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].trade_id, "T");
        assert_eq!(delta[0].order_ref, local.id);
        assert_eq!(repo.trade_count().await, 1);
    }

    #[tokio::test]
    async fn trades_for_unknown_orders_are_dropped_and_counted() {
        let repo = Arc::new(MemoryRepository::new());
        let flux = trade_flux(
            Arc::new(FakeTrades(vec![trade("T1", "missing"), trade("T2", "missing")])),
            repo.clone(),
            Arc::new(Remembered::new()),
        );

        assert!(flux.cycle().await.unwrap().is_empty());
        assert_eq!(flux.fetcher().orphaned(), 2);
        assert_eq!(repo.trade_count().await, 0);
    }

    #[tokio::test]
    async fn redelivered_trade_is_stored_once() {
        let repo = Arc::new(MemoryRepository::new());
        repo.upsert_order(&order("O", Some("S"))).await.unwrap();
        let source = Arc::new(FakeTrades(vec![trade("T", "O")]));

        // Two pipelines with separate remembered state both deliver T.
        for _ in 0..2 {
            let flux = trade_flux(source.clone(), repo.clone(), Arc::new(Remembered::new()));
            flux.cycle().await.unwrap();
        }
        assert_eq!(repo.trade_count().await, 1);
    }

    #[tokio::test]
    async fn persist_drops_trade_whose_order_vanished() {
        let repo = Arc::new(MemoryRepository::new());
        let persist = TradePersist::new(repo.clone(), repo.clone());

        let stored = persist
            .persist(DeltaSet::from_iter([trade("T", "gone")]))
            .await
            .unwrap();
        assert!(stored.is_empty());
        assert_eq!(repo.trade_count().await, 0);
    }

    #[tokio::test]
    async fn trade_is_picked_up_once_its_order_is_stored() {
        let repo = Arc::new(MemoryRepository::new());
        let flux = trade_flux(
            Arc::new(FakeTrades(vec![trade("T", "O")])),
            repo.clone(),
            Arc::new(Remembered::new()),
        );

        assert!(flux.cycle().await.unwrap().is_empty());
        assert_eq!(flux.fetcher().orphaned(), 1);

        let local = repo.upsert_order(&order("O", Some("S"))).await.unwrap();
        let delta = flux.cycle().await.unwrap().into_vec();
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].trade_id, "T");
        assert_eq!(delta[0].order_ref, local.id);
        assert_eq!(flux.fetcher().orphaned(), 1);
        assert_eq!(repo.trade_count().await, 1);
    }

    #[tokio::test]
    async fn locally_edited_fee_is_restored_from_the_exchange() {
        let repo = Arc::new(MemoryRepository::new());
        repo.upsert_order(&order("O", Some("S"))).await.unwrap();
        let flux = trade_flux(
            Arc::new(FakeTrades(vec![trade("T", "O")])),
            repo.clone(),
            Arc::new(Remembered::new()),
        );
        flux.cycle().await.unwrap();

        for _ in 0..2 {
            let mut edited = repo.find_trade("T").await.unwrap().unwrap();
            edited.fee = dec!(9);
            repo.upsert_trade(&edited).await.unwrap();

            assert_eq!(flux.cycle().await.unwrap().len(), 1);
            let local = repo.find_trade("T").await.unwrap().unwrap();
            assert_eq!(local.fee, dec!(0.5));
        }
    }
}
