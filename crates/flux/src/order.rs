use crate::changeset::{DeltaSet, Remembered};
use crate::error::FluxError;
use crate::pipeline::{Detection, Fetch, Flux, Persist};
use api_client::OrderSource;
use async_trait::async_trait;
use core_types::Order;
use database::OrderStore;
use std::sync::Arc;
use tracing::{debug, error};

/// Detects new and changed orders by comparing the exchange view with the
/// local store.
///
/// - Unknown locally and owned by a strategy: new.
/// - Unknown locally without a strategy: skipped until one claims it.
/// - Known locally: the merged record is a candidate only if merging changed it.
pub struct OrderFetch {
    source: Arc<dyn OrderSource>,
    store: Arc<dyn OrderStore>,
}

impl OrderFetch {
    pub fn new(source: Arc<dyn OrderSource>, store: Arc<dyn OrderStore>) -> Self {
        Self { source, store }
    }
}

#[async_trait]
impl Fetch for OrderFetch {
    type Item = Order;

    // Compared against the local store, so local drift is resynced even when
    // the exchange view has not moved.
    const DETECTION: Detection = Detection::Fetched;

    async fn fetch_current(&self) -> Result<Vec<Order>, FluxError> {
        let external = self.source.fetch_orders().await?;
        let mut candidates = Vec::new();

        for order in external {
            match self.store.find_order(&order.order_id).await? {
                None if order.strategy.is_some() => candidates.push(order),
                None => {
                    debug!(order_id = %order.order_id, "Skipping order without a strategy");
                }
                Some(local) => {
                    let merged = local.merge_external(&order);
                    if merged != local {
                        candidates.push(merged);
                    }
                }
            }
        }
        Ok(candidates)
    }
}

/// Upserts orders by exchange order id.
pub struct OrderPersist {
    store: Arc<dyn OrderStore>,
}

impl OrderPersist {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Persist for OrderPersist {
    type Item = Order;

    async fn persist(&self, delta: DeltaSet<Order>) -> Result<DeltaSet<Order>, FluxError> {
        let mut stored = DeltaSet::new();
        for order in delta {
            match self.store.upsert_order(&order).await {
                Ok(canonical) => stored.insert(canonical),
                Err(e) => {
                    error!(order_id = %order.order_id, error = %e, "Failed to persist order");
                }
            }
        }
        Ok(stored)
    }
}

pub type OrderFlux = Flux<OrderFetch, OrderPersist>;

pub fn order_flux(
    source: Arc<dyn OrderSource>,
    store: Arc<dyn OrderStore>,
    remembered: Arc<Remembered<Order>>,
) -> OrderFlux {
    Flux::new(
        "order",
        OrderFetch::new(source, Arc::clone(&store)),
        OrderPersist::new(store),
        remembered,
    )
}
