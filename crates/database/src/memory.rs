use crate::store::{OrderStore, PositionStore, TradeStore};
use crate::DbError;
use async_trait::async_trait;
use core_types::{Order, Position, Trade};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// An in-process local store with the same upsert semantics as
/// [`DbRepository`](crate::DbRepository).
///
/// Used when no database is configured, and by tests.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    tables: RwLock<Tables>,
    next_id: AtomicI64,
}

#[derive(Debug, Default)]
struct Tables {
    orders: HashMap<String, Order>,
    trades: HashMap<String, Trade>,
    positions: HashMap<Uuid, Position>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }

    pub async fn trade_count(&self) -> usize {
        self.tables.read().await.trades.len()
    }
}

#[async_trait]
impl OrderStore for MemoryRepository {
    async fn find_order(&self, order_id: &str) -> Result<Option<Order>, DbError> {
        Ok(self.tables.read().await.orders.get(order_id).cloned())
    }

    async fn upsert_order(&self, order: &Order) -> Result<Order, DbError> {
        let mut tables = self.tables.write().await;
        let stored = match tables.orders.get(&order.order_id) {
            Some(existing) => Order {
                id: existing.id,
                strategy: order.strategy.clone().or_else(|| existing.strategy.clone()),
                ..order.clone()
            },
            None => Order {
                id: Some(self.allocate_id()),
                ..order.clone()
            },
        };
        tables.orders.insert(stored.order_id.clone(), stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl TradeStore for MemoryRepository {
    async fn find_trade(&self, trade_id: &str) -> Result<Option<Trade>, DbError> {
        Ok(self.tables.read().await.trades.get(trade_id).cloned())
    }

    async fn upsert_trade(&self, trade: &Trade) -> Result<Trade, DbError> {
        let mut tables = self.tables.write().await;
        let stored = match tables.trades.get(&trade.trade_id) {
            Some(existing) => Trade {
                id: existing.id,
                order_ref: existing.order_ref.or(trade.order_ref),
                ..trade.clone()
            },
            None => Trade {
                id: Some(self.allocate_id()),
                ..trade.clone()
            },
        };
        tables.trades.insert(stored.trade_id.clone(), stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl PositionStore for MemoryRepository {
    async fn find_position(&self, position_id: Uuid) -> Result<Option<Position>, DbError> {
        Ok(self.tables.read().await.positions.get(&position_id).cloned())
    }

    async fn save_position(&self, position: &Position) -> Result<Position, DbError> {
        let mut tables = self.tables.write().await;
        tables.positions.insert(position.position_id, position.clone());
        Ok(position.clone())
    }
}
