use crate::error::DbError;
use async_trait::async_trait;
use core_types::{Order, Position, Trade};
use uuid::Uuid;

/// Local orders, looked up and upserted by exchange order id.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_order(&self, order_id: &str) -> Result<Option<Order>, DbError>;

    /// Creates the order or updates the row with the same order id, returning
    /// the stored form. A stored strategy is never cleared by an update
    /// without one.
    async fn upsert_order(&self, order: &Order) -> Result<Order, DbError>;
}

/// Local trades, looked up and upserted by exchange trade id.
#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn find_trade(&self, trade_id: &str) -> Result<Option<Trade>, DbError>;

    /// Creates the trade or updates the row with the same trade id. An order
    /// reference, once stored, is kept.
    async fn upsert_trade(&self, trade: &Trade) -> Result<Trade, DbError>;
}

/// Strategy-owned positions, keyed by their local id.
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn find_position(&self, position_id: Uuid) -> Result<Option<Position>, DbError>;

    async fn save_position(&self, position: &Position) -> Result<Position, DbError>;
}
