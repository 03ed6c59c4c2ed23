use crate::store::{OrderStore, PositionStore, TradeStore};
use crate::DbError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{Order, Position, Trade};
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use uuid::Uuid;

/// The `DbRepository` provides the PostgreSQL-backed local store. It
/// encapsulates all SQL queries and data access logic.
///
/// Every write is an `INSERT ... ON CONFLICT ... DO UPDATE` on the business
/// key, so delivering the same entity twice leaves one row.
#[derive(Debug, Clone)]
pub struct DbRepository {
    pool: PgPool,
}

/// Database-specific order struct that matches the orders table schema
#[derive(Debug, Clone, FromRow)]
struct DbOrder {
    id: i64,
    order_id: String,
    client_order_id: String,
    symbol: String,
    side: String,
    order_type: String,
    price: Decimal,
    quantity: Decimal,
    executed_qty: Decimal,
    status: String,
    strategy: Option<String>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DbOrder> for Order {
    type Error = DbError;

    fn try_from(row: DbOrder) -> Result<Self, Self::Error> {
        Ok(Order {
            id: Some(row.id),
            order_id: row.order_id,
            client_order_id: row.client_order_id,
            symbol: row.symbol,
            side: row.side.parse()?,
            order_type: row.order_type.parse()?,
            price: row.price,
            quantity: row.quantity,
            executed_qty: row.executed_qty,
            status: row.status.parse()?,
            strategy: row.strategy,
            updated_at: row.updated_at,
        })
    }
}

/// Database-specific trade struct that matches the trades table schema
#[derive(Debug, Clone, FromRow)]
struct DbTrade {
    id: i64,
    trade_id: String,
    order_id: String,
    order_ref: Option<i64>,
    symbol: String,
    side: String,
    price: Decimal,
    quantity: Decimal,
    fee: Decimal,
    fee_asset: String,
    executed_at: DateTime<Utc>,
}

impl TryFrom<DbTrade> for Trade {
    type Error = DbError;

    fn try_from(row: DbTrade) -> Result<Self, Self::Error> {
        Ok(Trade {
            id: Some(row.id),
            trade_id: row.trade_id,
            order_id: row.order_id,
            order_ref: row.order_ref,
            symbol: row.symbol,
            side: row.side.parse()?,
            price: row.price,
            quantity: row.quantity,
            fee: row.fee,
            fee_asset: row.fee_asset,
            executed_at: row.executed_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbPosition {
    position_id: Uuid,
    symbol: String,
    side: String,
    status: String,
    quantity: Decimal,
    entry_price: Decimal,
    realized_pnl: Decimal,
    unrealized_pnl: Decimal,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DbPosition> for Position {
    type Error = DbError;

    fn try_from(row: DbPosition) -> Result<Self, Self::Error> {
        Ok(Position {
            position_id: row.position_id,
            symbol: row.symbol,
            side: row.side.parse()?,
            status: row.status.parse()?,
            quantity: row.quantity,
            entry_price: row.entry_price,
            realized_pnl: row.realized_pnl,
            unrealized_pnl: row.unrealized_pnl,
            updated_at: row.updated_at,
        })
    }
}

const ORDER_COLUMNS: &str = "id, order_id, client_order_id, symbol, side, order_type, price, quantity, executed_qty, status, strategy, updated_at";
const TRADE_COLUMNS: &str = "id, trade_id, order_id, order_ref, symbol, side, price, quantity, fee, fee_asset, executed_at";
const POSITION_COLUMNS: &str = "position_id, symbol, side, status, quantity, entry_price, realized_pnl, unrealized_pnl, updated_at";

impl DbRepository {
    /// Creates a new `DbRepository` with a shared database connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for DbRepository {
    async fn find_order(&self, order_id: &str) -> Result<Option<Order>, DbError> {
        let row = sqlx::query_as::<_, DbOrder>(&format!(
            "SELECT {} FROM orders WHERE order_id = $1",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Order::try_from).transpose()
    }

    async fn upsert_order(&self, order: &Order) -> Result<Order, DbError> {
        let row = sqlx::query_as::<_, DbOrder>(&format!(
            r#"
            INSERT INTO orders (
                order_id, client_order_id, symbol, side, order_type,
                price, quantity, executed_qty, status, strategy, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (order_id) DO UPDATE SET
                client_order_id = EXCLUDED.client_order_id,
                symbol = EXCLUDED.symbol,
                side = EXCLUDED.side,
                order_type = EXCLUDED.order_type,
                price = EXCLUDED.price,
                quantity = EXCLUDED.quantity,
                executed_qty = EXCLUDED.executed_qty,
                status = EXCLUDED.status,
                strategy = COALESCE(EXCLUDED.strategy, orders.strategy),
                updated_at = EXCLUDED.updated_at
            RETURNING {}
            "#,
            ORDER_COLUMNS
        ))
        .bind(&order.order_id)
        .bind(&order.client_order_id)
        .bind(&order.symbol)
        .bind(order.side.as_str())
        .bind(order.order_type.as_str())
        .bind(order.price)
        .bind(order.quantity)
        .bind(order.executed_qty)
        .bind(order.status.as_str())
        .bind(order.strategy.as_deref())
        .bind(order.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Order::try_from(row)
    }
}

#[async_trait]
impl TradeStore for DbRepository {
    async fn find_trade(&self, trade_id: &str) -> Result<Option<Trade>, DbError> {
        let row = sqlx::query_as::<_, DbTrade>(&format!(
            "SELECT {} FROM trades WHERE trade_id = $1",
            TRADE_COLUMNS
        ))
        .bind(trade_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Trade::try_from).transpose()
    }

    async fn upsert_trade(&self, trade: &Trade) -> Result<Trade, DbError> {
        let row = sqlx::query_as::<_, DbTrade>(&format!(
            r#"
            INSERT INTO trades (
                trade_id, order_id, order_ref, symbol, side,
                price, quantity, fee, fee_asset, executed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (trade_id) DO UPDATE SET
                order_id = EXCLUDED.order_id,
                order_ref = COALESCE(trades.order_ref, EXCLUDED.order_ref),
                symbol = EXCLUDED.symbol,
                side = EXCLUDED.side,
                price = EXCLUDED.price,
                quantity = EXCLUDED.quantity,
                fee = EXCLUDED.fee,
                fee_asset = EXCLUDED.fee_asset,
                executed_at = EXCLUDED.executed_at
            RETURNING {}
            "#,
            TRADE_COLUMNS
        ))
        .bind(&trade.trade_id)
        .bind(&trade.order_id)
        .bind(trade.order_ref)
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(trade.price)
        .bind(trade.quantity)
        .bind(trade.fee)
        .bind(&trade.fee_asset)
        .bind(trade.executed_at)
        .fetch_one(&self.pool)
        .await?;

        Trade::try_from(row)
    }
}

#[async_trait]
impl PositionStore for DbRepository {
    async fn find_position(&self, position_id: Uuid) -> Result<Option<Position>, DbError> {
        let row = sqlx::query_as::<_, DbPosition>(&format!(
            "SELECT {} FROM positions WHERE position_id = $1",
            POSITION_COLUMNS
        ))
        .bind(position_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Position::try_from).transpose()
    }

    async fn save_position(&self, position: &Position) -> Result<Position, DbError> {
        let row = sqlx::query_as::<_, DbPosition>(&format!(
            r#"
            INSERT INTO positions (
                position_id, symbol, side, status, quantity,
                entry_price, realized_pnl, unrealized_pnl, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (position_id) DO UPDATE SET
                side = EXCLUDED.side,
                status = EXCLUDED.status,
                quantity = EXCLUDED.quantity,
                entry_price = EXCLUDED.entry_price,
                realized_pnl = EXCLUDED.realized_pnl,
                unrealized_pnl = EXCLUDED.unrealized_pnl,
                updated_at = EXCLUDED.updated_at
            RETURNING {}
            "#,
            POSITION_COLUMNS
        ))
        .bind(position.position_id)
        .bind(&position.symbol)
        .bind(position.side.as_str())
        .bind(position.status.as_str())
        .bind(position.quantity)
        .bind(position.entry_price)
        .bind(position.realized_pnl)
        .bind(position.unrealized_pnl)
        .bind(position.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Position::try_from(row)
    }
}
