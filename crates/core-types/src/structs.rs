use crate::enums::{OrderSide, OrderStatus, OrderType, PositionStatus};
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use uuid::Uuid;

/// One asset's balance inside an account snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub wallet_balance: Decimal,
    pub available_balance: Decimal,
    pub unrealized_pnl: Decimal,
}

/// An open position as the exchange reports it on the account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountPosition {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
}

/// A point-in-time view of an exchange account.
///
/// Snapshots are never persisted. Two snapshots are equal when they share the
/// id and name and hold exactly the same balances and open positions, in any
/// order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account_id: String,
    pub name: String,
    pub balances: Vec<Balance>,
    pub positions: Vec<AccountPosition>,
}

impl AccountSnapshot {
    pub fn balance(&self, asset: &str) -> Option<&Balance> {
        self.balances.iter().find(|b| b.asset == asset)
    }
}

fn same_members<T: Eq + Hash>(left: &[T], right: &[T]) -> bool {
    left.len() == right.len()
        && left.iter().collect::<HashSet<_>>() == right.iter().collect::<HashSet<_>>()
}

impl PartialEq for AccountSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.account_id == other.account_id
            && self.name == other.name
            && same_members(&self.balances, &other.balances)
            && same_members(&self.positions, &other.positions)
    }
}

impl Eq for AccountSnapshot {}

/// An exchange order, either as reported by the exchange or as stored locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Local row id; `None` until the order has been persisted.
    pub id: Option<i64>,
    /// Exchange-assigned order id, the business key.
    pub order_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Decimal,
    pub quantity: Decimal,
    pub executed_qty: Decimal,
    pub status: OrderStatus,
    /// The strategy that owns the order. Orders without one have not been
    /// claimed locally yet.
    pub strategy: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Applies the exchange-owned fields of `external` onto this local record.
    ///
    /// The local row id is kept, and so is the local strategy unless the
    /// exchange view names one.
    pub fn merge_external(&self, external: &Order) -> Order {
        Order {
            id: self.id,
            order_id: self.order_id.clone(),
            client_order_id: external.client_order_id.clone(),
            symbol: external.symbol.clone(),
            side: external.side,
            order_type: external.order_type,
            price: external.price,
            quantity: external.quantity,
            executed_qty: external.executed_qty,
            status: external.status,
            strategy: external.strategy.clone().or_else(|| self.strategy.clone()),
            updated_at: external.updated_at,
        }
    }
}

/// A fill reported by the exchange against one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Option<i64>,
    /// Exchange-assigned trade id, the business key.
    pub trade_id: String,
    /// Exchange order id of the owning order.
    pub order_id: String,
    /// Local row id of the owning order, attached on insert.
    pub order_ref: Option<i64>,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Decimal,
    pub fee_asset: String,
    pub executed_at: DateTime<Utc>,
}

impl Trade {
    pub fn merge_external(&self, external: &Trade) -> Trade {
        Trade {
            id: self.id,
            trade_id: self.trade_id.clone(),
            order_id: external.order_id.clone(),
            order_ref: self.order_ref,
            symbol: external.symbol.clone(),
            side: external.side,
            price: external.price,
            quantity: external.quantity,
            fee: external.fee,
            fee_asset: external.fee_asset.clone(),
            executed_at: external.executed_at,
        }
    }
}

/// A locally originated position owned by a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub position_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub status: PositionStatus,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Copies the mutable fields of `update` onto this stored position.
    pub fn merge_update(&self, update: &Position) -> Position {
        Position {
            position_id: self.position_id,
            symbol: self.symbol.clone(),
            side: update.side,
            status: update.status,
            quantity: update.quantity,
            entry_price: update.entry_price,
            realized_pnl: update.realized_pnl,
            unrealized_pnl: update.unrealized_pnl,
            updated_at: update.updated_at,
        }
    }
}

/// One OHLCV bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
}

impl Candle {
    pub fn open_time_ms(&self) -> i64 {
        self.open_time.timestamp_millis()
    }
}

/// A tradable pair, e.g. `BTC/USDT`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub base: String,
    pub quote: String,
}

impl Instrument {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_uppercase(),
            quote: quote.into().to_uppercase(),
        }
    }

    /// The exchange symbol, e.g. `BTCUSDT`.
    pub fn symbol(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for Instrument {
    type Err = CoreError;

    /// Accepts `BTC/USDT` or `BTC-USDT`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(|c| c == '/' || c == '-') {
            Some((base, quote)) if !base.is_empty() && !quote.is_empty() => {
                Ok(Instrument::new(base, quote))
            }
            _ => Err(CoreError::InvalidInput("Instrument".to_string(), s.to_string())),
        }
    }
}

/// A half-open `[start_ms, end_ms)` window of backfill work for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeGap {
    pub symbol: String,
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeGap {
    pub fn new(symbol: impl Into<String>, start_ms: i64, end_ms: i64) -> Self {
        Self {
            symbol: symbol.into(),
            start_ms,
            end_ms,
        }
    }

    pub fn bucket_count(&self, bucket_ms: i64) -> i64 {
        (self.end_ms - self.start_ms) / bucket_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn balance(asset: &str, amount: Decimal) -> Balance {
        Balance {
            asset: asset.to_string(),
            wallet_balance: amount,
            available_balance: amount,
            unrealized_pnl: Decimal::ZERO,
        }
    }

    fn snapshot(balances: Vec<Balance>) -> AccountSnapshot {
        AccountSnapshot {
            account_id: "A".to_string(),
            name: "main".to_string(),
            balances,
            positions: Vec::new(),
        }
    }

    #[test]
    fn snapshot_equality_ignores_balance_order() {
        let left = snapshot(vec![balance("BTC", dec!(1)), balance("USDT", dec!(50))]);
        let right = snapshot(vec![balance("USDT", dec!(50)), balance("BTC", dec!(1))]);
        assert_eq!(left, right);
    }

    #[test]
    fn snapshot_equality_requires_exact_membership() {
        let left = snapshot(vec![balance("BTC", dec!(1))]);
        let changed = snapshot(vec![balance("BTC", dec!(2))]);
        let extra = snapshot(vec![balance("BTC", dec!(1)), balance("ETH", dec!(0))]);
        assert_ne!(left, changed);
        assert_ne!(left, extra);
    }

    #[test]
    fn instrument_parses_both_separators() {
        let slash: Instrument = "btc/usdt".parse().unwrap();
        let dash: Instrument = "BTC-USDT".parse().unwrap();
        assert_eq!(slash, dash);
        assert_eq!(slash.symbol(), "BTCUSDT");
        assert!("BTCUSDT".parse::<Instrument>().is_err());
    }

    #[test]
    fn merge_keeps_local_strategy_when_exchange_has_none() {
        let local = Order {
            id: Some(7),
            order_id: "1".to_string(),
            client_order_id: "flux-alpha-1".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            price: dec!(100),
            quantity: dec!(1),
            executed_qty: dec!(0),
            status: OrderStatus::New,
            strategy: Some("alpha".to_string()),
            updated_at: Utc::now(),
        };
        let external = Order {
            id: None,
            strategy: None,
            status: OrderStatus::Filled,
            executed_qty: dec!(1),
            ..local.clone()
        };

        let merged = local.merge_external(&external);
        assert_eq!(merged.id, Some(7));
        assert_eq!(merged.strategy.as_deref(), Some("alpha"));
        assert_eq!(merged.status, OrderStatus::Filled);
    }
}
