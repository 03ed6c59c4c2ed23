use crate::error::ApiError;
use chrono::{DateTime, TimeZone, Utc};
use core_types::{
    AccountPosition, Balance, Candle, OrderSide, OrderStatus, OrderType, Order, Trade,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

// Using `#[serde(rename_all = "camelCase")]` to automatically map from JSON camelCase to Rust snake_case.

/// Client order ids minted by our strategies look like `flux-<strategy>-<nonce>`.
const CLIENT_ID_PREFIX: &str = "flux-";

/// Extracts the owning strategy from a client order id, if it carries one.
pub fn strategy_from_client_id(client_order_id: &str) -> Option<String> {
    let rest = client_order_id.strip_prefix(CLIENT_ID_PREFIX)?;
    let (strategy, nonce) = rest.rsplit_once('-')?;
    if strategy.is_empty() || nonce.is_empty() {
        return None;
    }
    Some(strategy.to_string())
}

fn millis_to_utc(millis: i64) -> Result<DateTime<Utc>, ApiError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| ApiError::InvalidData(format!("Invalid timestamp: {}", millis)))
}

fn parse_decimal(raw: &str) -> Result<Decimal, ApiError> {
    Decimal::from_str(raw).map_err(|e| ApiError::Deserialization(format!("{}: '{}'", e, raw)))
}

/// A single asset's balance from `GET /fapi/v2/balance`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub account_alias: String,
    pub asset: String,
    pub balance: Decimal,
    pub cross_un_pnl: Decimal,
    pub available_balance: Decimal,
}

impl From<BalanceResponse> for Balance {
    fn from(raw: BalanceResponse) -> Self {
        Balance {
            asset: raw.asset,
            wallet_balance: raw.balance,
            available_balance: raw.available_balance,
            unrealized_pnl: raw.cross_un_pnl,
        }
    }
}

/// A single position from `GET /fapi/v2/positionRisk`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionResponse {
    pub symbol: String,
    pub entry_price: Decimal,
    pub position_amt: Decimal,
    pub un_realized_profit: Decimal,
}

impl PositionResponse {
    /// `None` for flat positions, which the exchange reports for every symbol.
    pub fn into_account_position(self) -> Option<AccountPosition> {
        if self.position_amt.is_zero() {
            return None;
        }
        let side = if self.position_amt.is_sign_positive() {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        };
        Some(AccountPosition {
            symbol: self.symbol,
            side,
            quantity: self.position_amt.abs(),
            entry_price: self.entry_price,
            unrealized_pnl: self.un_realized_profit,
        })
    }
}

/// An order from `GET /fapi/v1/allOrders`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: i64,
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub price: Decimal,
    pub orig_qty: Decimal,
    pub executed_qty: Decimal,
    pub status: OrderStatus,
    pub update_time: i64,
}

impl TryFrom<OrderResponse> for Order {
    type Error = ApiError;

    fn try_from(raw: OrderResponse) -> Result<Self, Self::Error> {
        Ok(Order {
            id: None,
            order_id: raw.order_id.to_string(),
            strategy: strategy_from_client_id(&raw.client_order_id),
            client_order_id: raw.client_order_id,
            symbol: raw.symbol,
            side: raw.side,
            order_type: raw.order_type,
            price: raw.price,
            quantity: raw.orig_qty,
            executed_qty: raw.executed_qty,
            status: raw.status,
            updated_at: millis_to_utc(raw.update_time)?,
        })
    }
}

/// A fill from `GET /fapi/v1/userTrades`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTradeResponse {
    pub id: i64,
    pub order_id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub qty: Decimal,
    pub commission: Decimal,
    pub commission_asset: String,
    pub time: i64,
}

impl TryFrom<UserTradeResponse> for Trade {
    type Error = ApiError;

    fn try_from(raw: UserTradeResponse) -> Result<Self, Self::Error> {
        Ok(Trade {
            id: None,
            trade_id: raw.id.to_string(),
            order_id: raw.order_id.to_string(),
            order_ref: None,
            symbol: raw.symbol,
            side: raw.side,
            price: raw.price,
            quantity: raw.qty,
            fee: raw.commission,
            fee_asset: raw.commission_asset,
            executed_at: millis_to_utc(raw.time)?,
        })
    }
}

/// Intermediate struct for deserializing klines from Binance API
#[derive(Debug, Deserialize)]
pub(crate) struct RawKline(
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    i64,
    String,
    String,
    String,
);

impl TryFrom<RawKline> for Candle {
    type Error = ApiError;

    fn try_from(raw: RawKline) -> Result<Self, Self::Error> {
        Ok(Candle {
            open_time: millis_to_utc(raw.0)?,
            open: parse_decimal(&raw.1)?,
            high: parse_decimal(&raw.2)?,
            low: parse_decimal(&raw.3)?,
            close: parse_decimal(&raw.4)?,
            volume: parse_decimal(&raw.5)?,
            quote_volume: parse_decimal(&raw.7)?,
        })
    }
}

/// Represents an error response from the Binance API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub code: i64,
    pub msg: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn strategy_is_read_from_prefixed_client_ids() {
        assert_eq!(strategy_from_client_id("flux-mean-rev-42").as_deref(), Some("mean-rev"));
        assert_eq!(strategy_from_client_id("flux-alpha-1").as_deref(), Some("alpha"));
        assert_eq!(strategy_from_client_id("web_Xk2"), None);
        assert_eq!(strategy_from_client_id("flux-alpha"), None);
        assert_eq!(strategy_from_client_id("flux--1"), None);
    }

    #[test]
    fn order_response_maps_to_order() {
        let raw: OrderResponse = serde_json::from_str(
            r#"{
                "avgPrice": "0.00000", "clientOrderId": "flux-alpha-7", "cumQuote": "0",
                "executedQty": "0.5", "orderId": 1917641, "origQty": "1.0", "origType": "LIMIT",
                "price": "30000.10", "reduceOnly": false, "side": "BUY", "positionSide": "BOTH",
                "status": "PARTIALLY_FILLED", "stopPrice": "0", "closePosition": false,
                "symbol": "BTCUSDT", "time": 1579276756075, "timeInForce": "GTC", "type": "LIMIT",
                "updateTime": 1579276756075, "workingType": "CONTRACT_PRICE", "priceProtect": false
            }"#,
        )
        .unwrap();

        let order = Order::try_from(raw).unwrap();
        assert_eq!(order.order_id, "1917641");
        assert_eq!(order.strategy.as_deref(), Some("alpha"));
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.price, dec!(30000.10));
        assert_eq!(order.quantity, dec!(1.0));
        assert_eq!(order.id, None);
    }

    #[test]
    fn kline_row_maps_to_candle() {
        let raw: RawKline = serde_json::from_str(
            r#"[1499040000000, "0.01634790", "0.80000000", "0.01575800", "0.01577100",
                "148976.11427815", 1499644799999, "2434.19055334", 308, "1756.87402397",
                "28.46694368", "0"]"#,
        )
        .unwrap();

        let candle = Candle::try_from(raw).unwrap();
        assert_eq!(candle.open_time_ms(), 1_499_040_000_000);
        assert_eq!(candle.close, dec!(0.01577100));
        assert_eq!(candle.quote_volume, dec!(2434.19055334));
    }

    #[test]
    fn flat_positions_are_skipped() {
        let flat = PositionResponse {
            symbol: "BTCUSDT".to_string(),
            entry_price: Decimal::ZERO,
            position_amt: Decimal::ZERO,
            un_realized_profit: Decimal::ZERO,
        };
        assert!(flat.into_account_position().is_none());

        let short = PositionResponse {
            symbol: "BTCUSDT".to_string(),
            entry_price: dec!(100),
            position_amt: dec!(-2),
            un_realized_profit: dec!(3),
        };
        let position = short.into_account_position().unwrap();
        assert_eq!(position.side, OrderSide::Sell);
        assert_eq!(position.quantity, dec!(2));
    }
}
