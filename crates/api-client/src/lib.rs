use crate::auth::sign_request;
use crate::error::ApiError;
use crate::responses::RawKline;
use async_trait::async_trait;
use configuration::ExchangeConfig;
use core_types::{AccountSnapshot, Balance, Candle, Interval, Order, Trade};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

mod auth;
pub mod error;
pub mod rate_limiter;
pub mod responses;

// --- Public API ---
pub use error::RateLimitError;
pub use rate_limiter::RateLimiter;
pub use responses::{
    ApiErrorResponse, BalanceResponse, OrderResponse, PositionResponse, UserTradeResponse,
};

/// The exchange's view of the accounts we trade with.
#[async_trait]
pub trait AccountSource: Send + Sync {
    async fn fetch_accounts(&self) -> Result<Vec<AccountSnapshot>, ApiError>;
}

/// Orders as the exchange reports them, including ones no strategy claimed yet.
#[async_trait]
pub trait OrderSource: Send + Sync {
    async fn fetch_orders(&self) -> Result<Vec<Order>, ApiError>;
}

/// Fills as the exchange reports them.
#[async_trait]
pub trait TradeSource: Send + Sync {
    async fn fetch_trades(&self) -> Result<Vec<Trade>, ApiError>;
}

/// Historical candles. Callers keep `[start_ms, end_ms)` within one page.
#[async_trait]
pub trait CandleSource: Send + Sync {
    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: Interval,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>, ApiError>;
}

/// The largest page `/fapi/v1/klines` serves.
const MAX_KLINE_LIMIT: i64 = configuration::MAX_BACKFILL_LENGTH;

/// A concrete implementation of the source traits for Binance USDⓈ-M futures.
///
/// Each endpoint class goes through its own [`RateLimiter`]: account
/// endpoints, the kline (ticker) endpoint, and the order/trade endpoints.
pub struct BinanceClient {
    client: reqwest::Client,
    base_url: String,
    api_secret: String,
    account_id: String,
    symbols: Vec<String>,
    /// Upper bound on waiting for a rate-limit token.
    token_wait: Duration,
    account_gate: RateLimiter,
    ticker_gate: RateLimiter,
    trade_gate: RateLimiter,
}

impl BinanceClient {
    pub fn new(config: &ExchangeConfig) -> Result<Self, ApiError> {
        let (base_url, keys) = if config.live_mode {
            ("https://fapi.binance.com".to_string(), &config.api.production)
        } else {
            (
                "https://testnet.binancefuture.com".to_string(),
                &config.api.testnet,
            )
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            "X-MBX-APIKEY",
            HeaderValue::from_str(&keys.key)
                .map_err(|e| ApiError::Configuration(format!("Invalid API key: {}", e)))?,
        );
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let limits = &config.rate_limits;
        Ok(Self {
            client,
            base_url,
            api_secret: keys.secret.clone(),
            account_id: config.account_id.clone(),
            symbols: config.symbols.clone(),
            token_wait: Duration::from_secs(config.request_timeout_secs),
            account_gate: RateLimiter::from_millis("account", limits.account_ms),
            ticker_gate: RateLimiter::from_millis("ticker", limits.ticker_ms),
            trade_gate: RateLimiter::from_millis("trade", limits.trade_ms),
        })
    }

    async fn get_signed<T: DeserializeOwned>(
        &self,
        gate: &RateLimiter,
        path: &str,
        mut params: BTreeMap<&str, String>,
    ) -> Result<T, ApiError> {
        // Wait before stamping, so a long queue cannot push the request out of `recvWindow`.
        gate.acquire_within(self.token_wait).await?;
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ApiError::Configuration(format!("System clock before epoch: {}", e)))?
            .as_millis();
        params.insert("timestamp", timestamp.to_string());

        let query_string = serde_qs::to_string(&params)
            .map_err(|e| ApiError::InvalidData(format!("Failed to encode query: {}", e)))?;
        let signature = sign_request(&self.api_secret, &query_string)?;
        let url = format!(
            "{}{}?{}&signature={}",
            self.base_url, path, query_string, signature
        );

        let response = self.client.get(&url).send().await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str::<T>(&text).map_err(|e| ApiError::Deserialization(e.to_string()))
        } else {
            let api_error: ApiErrorResponse = serde_json::from_str(&text).map_err(|e| {
                ApiError::Deserialization(format!(
                    "Failed to deserialize error response: {}. Original text: {}",
                    e, text
                ))
            })?;
            Err(ApiError::Exchange(api_error.code, api_error.msg))
        }
    }

    fn symbol_params(symbol: &str) -> BTreeMap<&'static str, String> {
        BTreeMap::from([("symbol", symbol.to_string())])
    }
}

#[async_trait]
impl AccountSource for BinanceClient {
    async fn fetch_accounts(&self) -> Result<Vec<AccountSnapshot>, ApiError> {
        let (balances, positions) = tokio::join!(
            self.get_signed::<Vec<BalanceResponse>>(
                &self.account_gate,
                "/fapi/v2/balance",
                BTreeMap::new()
            ),
            self.get_signed::<Vec<PositionResponse>>(
                &self.account_gate,
                "/fapi/v2/positionRisk",
                BTreeMap::new()
            )
        );
        let balances = balances?;
        let positions = positions?;

        let name = balances
            .first()
            .map(|b| b.account_alias.clone())
            .unwrap_or_else(|| self.account_id.clone());

        Ok(vec![AccountSnapshot {
            account_id: self.account_id.clone(),
            name,
            balances: balances.into_iter().map(Balance::from).collect(),
            positions: positions
                .into_iter()
                .filter_map(PositionResponse::into_account_position)
                .collect(),
        }])
    }
}

#[async_trait]
impl OrderSource for BinanceClient {
    async fn fetch_orders(&self) -> Result<Vec<Order>, ApiError> {
        let mut orders = Vec::new();
        for symbol in &self.symbols {
            let raw: Vec<OrderResponse> = self
                .get_signed(&self.trade_gate, "/fapi/v1/allOrders", Self::symbol_params(symbol))
                .await?;
            for order in raw {
                orders.push(Order::try_from(order)?);
            }
        }
        Ok(orders)
    }
}

#[async_trait]
impl TradeSource for BinanceClient {
    async fn fetch_trades(&self) -> Result<Vec<Trade>, ApiError> {
        let mut trades = Vec::new();
        for symbol in &self.symbols {
            let raw: Vec<UserTradeResponse> = self
                .get_signed(&self.trade_gate, "/fapi/v1/userTrades", Self::symbol_params(symbol))
                .await?;
            for trade in raw {
                trades.push(Trade::try_from(trade)?);
            }
        }
        Ok(trades)
    }
}

#[async_trait]
impl CandleSource for BinanceClient {
    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: Interval,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>, ApiError> {
        let url = format!("{}/fapi/v1/klines", self.base_url);
        let limit = ((end_ms - start_ms) / interval.as_millis()).clamp(1, MAX_KLINE_LIMIT);

        self.ticker_gate.acquire_within(self.token_wait).await?;
        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol.to_string()),
                ("interval", interval.to_string()),
                ("startTime", start_ms.to_string()),
                // `endTime` is inclusive on the exchange side.
                ("endTime", (end_ms - 1).to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;

        let raw: Vec<RawKline> = Self::decode(response).await?;
        raw.into_iter().map(Candle::try_from).collect()
    }
}
