use core_types::Interval;
use serde::Deserialize;
use std::path::PathBuf;

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub exchange: ExchangeConfig,
    pub flux: FluxConfig,
    pub backfill: BackfillConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

/// Connection settings for the exchange adapter.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// `true` talks to production, `false` to the testnet.
    pub live_mode: bool,
    /// The identifier under which account snapshots are reported.
    pub account_id: String,
    /// Symbols whose orders and trades are reconciled (e.g. "BTCUSDT").
    pub symbols: Vec<String>,
    pub request_timeout_secs: u64,
    pub api: ApiConfig,
    pub rate_limits: RateLimits,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            live_mode: false,
            account_id: "default".to_string(),
            symbols: Vec::new(),
            request_timeout_secs: 10,
            api: ApiConfig::default(),
            rate_limits: RateLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub production: ApiKeys,
    pub testnet: ApiKeys,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub key: String,
    pub secret: String,
}

/// Minimum spacing between calls per endpoint class, in milliseconds.
/// A missing value leaves the class effectively unthrottled.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RateLimits {
    pub account_ms: Option<u64>,
    pub ticker_ms: Option<u64>,
    pub trade_ms: Option<u64>,
}

/// Tick interval of each reconciliation pipeline, in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FluxConfig {
    pub account_secs: u64,
    pub order_secs: u64,
    pub trade_secs: u64,
    pub position_secs: u64,
}

impl Default for FluxConfig {
    fn default() -> Self {
        Self {
            account_secs: 30,
            order_secs: 10,
            trade_secs: 10,
            position_secs: 5,
        }
    }
}

/// Parameters for historical candle ingestion.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackfillConfig {
    pub interval: Interval,
    /// Maximum number of buckets fetched per page.
    pub backfill_length: i64,
    /// Size of the default range, in buckets, when no range is given.
    pub lookback_buckets: i64,
    /// Attempts per page before the page is given up.
    pub retry_budget: u32,
    /// Pause after every successful page fetch.
    pub page_delay_ms: u64,
    pub output_dir: PathBuf,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            interval: Interval::OneHour,
            backfill_length: 500,
            lookback_buckets: 1_000,
            retry_budget: 3,
            page_delay_ms: 250,
            output_dir: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Falls back to the `DATABASE_URL` environment variable. With neither,
    /// the daemon keeps its records in memory.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// An `EnvFilter` directive; `RUST_LOG` takes precedence when set.
    pub level: String,
    /// When set, logs are also written to a daily-rolling file here.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}
