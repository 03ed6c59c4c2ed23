use crate::error::ConfigError;

// Declare the modules that make up this crate.
pub mod error;
pub mod logging;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use logging::init_tracing;
pub use settings::{
    ApiConfig, ApiKeys, BackfillConfig, Config, DatabaseConfig, ExchangeConfig, FluxConfig,
    LoggingConfig, RateLimits,
};

/// The largest kline page the exchange serves in one request.
pub const MAX_BACKFILL_LENGTH: i64 = 1_500;

/// Prefix of environment variables that override file settings, e.g.
/// `FLUXSYNC__DATABASE__URL`.
const ENV_PREFIX: &str = "FLUXSYNC";

/// Loads the application configuration from `path` (a TOML file, optional)
/// layered with `FLUXSYNC__*` environment variables.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("exchange.symbols"),
        );
    finish(builder)
}

/// Loads configuration from an in-memory TOML document.
pub fn load_config_from_str(toml: &str) -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::from_str(toml, config::FileFormat::Toml));
    finish(builder)
}

fn finish(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> Result<Config, ConfigError> {
    let config = builder.build()?.try_deserialize::<Config>()?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.backfill.backfill_length <= 0 {
        return Err(ConfigError::ValidationError(
            "backfill.backfill_length must be positive".to_string(),
        ));
    }
    if config.backfill.backfill_length > MAX_BACKFILL_LENGTH {
        return Err(ConfigError::ValidationError(format!(
            "backfill.backfill_length must not exceed {}",
            MAX_BACKFILL_LENGTH
        )));
    }
    if config.backfill.lookback_buckets <= 0 {
        return Err(ConfigError::ValidationError(
            "backfill.lookback_buckets must be positive".to_string(),
        ));
    }
    if config.backfill.retry_budget == 0 {
        return Err(ConfigError::ValidationError(
            "backfill.retry_budget must be at least 1".to_string(),
        ));
    }
    let flux = &config.flux;
    if [flux.account_secs, flux.order_secs, flux.trade_secs, flux.position_secs].contains(&0) {
        return Err(ConfigError::ValidationError(
            "flux intervals must be at least one second".to_string(),
        ));
    }
    Ok(())
}
