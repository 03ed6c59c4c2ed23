use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Exchange rejected the request (code {0}): {1}")]
    Exchange(i64, String),

    #[error("Failed to deserialize the API response: {0}")]
    Deserialization(String),

    #[error("Invalid data format from API: {0}")]
    InvalidData(String),

    #[error("Client configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("No '{gate}' token became available within {waited:?}")]
    Timeout { gate: String, waited: Duration },
}
