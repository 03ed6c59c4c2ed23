use crate::error::ApiError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs a query string the way Binance expects for private endpoints:
/// hex-encoded HMAC-SHA256 keyed with the API secret.
pub fn sign_request(secret: &str, query_string: &str) -> Result<String, ApiError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ApiError::Configuration(format!("Unusable API secret: {}", e)))?;
    mac.update(query_string.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
