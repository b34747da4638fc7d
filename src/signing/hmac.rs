use crate::error::{PairbotError, Result};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Coinbase API key credentials
#[derive(Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

impl ApiCredentials {
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self {
            api_key,
            api_secret,
        }
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("COINBASE_API_KEY")
            .map_err(|_| PairbotError::Config(config::ConfigError::NotFound("COINBASE_API_KEY".into())))?;
        let api_secret = std::env::var("COINBASE_API_SECRET")
            .map_err(|_| PairbotError::Config(config::ConfigError::NotFound("COINBASE_API_SECRET".into())))?;

        Ok(Self::new(api_key, api_secret))
    }
}

/// HMAC authentication helper for REST requests and WebSocket subscriptions
#[derive(Clone, Debug)]
pub struct HmacAuth {
    credentials: ApiCredentials,
}

impl HmacAuth {
    pub fn new(credentials: ApiCredentials) -> Self {
        Self { credentials }
    }

    pub fn api_key(&self) -> &str {
        &self.credentials.api_key
    }

    /// Get current timestamp in seconds
    pub fn timestamp() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default()
    }

    /// Hex encoded HMAC-SHA256 signature
    pub fn sign(&self, message: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.credentials.api_secret.as_bytes())
            .map_err(|e| PairbotError::Auth(format!("HMAC init failed: {}", e)))?;

        mac.update(message.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Build the message to sign for a request; `path` excludes the query string
    fn build_message(method: &str, path: &str, timestamp: i64, body: Option<&str>) -> String {
        format!(
            "{}{}{}{}",
            timestamp,
            method.to_uppercase(),
            path,
            body.unwrap_or_default()
        )
    }

    /// Build the message to sign for a WebSocket subscription
    fn build_ws_message(channel: &str, product_ids: &[String], timestamp: i64) -> String {
        format!("{}{}{}", timestamp, channel, product_ids.join(","))
    }

    /// Sign a WebSocket subscription; returns (timestamp, signature)
    pub fn sign_subscription(&self, channel: &str, product_ids: &[String]) -> Result<(String, String)> {
        let timestamp = Self::timestamp();
        let signature = self.sign(&Self::build_ws_message(channel, product_ids, timestamp))?;
        Ok((timestamp.to_string(), signature))
    }

    /// Build authentication headers for a request
    pub fn build_headers(&self, method: &str, path: &str, body: Option<&str>) -> Result<HeaderMap> {
        let timestamp = Self::timestamp();
        let message = Self::build_message(method, path, timestamp, body);
        let signature = self.sign(&message)?;

        tracing::debug!(
            "HMAC signing - timestamp: {}, method: {}, path: {}",
            timestamp,
            method,
            path
        );

        let mut headers = HeaderMap::new();

        headers.insert(
            "CB-ACCESS-KEY",
            HeaderValue::from_str(&self.credentials.api_key)
                .map_err(|e| PairbotError::Auth(format!("Invalid API key header: {}", e)))?,
        );
        headers.insert(
            "CB-ACCESS-SIGN",
            HeaderValue::from_str(&signature)
                .map_err(|e| PairbotError::Auth(format!("Invalid signature header: {}", e)))?,
        );
        headers.insert(
            "CB-ACCESS-TIMESTAMP",
            HeaderValue::from_str(&timestamp.to_string())
                .map_err(|e| PairbotError::Auth(format!("Invalid timestamp header: {}", e)))?,
        );

        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> HmacAuth {
        HmacAuth::new(ApiCredentials::new(
            "test-key".to_string(),
            "test-secret".to_string(),
        ))
    }

    #[test]
    fn test_build_message() {
        let msg = HmacAuth::build_message(
            "post",
            "/api/v3/brokerage/orders",
            1704067200,
            Some(r#"{"test":"data"}"#),
        );
        assert_eq!(msg, r#"1704067200POST/api/v3/brokerage/orders{"test":"data"}"#);

        let msg_no_body = HmacAuth::build_message("GET", "/api/v3/brokerage/accounts", 1704067200, None);
        assert_eq!(msg_no_body, "1704067200GET/api/v3/brokerage/accounts");
    }

    #[test]
    fn test_build_ws_message() {
        let products = vec!["BTC-USD".to_string(), "ETH-USD".to_string()];
        let msg = HmacAuth::build_ws_message("user", &products, 1704067200);
        assert_eq!(msg, "1704067200userBTC-USD,ETH-USD");
    }

    #[test]
    fn test_sign_is_hex_sha256() {
        let sig = auth().sign("test message").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
        // Deterministic for a fixed message
        assert_eq!(sig, auth().sign("test message").unwrap());
    }

    #[test]
    fn test_build_headers() {
        let headers = auth().build_headers("GET", "/api/v3/brokerage/accounts", None).unwrap();
        assert_eq!(headers.get("CB-ACCESS-KEY").unwrap(), "test-key");
        assert!(headers.contains_key("CB-ACCESS-SIGN"));
        assert!(headers.contains_key("CB-ACCESS-TIMESTAMP"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = ApiCredentials::new("k".into(), "super-secret".into());
        assert!(!format!("{:?}", creds).contains("super-secret"));
    }
}
