//! Shared HTTP plumbing for the REST adapters: request throttling, error
//! mapping, signing primitives and lenient JSON field parsing.

use base64::Engine;
use folio_core::ExchangeError;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::{Digest, Sha256, Sha512};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Connection settings shared by every adapter.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    /// Minimum spacing between two requests to the same exchange.
    pub rate_limit: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(15_000),
            rate_limit: Some(Duration::from_millis(100)),
        }
    }
}

impl ClientConfig {
    pub fn from_settings(settings: &folio_core::Settings) -> Self {
        Self {
            timeout: Duration::from_millis(settings.api_connect_timeout_ms),
            rate_limit: settings
                .enable_rate_limit
                .then(|| Duration::from_millis(settings.rate_limit_interval_ms)),
        }
    }
}

/// A throttled JSON-over-HTTP client bound to one exchange's base URL.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    rate_limit: Option<Duration>,
    last_request: Mutex<Option<Instant>>,
}

impl HttpTransport {
    pub fn new(base_url: &str, config: &ClientConfig) -> Result<Self, ExchangeError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ExchangeError::Http(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limit: config.rate_limit,
            last_request: Mutex::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Wait until the configured spacing since the previous request has elapsed.
    async fn throttle(&self) {
        let Some(interval) = self.rate_limit else {
            return;
        };
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Send a request and decode the JSON body.
    ///
    /// `query` must already be encoded (it is usually part of a signature).
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &str,
        headers: HeaderMap,
        body: Option<String>,
    ) -> Result<Value, ExchangeError> {
        self.throttle().await;

        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };
        debug!(%method, %url, "Exchange request");

        let mut request = self.client.request(method, &url).headers(headers);
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let text = response.text().await.map_err(map_reqwest_error)?;

        if !status.is_success() {
            let (code, message) = extract_error(&text)
                .unwrap_or_else(|| (status.as_u16().to_string(), text.clone()));
            return Err(match status.as_u16() {
                401 | 403 => ExchangeError::Auth(message),
                _ => ExchangeError::Api { code, message },
            });
        }

        serde_json::from_str(&text)
            .map_err(|e| ExchangeError::Parse(format!("Invalid JSON from {}: {}", path, e)))
    }

    pub async fn get(&self, path: &str, query: &str, headers: HeaderMap) -> Result<Value, ExchangeError> {
        self.request(Method::GET, path, query, headers, None).await
    }

    /// Unauthenticated GET.
    pub async fn get_public(&self, path: &str, query: &str) -> Result<Value, ExchangeError> {
        self.get(path, query, HeaderMap::new()).await
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ExchangeError {
    if e.is_timeout() {
        ExchangeError::Timeout(e.to_string())
    } else {
        ExchangeError::Http(e.to_string())
    }
}

/// Pull a code/message pair out of an exchange error body.
fn extract_error(text: &str) -> Option<(String, String)> {
    let value: Value = serde_json::from_str(text).ok()?;
    let message = ["msg", "message", "retMsg", "error_description"]
        .iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))?
        .to_string();
    let code = ["code", "retCode", "label"]
        .iter()
        .find_map(|k| value.get(*k))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default();
    Some((code, message))
}

/// Join already-safe key/value pairs into a query string, in order.
pub fn build_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Header map from name/value pairs. Names are case-insensitive; invalid
/// values (e.g. a key pasted with a newline) are rejected as auth errors.
pub fn headers(pairs: &[(&str, &str)]) -> Result<HeaderMap, ExchangeError> {
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        let header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ExchangeError::Auth(format!("Invalid header name {}", name)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ExchangeError::Auth(format!("Invalid characters in header {}", name)))?;
        map.insert(header, value);
    }
    Ok(map)
}

// ---------------------------------------------------------------------------
// Signing
// ---------------------------------------------------------------------------

pub fn hmac_sha256(secret: &str, payload: &str) -> Result<Vec<u8>, ExchangeError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Auth(format!("Invalid secret: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

pub fn hmac_sha256_hex(secret: &str, payload: &str) -> Result<String, ExchangeError> {
    Ok(hex::encode(hmac_sha256(secret, payload)?))
}

pub fn hmac_sha256_base64(secret: &str, payload: &str) -> Result<String, ExchangeError> {
    Ok(base64::engine::general_purpose::STANDARD.encode(hmac_sha256(secret, payload)?))
}

pub fn hmac_sha512_hex(secret: &str, payload: &str) -> Result<String, ExchangeError> {
    let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Auth(format!("Invalid secret: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn sha512_hex(payload: &str) -> String {
    hex::encode(Sha512::digest(payload.as_bytes()))
}

// ---------------------------------------------------------------------------
// Lenient JSON field access
// ---------------------------------------------------------------------------

/// Decimal from a JSON string or number. Empty strings and nulls read as zero.
pub fn decimal(value: &Value) -> Result<Decimal, ExchangeError> {
    match value {
        Value::Null => Ok(Decimal::ZERO),
        Value::String(s) if s.trim().is_empty() => Ok(Decimal::ZERO),
        Value::String(s) => Decimal::from_str(s.trim())
            .or_else(|_| Decimal::from_scientific(s.trim()))
            .map_err(|e| ExchangeError::Parse(format!("Invalid decimal '{}': {}", s, e))),
        Value::Number(n) => {
            let s = n.to_string();
            Decimal::from_str(&s)
                .or_else(|_| Decimal::from_scientific(&s))
                .map_err(|e| ExchangeError::Parse(format!("Invalid decimal '{}': {}", s, e)))
        }
        other => Err(ExchangeError::Parse(format!("Expected decimal, got {}", other))),
    }
}

/// Decimal field of an object; a missing field reads as zero.
pub fn decimal_field(obj: &Value, key: &str) -> Result<Decimal, ExchangeError> {
    obj.get(key).map(decimal).unwrap_or(Ok(Decimal::ZERO))
}

pub fn str_field<'a>(obj: &'a Value, key: &str) -> Result<&'a str, ExchangeError> {
    obj.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ExchangeError::Parse(format!("Missing string field '{}'", key)))
}

/// Integer from a JSON number or numeric string.
pub fn int(value: &Value) -> Result<i64, ExchangeError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| ExchangeError::Parse(format!("Invalid integer {}", n))),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .or_else(|_| s.trim().parse::<f64>().map(|f| f as i64))
            .map_err(|_| ExchangeError::Parse(format!("Invalid integer '{}'", s))),
        other => Err(ExchangeError::Parse(format!("Expected integer, got {}", other))),
    }
}

pub fn int_field(obj: &Value, key: &str) -> Result<i64, ExchangeError> {
    obj.get(key)
        .map(int)
        .unwrap_or_else(|| Err(ExchangeError::Parse(format!("Missing integer field '{}'", key))))
}

/// Array at `key`, or the value itself when `key` is empty.
pub fn array<'a>(value: &'a Value, key: &str) -> Result<&'a Vec<Value>, ExchangeError> {
    let target = if key.is_empty() { Some(value) } else { value.get(key) };
    target
        .and_then(Value::as_array)
        .ok_or_else(|| ExchangeError::Parse(format!("Expected array at '{}'", key)))
}

/// Element `idx` of a positional candle row.
pub fn row_decimal(row: &[Value], idx: usize) -> Result<Decimal, ExchangeError> {
    row.get(idx)
        .map(decimal)
        .unwrap_or_else(|| Err(ExchangeError::Parse(format!("Candle row missing column {}", idx))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_hmac_sha256_known_vector() {
        // RFC 4231 test case 2
        assert_eq!(
            hmac_sha256_hex("Jefe", "what do ya want for nothing?").unwrap(),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_hmac_sha512_known_vector() {
        assert_eq!(
            hmac_sha512_hex("Jefe", "what do ya want for nothing?").unwrap(),
            "164b7a7bfcf819e2e395fbe73b56e0a387bd64222e831fd610270cd7ea2505549758bf75c05a994a6d034f65f8f0e6fdcaeab1a34d4a6b4b636e070a38bce737"
        );
    }

    #[test]
    fn test_sha512_of_empty_body() {
        assert!(sha512_hex("").starts_with("cf83e1357eefb8bdf1542850d66d8007"));
    }

    #[test]
    fn test_base64_signature_shape() {
        let sig = hmac_sha256_base64("secret", "payload").unwrap();
        assert_eq!(sig.len(), 44);
        assert!(sig.ends_with('='));
    }

    #[test]
    fn test_lenient_decimals() {
        assert_eq!(decimal(&json!("0.015")).unwrap(), dec!(0.015));
        assert_eq!(decimal(&json!(42.5)).unwrap(), dec!(42.5));
        assert_eq!(decimal(&json!("")).unwrap(), Decimal::ZERO);
        assert_eq!(decimal(&Value::Null).unwrap(), Decimal::ZERO);
        assert_eq!(decimal(&json!("1e-5")).unwrap(), dec!(0.00001));
        assert!(decimal(&json!("abc")).is_err());
        assert_eq!(decimal_field(&json!({}), "free").unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_int_parsing() {
        assert_eq!(int(&json!(1733529600000i64)).unwrap(), 1733529600000);
        assert_eq!(int(&json!("1733529600")).unwrap(), 1733529600);
        assert!(int_field(&json!({}), "ts").is_err());
    }

    #[test]
    fn test_extract_error_body() {
        let (code, message) = extract_error(r#"{"code":-2015,"msg":"Invalid API-key"}"#).unwrap();
        assert_eq!(code, "-2015");
        assert_eq!(message, "Invalid API-key");
        let (code, _) = extract_error(r#"{"label":"INVALID_KEY","message":"bad"}"#).unwrap();
        assert_eq!(code, "INVALID_KEY");
        assert!(extract_error("<html>").is_none());
    }

    #[test]
    fn test_headers_accept_mixed_case_names() {
        let map = headers(&[("X-MBX-APIKEY", "key"), ("OK-ACCESS-PASSPHRASE", "pass")]).unwrap();
        assert_eq!(map.get("x-mbx-apikey").unwrap(), "key");
        assert!(headers(&[("KEY", "bad\nvalue")]).is_err());
    }

    #[test]
    fn test_build_query_keeps_order() {
        let q = build_query(&[("symbol", "BTCUSDT".into()), ("limit", "5".into())]);
        assert_eq!(q, "symbol=BTCUSDT&limit=5");
    }
}
