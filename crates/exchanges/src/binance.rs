//! Binance spot v3 and the MEXC spot v3 API, which mirrors it.

use crate::transport::{self, build_query, headers, ClientConfig, HttpTransport};
use async_trait::async_trait;
use folio_core::*;
use rust_decimal::Decimal;
use serde_json::Value;

const RECV_WINDOW: u64 = 5000;

/// Endpoint details that differ between Binance and MEXC.
#[derive(Debug, Clone)]
pub struct BinanceFlavor {
    pub id: ExchangeId,
    pub base_url: &'static str,
    pub key_header: &'static str,
    /// Largest kline page the venue serves.
    pub max_klines: usize,
}

impl BinanceFlavor {
    pub fn binance() -> Self {
        Self {
            id: ExchangeId::Binance,
            base_url: "https://api.binance.com",
            key_header: "X-MBX-APIKEY",
            max_klines: 1000,
        }
    }

    pub fn mexc() -> Self {
        Self {
            id: ExchangeId::Mexc,
            base_url: "https://api.mexc.com",
            key_header: "X-MEXC-APIKEY",
            max_klines: 1000,
        }
    }

    fn interval(&self, timeframe: Timeframe) -> &'static str {
        match (self.id, timeframe) {
            (ExchangeId::Mexc, Timeframe::H1) => "60m",
            (ExchangeId::Mexc, Timeframe::W1) => "1W",
            (_, tf) => tf.as_str(),
        }
    }
}

pub struct BinanceClient {
    flavor: BinanceFlavor,
    credentials: Credentials,
    transport: HttpTransport,
}

impl BinanceClient {
    pub fn new(
        flavor: BinanceFlavor,
        credentials: Credentials,
        config: &ClientConfig,
    ) -> Result<Self, ExchangeError> {
        let transport = HttpTransport::new(flavor.base_url, config)?;
        Ok(Self {
            flavor,
            credentials,
            transport,
        })
    }

    /// Append timestamp and recvWindow to `params` and sign the resulting query.
    fn signed_query(&self, params: &[(&str, String)], timestamp: i64) -> Result<String, ExchangeError> {
        sign_query(&self.credentials.secret, params, timestamp)
    }

    async fn signed_get(&self, path: &str, params: &[(&str, String)]) -> Result<Value, ExchangeError> {
        let query = self.signed_query(params, now_millis())?;
        let headers = headers(&[(self.flavor.key_header, self.credentials.api_key.as_str())])?;
        self.transport.get(path, &query, headers).await
    }
}

pub(crate) fn sign_query(
    secret: &str,
    params: &[(&str, String)],
    timestamp: i64,
) -> Result<String, ExchangeError> {
    let mut all = params.to_vec();
    all.push(("timestamp", timestamp.to_string()));
    all.push(("recvWindow", RECV_WINDOW.to_string()));
    let query = build_query(&all);
    let signature = transport::hmac_sha256_hex(secret, &query)?;
    Ok(format!("{}&signature={}", query, signature))
}

fn parse_balance(value: &Value) -> Result<RawBalance, ExchangeError> {
    let mut balance = RawBalance::default();
    for entry in transport::array(value, "balances")? {
        let asset = transport::str_field(entry, "asset")?;
        let free = transport::decimal_field(entry, "free")?;
        let locked = transport::decimal_field(entry, "locked")?;
        if free + locked > Decimal::ZERO {
            balance.insert(asset, free, locked);
        }
    }
    Ok(balance)
}

fn parse_klines(value: &Value) -> Result<Vec<Candle>, ExchangeError> {
    transport::array(value, "")?
        .iter()
        .map(|row| {
            let row = row
                .as_array()
                .ok_or_else(|| ExchangeError::Parse("Kline row is not an array".into()))?;
            Ok(Candle {
                timestamp: transport::int(row.first().unwrap_or(&Value::Null))?,
                open: transport::row_decimal(row, 1)?,
                high: transport::row_decimal(row, 2)?,
                low: transport::row_decimal(row, 3)?,
                close: transport::row_decimal(row, 4)?,
                volume: transport::row_decimal(row, 5)?,
            })
        })
        .collect()
}

fn parse_trades(value: &Value) -> Result<Vec<TradeFill>, ExchangeError> {
    transport::array(value, "")?
        .iter()
        .map(|t| {
            let is_buyer = t.get("isBuyer").and_then(Value::as_bool).unwrap_or(false);
            Ok(TradeFill {
                side: if is_buyer { TradeSide::Buy } else { TradeSide::Sell },
                amount: transport::decimal_field(t, "qty")?,
                cost: transport::decimal_field(t, "quoteQty")?,
                timestamp: transport::int_field(t, "time")?,
            })
        })
        .collect()
}

fn parse_quote_symbols(value: &Value) -> Result<Vec<String>, ExchangeError> {
    let mut symbols = Vec::new();
    for s in transport::array(value, "symbols")? {
        let quote = s.get("quoteAsset").and_then(Value::as_str).unwrap_or_default();
        // Binance reports "TRADING"; MEXC reports "1" or "ENABLED".
        let status = match s.get("status") {
            Some(Value::String(status)) => status.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        if quote == folio_core::QUOTE && matches!(status.as_str(), "TRADING" | "1" | "ENABLED") {
            symbols.push(transport::str_field(s, "baseAsset")?.to_string());
        }
    }
    Ok(symbols)
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    fn id(&self) -> ExchangeId {
        self.flavor.id
    }

    async fn fetch_balance(&self) -> Result<RawBalance, ExchangeError> {
        let value = self.signed_get("/api/v3/account", &[]).await?;
        parse_balance(&value)
    }

    async fn fetch_ticker_price(&self, pair: &str) -> Result<Decimal, ExchangeError> {
        let symbol = SymbolMapper::exchange_pair(self.flavor.id, pair);
        let value = self
            .transport
            .get_public("/api/v3/ticker/price", &build_query(&[("symbol", symbol)]))
            .await?;
        transport::decimal_field(&value, "price")
    }

    async fn fetch_ohlcv(
        &self,
        pair: &str,
        timeframe: Timeframe,
        since: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let query = build_query(&[
            ("symbol", SymbolMapper::exchange_pair(self.flavor.id, pair)),
            ("interval", self.flavor.interval(timeframe).to_string()),
            ("startTime", since.to_string()),
            ("limit", limit.min(self.flavor.max_klines).to_string()),
        ]);
        let value = self.transport.get_public("/api/v3/klines", &query).await?;
        parse_klines(&value)
    }

    async fn fetch_my_trades(&self, pair: &str) -> Result<Vec<TradeFill>, ExchangeError> {
        let symbol = SymbolMapper::exchange_pair(self.flavor.id, pair);
        let value = self
            .signed_get("/api/v3/myTrades", &[("symbol", symbol), ("limit", "1000".into())])
            .await?;
        parse_trades(&value)
    }

    async fn fetch_quote_symbols(&self) -> Result<Vec<String>, ExchangeError> {
        let value = self.transport.get_public("/api/v3/exchangeInfo", "").await?;
        parse_quote_symbols(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_signed_query_layout() {
        let query = sign_query("secret", &[("symbol", "BTCUSDT".into())], 1_700_000_000_000).unwrap();
        let (payload, signature) = query.rsplit_once("&signature=").unwrap();
        assert_eq!(payload, "symbol=BTCUSDT&timestamp=1700000000000&recvWindow=5000");
        assert_eq!(signature, transport::hmac_sha256_hex("secret", payload).unwrap());
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn test_parse_balance_skips_empty_assets() {
        let value = json!({
            "balances": [
                {"asset": "BTC", "free": "0.5", "locked": "0.1"},
                {"asset": "ETH", "free": "0.00000000", "locked": "0.00000000"},
                {"asset": "USDT", "free": "100", "locked": "0"}
            ]
        });
        let balance = parse_balance(&value).unwrap();
        assert_eq!(balance.total_of("BTC"), dec!(0.6));
        assert_eq!(balance.used_of("BTC"), dec!(0.1));
        assert!(!balance.total.contains_key("ETH"));
        assert_eq!(balance.free_of("USDT"), dec!(100));
    }

    #[test]
    fn test_parse_klines() {
        let value = json!([
            [1700000000000i64, "100.0", "110.0", "95.0", "105.0", "12.5", 1700086399999i64, "0", 10, "0", "0", "0"],
            [1700086400000i64, "105.0", "120.0", "104.0", "118.0", "8.0", 1700172799999i64, "0", 10, "0", "0", "0"]
        ]);
        let candles = parse_klines(&value).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].timestamp, 1700086400000);
        assert_eq!(candles[1].close, dec!(118.0));
    }

    #[test]
    fn test_parse_trades_sides() {
        let value = json!([
            {"isBuyer": true, "qty": "2", "quoteQty": "200", "time": 1},
            {"isBuyer": false, "qty": "1", "quoteQty": "150", "time": 2}
        ]);
        let trades = parse_trades(&value).unwrap();
        assert_eq!(trades[0].side, TradeSide::Buy);
        assert_eq!(trades[1].side, TradeSide::Sell);
        assert_eq!(trades[1].cost, dec!(150));
    }

    #[test]
    fn test_parse_quote_symbols_both_flavors() {
        let value = json!({
            "symbols": [
                {"baseAsset": "BTC", "quoteAsset": "USDT", "status": "TRADING"},
                {"baseAsset": "ETH", "quoteAsset": "BTC", "status": "TRADING"},
                {"baseAsset": "OLD", "quoteAsset": "USDT", "status": "BREAK"},
                {"baseAsset": "MX", "quoteAsset": "USDT", "status": "1"}
            ]
        });
        assert_eq!(parse_quote_symbols(&value).unwrap(), vec!["BTC", "MX"]);
    }

    #[test]
    fn test_mexc_intervals() {
        let mexc = BinanceFlavor::mexc();
        assert_eq!(mexc.interval(Timeframe::H1), "60m");
        assert_eq!(mexc.interval(Timeframe::D1), "1d");
        assert_eq!(BinanceFlavor::binance().interval(Timeframe::H1), "1h");
    }
}
