use crate::transport::{self, build_query, headers, ClientConfig, HttpTransport};
use async_trait::async_trait;
use folio_core::*;
use rust_decimal::Decimal;
use serde_json::Value;

const BASE_URL: &str = "https://api.gateio.ws";
const PREFIX: &str = "/api/v4";
const MAX_CANDLES: usize = 1000;

/// Gate.io v4 spot client.
pub struct GateioClient {
    credentials: Credentials,
    transport: HttpTransport,
}

impl GateioClient {
    pub fn new(credentials: Credentials, config: &ClientConfig) -> Result<Self, ExchangeError> {
        Ok(Self {
            credentials,
            transport: HttpTransport::new(BASE_URL, config)?,
        })
    }

    async fn signed_get(&self, endpoint: &str, query: &str) -> Result<Value, ExchangeError> {
        let path = format!("{}{}", PREFIX, endpoint);
        let timestamp = (now_millis() / 1000).to_string();
        let signature = sign(&self.credentials.secret, "GET", &path, query, "", &timestamp)?;
        let headers = headers(&[
            ("KEY", self.credentials.api_key.as_str()),
            ("Timestamp", timestamp.as_str()),
            ("SIGN", signature.as_str()),
        ])?;
        self.transport.get(&path, query, headers).await
    }

    async fn public_get(&self, endpoint: &str, query: &str) -> Result<Value, ExchangeError> {
        self.transport
            .get_public(&format!("{}{}", PREFIX, endpoint), query)
            .await
    }
}

/// Hex HMAC-SHA512 over `METHOD\npath\nquery\nsha512(body)\ntimestamp`.
pub(crate) fn sign(
    secret: &str,
    method: &str,
    path: &str,
    query: &str,
    body: &str,
    timestamp: &str,
) -> Result<String, ExchangeError> {
    let payload = format!(
        "{}\n{}\n{}\n{}\n{}",
        method,
        path,
        query,
        transport::sha512_hex(body),
        timestamp
    );
    transport::hmac_sha512_hex(secret, &payload)
}

fn interval(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::W1 => "7d",
        tf => tf.as_str(),
    }
}

fn parse_accounts(value: &Value) -> Result<RawBalance, ExchangeError> {
    let mut balance = RawBalance::default();
    for entry in transport::array(value, "")? {
        let currency = transport::str_field(entry, "currency")?;
        let free = transport::decimal_field(entry, "available")?;
        let locked = transport::decimal_field(entry, "locked")?;
        if free + locked > Decimal::ZERO {
            balance.insert(currency, free, locked);
        }
    }
    Ok(balance)
}

/// Rows are `[t (s), quote volume, close, high, low, open, base volume, closed]`.
fn parse_candles(value: &Value) -> Result<Vec<Candle>, ExchangeError> {
    let mut candles = transport::array(value, "")?
        .iter()
        .map(|row| {
            let row = row
                .as_array()
                .ok_or_else(|| ExchangeError::Parse("Candle row is not an array".into()))?;
            Ok(Candle {
                timestamp: transport::int(row.first().unwrap_or(&Value::Null))? * 1000,
                open: transport::row_decimal(row, 5)?,
                high: transport::row_decimal(row, 3)?,
                low: transport::row_decimal(row, 4)?,
                close: transport::row_decimal(row, 2)?,
                volume: row
                    .get(6)
                    .map(transport::decimal)
                    .transpose()?
                    .unwrap_or_default(),
            })
        })
        .collect::<Result<Vec<_>, ExchangeError>>()?;
    candles.sort_by_key(|c| c.timestamp);
    Ok(candles)
}

fn parse_trades(value: &Value) -> Result<Vec<TradeFill>, ExchangeError> {
    transport::array(value, "")?
        .iter()
        .map(|t| {
            let amount = transport::decimal_field(t, "amount")?;
            let price = transport::decimal_field(t, "price")?;
            Ok(TradeFill {
                side: match transport::str_field(t, "side")? {
                    "buy" => TradeSide::Buy,
                    _ => TradeSide::Sell,
                },
                amount,
                cost: amount * price,
                timestamp: transport::int_field(t, "create_time_ms")?,
            })
        })
        .collect()
}

fn parse_pairs(value: &Value) -> Result<Vec<String>, ExchangeError> {
    let mut symbols = Vec::new();
    for pair in transport::array(value, "")? {
        let quote = pair.get("quote").and_then(Value::as_str).unwrap_or_default();
        let status = pair.get("trade_status").and_then(Value::as_str).unwrap_or_default();
        if quote == QUOTE && status == "tradable" {
            symbols.push(transport::str_field(pair, "base")?.to_string());
        }
    }
    Ok(symbols)
}

#[async_trait]
impl ExchangeClient for GateioClient {
    fn id(&self) -> ExchangeId {
        ExchangeId::Gateio
    }

    async fn fetch_balance(&self) -> Result<RawBalance, ExchangeError> {
        let value = self.signed_get("/spot/accounts", "").await?;
        parse_accounts(&value)
    }

    async fn fetch_ticker_price(&self, pair: &str) -> Result<Decimal, ExchangeError> {
        let currency_pair = SymbolMapper::exchange_pair(ExchangeId::Gateio, pair);
        let value = self
            .public_get("/spot/tickers", &build_query(&[("currency_pair", currency_pair)]))
            .await?;
        let ticker = transport::array(&value, "")?
            .first()
            .ok_or_else(|| ExchangeError::Parse(format!("No ticker for {}", pair)))?;
        transport::decimal_field(ticker, "last")
    }

    async fn fetch_ohlcv(
        &self,
        pair: &str,
        timeframe: Timeframe,
        since: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let limit = limit.min(MAX_CANDLES) as i64;
        let from = since / 1000;
        let to = (since + (limit - 1) * timeframe.millis()) / 1000;
        let query = build_query(&[
            ("currency_pair", SymbolMapper::exchange_pair(ExchangeId::Gateio, pair)),
            ("interval", interval(timeframe).to_string()),
            ("from", from.to_string()),
            ("to", to.to_string()),
        ]);
        let value = self.public_get("/spot/candlesticks", &query).await?;
        parse_candles(&value)
    }

    async fn fetch_my_trades(&self, pair: &str) -> Result<Vec<TradeFill>, ExchangeError> {
        let query = build_query(&[
            ("currency_pair", SymbolMapper::exchange_pair(ExchangeId::Gateio, pair)),
            ("limit", "1000".to_string()),
        ]);
        let value = self.signed_get("/spot/my_trades", &query).await?;
        parse_trades(&value)
    }

    async fn fetch_quote_symbols(&self) -> Result<Vec<String>, ExchangeError> {
        let value = self.public_get("/spot/currency_pairs", "").await?;
        parse_pairs(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_sign_payload_lines() {
        let sig = sign("secret", "GET", "/api/v4/spot/accounts", "", "", "1700000000").unwrap();
        let payload = format!(
            "GET\n/api/v4/spot/accounts\n\n{}\n1700000000",
            transport::sha512_hex("")
        );
        assert_eq!(sig, transport::hmac_sha512_hex("secret", &payload).unwrap());
        assert_eq!(sig.len(), 128);
    }

    #[test]
    fn test_parse_accounts() {
        let value = json!([
            {"currency": "GT", "available": "5", "locked": "1"},
            {"currency": "NIL", "available": "0", "locked": "0"}
        ]);
        let balance = parse_accounts(&value).unwrap();
        assert_eq!(balance.total_of("GT"), dec!(6));
        assert!(!balance.total.contains_key("NIL"));
    }

    #[test]
    fn test_candle_column_order() {
        let value = json!([
            ["1700000000", "1000", "10.5", "11", "9", "10", "95.2", "true"]
        ]);
        let candles = parse_candles(&value).unwrap();
        assert_eq!(candles[0].timestamp, 1_700_000_000_000);
        assert_eq!(candles[0].open, dec!(10));
        assert_eq!(candles[0].close, dec!(10.5));
        assert_eq!(candles[0].high, dec!(11));
        assert_eq!(candles[0].low, dec!(9));
        assert_eq!(candles[0].volume, dec!(95.2));
    }

    #[test]
    fn test_trades_and_pairs() {
        let trades = parse_trades(&json!([
            {"side": "sell", "amount": "2", "price": "3", "create_time_ms": "1700000000123.456"}
        ]))
        .unwrap();
        assert_eq!(trades[0].cost, dec!(6));
        assert_eq!(trades[0].timestamp, 1700000000123);

        let pairs = parse_pairs(&json!([
            {"id": "BTC_USDT", "base": "BTC", "quote": "USDT", "trade_status": "tradable"},
            {"id": "ETH_BTC", "base": "ETH", "quote": "BTC", "trade_status": "tradable"},
            {"id": "X_USDT", "base": "X", "quote": "USDT", "trade_status": "untradable"}
        ]))
        .unwrap();
        assert_eq!(pairs, vec!["BTC"]);
    }
}
