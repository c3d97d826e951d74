use crate::transport::{self, build_query, headers, ClientConfig, HttpTransport};
use async_trait::async_trait;
use folio_core::*;
use rust_decimal::Decimal;
use serde_json::Value;

const BASE_URL: &str = "https://api.bybit.com";
const RECV_WINDOW: &str = "5000";
const MAX_KLINES: usize = 1000;

/// Bybit v5 client over the unified trading account.
pub struct BybitClient {
    credentials: Credentials,
    transport: HttpTransport,
}

impl BybitClient {
    pub fn new(credentials: Credentials, config: &ClientConfig) -> Result<Self, ExchangeError> {
        Ok(Self {
            credentials,
            transport: HttpTransport::new(BASE_URL, config)?,
        })
    }

    async fn signed_get(&self, path: &str, query: &str) -> Result<Value, ExchangeError> {
        let timestamp = now_millis().to_string();
        let signature = sign(&self.credentials.secret, &timestamp, &self.credentials.api_key, query)?;
        let headers = headers(&[
            ("X-BAPI-API-KEY", self.credentials.api_key.as_str()),
            ("X-BAPI-TIMESTAMP", timestamp.as_str()),
            ("X-BAPI-RECV-WINDOW", RECV_WINDOW),
            ("X-BAPI-SIGN", signature.as_str()),
        ])?;
        unwrap_result(self.transport.get(path, query, headers).await?)
    }

    async fn public_get(&self, path: &str, query: &str) -> Result<Value, ExchangeError> {
        unwrap_result(self.transport.get_public(path, query).await?)
    }
}

/// Hex HMAC-SHA256 over `timestamp + api_key + recv_window + query`.
pub(crate) fn sign(secret: &str, timestamp: &str, api_key: &str, query: &str) -> Result<String, ExchangeError> {
    let payload = format!("{}{}{}{}", timestamp, api_key, RECV_WINDOW, query);
    transport::hmac_sha256_hex(secret, &payload)
}

fn unwrap_result(mut value: Value) -> Result<Value, ExchangeError> {
    let code = value.get("retCode").and_then(Value::as_i64).unwrap_or(0);
    if code != 0 {
        let message = value.get("retMsg").and_then(Value::as_str).unwrap_or_default();
        return Err(ExchangeError::api(code, message));
    }
    Ok(value.get_mut("result").map(Value::take).unwrap_or(Value::Null))
}

fn interval(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::M1 => "1",
        Timeframe::M5 => "5",
        Timeframe::M15 => "15",
        Timeframe::M30 => "30",
        Timeframe::H1 => "60",
        Timeframe::H4 => "240",
        Timeframe::D1 => "D",
        Timeframe::W1 => "W",
    }
}

fn parse_wallet(result: &Value) -> Result<RawBalance, ExchangeError> {
    let mut balance = RawBalance::default();
    for account in transport::array(result, "list")? {
        for coin in transport::array(account, "coin")? {
            let asset = transport::str_field(coin, "coin")?;
            let total = transport::decimal_field(coin, "walletBalance")?;
            let locked = transport::decimal_field(coin, "locked")?;
            if total > Decimal::ZERO {
                balance.insert(asset, total - locked, locked);
            }
        }
    }
    Ok(balance)
}

/// Bybit lists klines newest first.
fn parse_klines(result: &Value) -> Result<Vec<Candle>, ExchangeError> {
    let mut candles = transport::array(result, "list")?
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
        .collect::<Result<Vec<_>, ExchangeError>>()?;
    candles.sort_by_key(|c| c.timestamp);
    Ok(candles)
}

fn parse_executions(result: &Value) -> Result<Vec<TradeFill>, ExchangeError> {
    transport::array(result, "list")?
        .iter()
        .map(|e| {
            let amount = transport::decimal_field(e, "execQty")?;
            let value = transport::decimal_field(e, "execValue")?;
            let cost = if value.is_zero() {
                amount * transport::decimal_field(e, "execPrice")?
            } else {
                value
            };
            Ok(TradeFill {
                side: match transport::str_field(e, "side")? {
                    "Buy" => TradeSide::Buy,
                    _ => TradeSide::Sell,
                },
                amount,
                cost,
                timestamp: transport::int_field(e, "execTime")?,
            })
        })
        .collect()
}

fn parse_instruments(result: &Value) -> Result<Vec<String>, ExchangeError> {
    let mut symbols = Vec::new();
    for inst in transport::array(result, "list")? {
        let quote = inst.get("quoteCoin").and_then(Value::as_str).unwrap_or_default();
        let status = inst.get("status").and_then(Value::as_str).unwrap_or_default();
        if quote == QUOTE && status == "Trading" {
            symbols.push(transport::str_field(inst, "baseCoin")?.to_string());
        }
    }
    Ok(symbols)
}

#[async_trait]
impl ExchangeClient for BybitClient {
    fn id(&self) -> ExchangeId {
        ExchangeId::Bybit
    }

    async fn fetch_balance(&self) -> Result<RawBalance, ExchangeError> {
        let result = self
            .signed_get("/v5/account/wallet-balance", "accountType=UNIFIED")
            .await?;
        parse_wallet(&result)
    }

    async fn fetch_ticker_price(&self, pair: &str) -> Result<Decimal, ExchangeError> {
        let query = build_query(&[
            ("category", "spot".to_string()),
            ("symbol", SymbolMapper::exchange_pair(ExchangeId::Bybit, pair)),
        ]);
        let result = self.public_get("/v5/market/tickers", &query).await?;
        let ticker = transport::array(&result, "list")?
            .first()
            .ok_or_else(|| ExchangeError::Parse(format!("No ticker for {}", pair)))?;
        transport::decimal_field(ticker, "lastPrice")
    }

    async fn fetch_ohlcv(
        &self,
        pair: &str,
        timeframe: Timeframe,
        since: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let limit = limit.min(MAX_KLINES);
        let end = since + limit as i64 * timeframe.millis() - 1;
        let query = build_query(&[
            ("category", "spot".to_string()),
            ("symbol", SymbolMapper::exchange_pair(ExchangeId::Bybit, pair)),
            ("interval", interval(timeframe).to_string()),
            ("start", since.to_string()),
            ("end", end.to_string()),
            ("limit", limit.to_string()),
        ]);
        let result = self.public_get("/v5/market/kline", &query).await?;
        parse_klines(&result)
    }

    async fn fetch_my_trades(&self, pair: &str) -> Result<Vec<TradeFill>, ExchangeError> {
        let query = build_query(&[
            ("category", "spot".to_string()),
            ("symbol", SymbolMapper::exchange_pair(ExchangeId::Bybit, pair)),
            ("limit", "100".to_string()),
        ]);
        let result = self.signed_get("/v5/execution/list", &query).await?;
        parse_executions(&result)
    }

    async fn fetch_quote_symbols(&self) -> Result<Vec<String>, ExchangeError> {
        let result = self
            .public_get("/v5/market/instruments-info", "category=spot")
            .await?;
        parse_instruments(&result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_sign_payload_order() {
        let sig = sign("secret", "1700000000000", "key", "accountType=UNIFIED").unwrap();
        let expected =
            transport::hmac_sha256_hex("secret", "1700000000000key5000accountType=UNIFIED").unwrap();
        assert_eq!(sig, expected);
    }

    #[test]
    fn test_ret_code_error() {
        let err = unwrap_result(json!({"retCode": 10003, "retMsg": "API key is invalid."})).unwrap_err();
        assert!(err.to_string().contains("10003"));
    }

    #[test]
    fn test_parse_wallet_splits_locked() {
        let result = json!({
            "list": [{
                "coin": [
                    {"coin": "BTC", "walletBalance": "2", "locked": "0.5"},
                    {"coin": "XRP", "walletBalance": "0", "locked": "0"},
                    {"coin": "USDT", "walletBalance": "50", "locked": ""}
                ]
            }]
        });
        let balance = parse_wallet(&result).unwrap();
        assert_eq!(balance.free_of("BTC"), dec!(1.5));
        assert_eq!(balance.total_of("BTC"), dec!(2));
        assert_eq!(balance.total_of("USDT"), dec!(50));
        assert!(!balance.total.contains_key("XRP"));
    }

    #[test]
    fn test_parse_executions_falls_back_to_price() {
        let result = json!({
            "list": [
                {"side": "Buy", "execQty": "2", "execValue": "", "execPrice": "10", "execTime": "1"},
                {"side": "Sell", "execQty": "1", "execValue": "12", "execPrice": "12", "execTime": "2"}
            ]
        });
        let fills = parse_executions(&result).unwrap();
        assert_eq!(fills[0].cost, dec!(20));
        assert_eq!(fills[1].side, TradeSide::Sell);
    }

    #[test]
    fn test_klines_reversed() {
        let result = json!({"list": [
            ["200", "1", "1", "1", "3", "1", "1"],
            ["100", "1", "1", "1", "2", "1", "1"]
        ]});
        let candles = parse_klines(&result).unwrap();
        assert_eq!(candles[0].timestamp, 100);
        assert_eq!(candles[1].close, dec!(3));
    }

    #[test]
    fn test_instruments() {
        let result = json!({"list": [
            {"baseCoin": "BTC", "quoteCoin": "USDT", "status": "Trading"},
            {"baseCoin": "ETH", "quoteCoin": "USDT", "status": "Closed"}
        ]});
        assert_eq!(parse_instruments(&result).unwrap(), vec!["BTC"]);
    }
}
