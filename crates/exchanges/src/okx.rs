use crate::transport::{self, build_query, headers, ClientConfig, HttpTransport};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use folio_core::*;
use rust_decimal::Decimal;
use serde_json::Value;

const BASE_URL: &str = "https://www.okx.com";
/// Page size of the candle endpoints.
const CANDLE_PAGE: usize = 100;

/// OKX v5 REST client. Balances combine the trading and funding accounts.
pub struct OkxClient {
    credentials: Credentials,
    transport: HttpTransport,
}

impl OkxClient {
    pub fn new(credentials: Credentials, config: &ClientConfig) -> Result<Self, ExchangeError> {
        Ok(Self {
            credentials,
            transport: HttpTransport::new(BASE_URL, config)?,
        })
    }

    async fn signed_get(&self, path: &str, query: &str) -> Result<Value, ExchangeError> {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let request_path = if query.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, query)
        };
        let signature = sign(&self.credentials.secret, &timestamp, "GET", &request_path, "")?;
        let passphrase = self.credentials.password.as_deref().unwrap_or_default();
        let headers = headers(&[
            ("OK-ACCESS-KEY", self.credentials.api_key.as_str()),
            ("OK-ACCESS-SIGN", signature.as_str()),
            ("OK-ACCESS-TIMESTAMP", timestamp.as_str()),
            ("OK-ACCESS-PASSPHRASE", passphrase),
        ])?;
        let value = self.transport.get(path, query, headers).await?;
        unwrap_data(value)
    }

    async fn public_get(&self, path: &str, query: &str) -> Result<Value, ExchangeError> {
        unwrap_data(self.transport.get_public(path, query).await?)
    }
}

/// Base64 HMAC-SHA256 over `timestamp + method + requestPath + body`.
pub(crate) fn sign(
    secret: &str,
    timestamp: &str,
    method: &str,
    request_path: &str,
    body: &str,
) -> Result<String, ExchangeError> {
    let payload = format!("{}{}{}{}", timestamp, method, request_path, body);
    transport::hmac_sha256_base64(secret, &payload)
}

/// Check the `{"code": "0", "data": [...]}` envelope and return `data`.
fn unwrap_data(mut value: Value) -> Result<Value, ExchangeError> {
    let code = value.get("code").and_then(Value::as_str).unwrap_or("0");
    if code != "0" {
        let message = value.get("msg").and_then(Value::as_str).unwrap_or_default();
        return Err(ExchangeError::api(code, message));
    }
    Ok(value.get_mut("data").map(Value::take).unwrap_or(Value::Null))
}

fn bar(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::M1 => "1m",
        Timeframe::M5 => "5m",
        Timeframe::M15 => "15m",
        Timeframe::M30 => "30m",
        Timeframe::H1 => "1H",
        Timeframe::H4 => "4H",
        Timeframe::D1 => "1Dutc",
        Timeframe::W1 => "1Wutc",
    }
}

fn parse_trading_balance(data: &Value) -> Result<RawBalance, ExchangeError> {
    let mut balance = RawBalance::default();
    for account in transport::array(data, "")? {
        for detail in transport::array(account, "details")? {
            let ccy = transport::str_field(detail, "ccy")?;
            let free = transport::decimal_field(detail, "availBal")?;
            let used = transport::decimal_field(detail, "frozenBal")?;
            if free + used > Decimal::ZERO {
                balance.insert(ccy, free, used);
            }
        }
    }
    Ok(balance)
}

fn parse_funding_balance(data: &Value) -> Result<RawBalance, ExchangeError> {
    let mut balance = RawBalance::default();
    for entry in transport::array(data, "")? {
        let ccy = transport::str_field(entry, "ccy")?;
        let free = transport::decimal_field(entry, "availBal")?;
        let used = transport::decimal_field(entry, "frozenBal")?;
        if free + used > Decimal::ZERO {
            balance.insert(ccy, free, used);
        }
    }
    Ok(balance)
}

/// OKX returns candles newest first; the result is oldest first.
fn parse_candles(data: &Value) -> Result<Vec<Candle>, ExchangeError> {
    let mut candles = transport::array(data, "")?
        .iter()
        .map(|row| {
            let row = row
                .as_array()
                .ok_or_else(|| ExchangeError::Parse("Candle row is not an array".into()))?;
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

fn parse_fills(data: &Value) -> Result<Vec<TradeFill>, ExchangeError> {
    transport::array(data, "")?
        .iter()
        .map(|f| {
            let amount = transport::decimal_field(f, "fillSz")?;
            let price = transport::decimal_field(f, "fillPx")?;
            Ok(TradeFill {
                side: match transport::str_field(f, "side")? {
                    "buy" => TradeSide::Buy,
                    _ => TradeSide::Sell,
                },
                amount,
                cost: amount * price,
                timestamp: transport::int_field(f, "ts")?,
            })
        })
        .collect()
}

fn parse_instruments(data: &Value) -> Result<Vec<String>, ExchangeError> {
    let mut symbols = Vec::new();
    for inst in transport::array(data, "")? {
        let quote = inst.get("quoteCcy").and_then(Value::as_str).unwrap_or_default();
        let state = inst.get("state").and_then(Value::as_str).unwrap_or_default();
        if quote == QUOTE && state == "live" {
            symbols.push(transport::str_field(inst, "baseCcy")?.to_string());
        }
    }
    Ok(symbols)
}

#[async_trait]
impl ExchangeClient for OkxClient {
    fn id(&self) -> ExchangeId {
        ExchangeId::Okx
    }

    async fn fetch_balance(&self) -> Result<RawBalance, ExchangeError> {
        let trading = self.signed_get("/api/v5/account/balance", "").await?;
        let funding = self.signed_get("/api/v5/asset/balances", "").await?;
        let mut balance = parse_trading_balance(&trading)?;
        balance.merge(&parse_funding_balance(&funding)?);
        Ok(balance)
    }

    async fn fetch_ticker_price(&self, pair: &str) -> Result<Decimal, ExchangeError> {
        let inst_id = SymbolMapper::exchange_pair(ExchangeId::Okx, pair);
        let data = self
            .public_get("/api/v5/market/ticker", &build_query(&[("instId", inst_id)]))
            .await?;
        let ticker = transport::array(&data, "")?
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
        let inst_id = SymbolMapper::exchange_pair(ExchangeId::Okx, pair);
        let width = timeframe.millis();
        let mut candles = Vec::with_capacity(limit);
        let mut start = since;

        // `before`/`after` are exclusive bounds on the candle open time.
        while candles.len() < limit {
            let page = (limit - candles.len()).min(CANDLE_PAGE);
            let end = start + page as i64 * width;
            let query = build_query(&[
                ("instId", inst_id.clone()),
                ("bar", bar(timeframe).to_string()),
                ("before", (start - 1).to_string()),
                ("after", end.to_string()),
                ("limit", page.to_string()),
            ]);
            let data = self.public_get("/api/v5/market/history-candles", &query).await?;
            let chunk = parse_candles(&data)?;
            if chunk.is_empty() {
                break;
            }
            candles.extend(chunk);
            start = end;
        }

        Ok(candles)
    }

    async fn fetch_my_trades(&self, pair: &str) -> Result<Vec<TradeFill>, ExchangeError> {
        let query = build_query(&[
            ("instType", "SPOT".to_string()),
            ("instId", SymbolMapper::exchange_pair(ExchangeId::Okx, pair)),
        ]);
        let data = self.signed_get("/api/v5/trade/fills-history", &query).await?;
        parse_fills(&data)
    }

    async fn fetch_quote_symbols(&self) -> Result<Vec<String>, ExchangeError> {
        let data = self
            .public_get("/api/v5/public/instruments", "instType=SPOT")
            .await?;
        parse_instruments(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_sign_prehash() {
        let sig = sign("secret", "2024-01-01T00:00:00.000Z", "GET", "/api/v5/account/balance", "").unwrap();
        let expected = transport::hmac_sha256_base64(
            "secret",
            "2024-01-01T00:00:00.000ZGET/api/v5/account/balance",
        )
        .unwrap();
        assert_eq!(sig, expected);
    }

    #[test]
    fn test_envelope_error() {
        let err = unwrap_data(json!({"code": "50111", "msg": "Invalid OK-ACCESS-KEY", "data": []})).unwrap_err();
        assert!(matches!(err, ExchangeError::Api { ref code, .. } if code == "50111"));
        let data = unwrap_data(json!({"code": "0", "msg": "", "data": [1]})).unwrap();
        assert_eq!(data, json!([1]));
    }

    #[test]
    fn test_trading_and_funding_balances_are_summed() {
        let trading = json!([{
            "details": [
                {"ccy": "BTC", "availBal": "1", "frozenBal": "0.5"},
                {"ccy": "DUST", "availBal": "0", "frozenBal": "0"}
            ]
        }]);
        let funding = json!([
            {"ccy": "BTC", "availBal": "0.25", "frozenBal": "0", "bal": "0.25"},
            {"ccy": "USDT", "availBal": "10", "frozenBal": "", "bal": "10"}
        ]);
        let mut balance = parse_trading_balance(&trading).unwrap();
        balance.merge(&parse_funding_balance(&funding).unwrap());

        assert_eq!(balance.total_of("BTC"), dec!(1.75));
        assert_eq!(balance.free_of("BTC"), dec!(1.25));
        assert_eq!(balance.total_of("USDT"), dec!(10));
        assert!(!balance.total.contains_key("DUST"));
    }

    #[test]
    fn test_candles_sorted_oldest_first() {
        let data = json!([
            ["1700086400000", "2", "3", "1", "2.5", "100", "0", "0", "1"],
            ["1700000000000", "1", "2", "0.5", "2", "50", "0", "0", "1"]
        ]);
        let candles = parse_candles(&data).unwrap();
        assert_eq!(candles[0].timestamp, 1700000000000);
        assert_eq!(candles[1].close, dec!(2.5));
    }

    #[test]
    fn test_fill_cost_is_size_times_price() {
        let data = json!([{"side": "buy", "fillSz": "0.5", "fillPx": "40000", "ts": "1700000000000"}]);
        let fills = parse_fills(&data).unwrap();
        assert_eq!(fills[0].cost, dec!(20000.0));
        assert_eq!(fills[0].side, TradeSide::Buy);
    }

    #[test]
    fn test_instruments_filter_live_usdt() {
        let data = json!([
            {"baseCcy": "BTC", "quoteCcy": "USDT", "state": "live"},
            {"baseCcy": "ETH", "quoteCcy": "USDC", "state": "live"},
            {"baseCcy": "NEW", "quoteCcy": "USDT", "state": "preopen"}
        ]);
        assert_eq!(parse_instruments(&data).unwrap(), vec!["BTC"]);
    }
}
