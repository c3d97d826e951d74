use crate::transport::{self, build_query, headers, ClientConfig, HttpTransport};
use async_trait::async_trait;
use folio_core::*;
use rust_decimal::Decimal;
use serde_json::Value;

const BASE_URL: &str = "https://api.bitget.com";
const MAX_CANDLES: usize = 1000;

/// Bitget v2 spot client.
pub struct BitgetClient {
    credentials: Credentials,
    transport: HttpTransport,
}

impl BitgetClient {
    pub fn new(credentials: Credentials, config: &ClientConfig) -> Result<Self, ExchangeError> {
        Ok(Self {
            credentials,
            transport: HttpTransport::new(BASE_URL, config)?,
        })
    }

    async fn signed_get(&self, path: &str, query: &str) -> Result<Value, ExchangeError> {
        let timestamp = now_millis().to_string();
        let signature = sign(&self.credentials.secret, &timestamp, "GET", path, query, "")?;
        let passphrase = self.credentials.password.as_deref().unwrap_or_default();
        let headers = headers(&[
            ("ACCESS-KEY", self.credentials.api_key.as_str()),
            ("ACCESS-SIGN", signature.as_str()),
            ("ACCESS-TIMESTAMP", timestamp.as_str()),
            ("ACCESS-PASSPHRASE", passphrase),
            ("locale", "en-US"),
        ])?;
        unwrap_data(self.transport.get(path, query, headers).await?)
    }

    async fn public_get(&self, path: &str, query: &str) -> Result<Value, ExchangeError> {
        unwrap_data(self.transport.get_public(path, query).await?)
    }
}

/// Base64 HMAC-SHA256 over `timestamp + METHOD + path [+ "?" + query] + body`.
pub(crate) fn sign(
    secret: &str,
    timestamp: &str,
    method: &str,
    path: &str,
    query: &str,
    body: &str,
) -> Result<String, ExchangeError> {
    let mut payload = format!("{}{}{}", timestamp, method.to_uppercase(), path);
    if !query.is_empty() {
        payload.push('?');
        payload.push_str(query);
    }
    payload.push_str(body);
    transport::hmac_sha256_base64(secret, &payload)
}

fn unwrap_data(mut value: Value) -> Result<Value, ExchangeError> {
    let code = value.get("code").and_then(Value::as_str).unwrap_or("00000");
    if code != "00000" {
        let message = value.get("msg").and_then(Value::as_str).unwrap_or_default();
        return Err(ExchangeError::api(code, message));
    }
    Ok(value.get_mut("data").map(Value::take).unwrap_or(Value::Null))
}

fn granularity(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::M1 => "1min",
        Timeframe::M5 => "5min",
        Timeframe::M15 => "15min",
        Timeframe::M30 => "30min",
        Timeframe::H1 => "1h",
        Timeframe::H4 => "4h",
        Timeframe::D1 => "1Dutc",
        Timeframe::W1 => "1Wutc",
    }
}

fn parse_assets(data: &Value) -> Result<RawBalance, ExchangeError> {
    let mut balance = RawBalance::default();
    for entry in transport::array(data, "")? {
        let coin = transport::str_field(entry, "coin")?;
        let free = transport::decimal_field(entry, "available")?;
        let used = transport::decimal_field(entry, "frozen")? + transport::decimal_field(entry, "locked")?;
        if free + used > Decimal::ZERO {
            balance.insert(coin, free, used);
        }
    }
    Ok(balance)
}

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
            let amount = transport::decimal_field(f, "size")?;
            let mut cost = transport::decimal_field(f, "amount")?;
            if cost.is_zero() {
                cost = amount * transport::decimal_field(f, "priceAvg")?;
            }
            Ok(TradeFill {
                side: match transport::str_field(f, "side")? {
                    "buy" => TradeSide::Buy,
                    _ => TradeSide::Sell,
                },
                amount,
                cost,
                timestamp: transport::int_field(f, "cTime")?,
            })
        })
        .collect()
}

fn parse_symbols(data: &Value) -> Result<Vec<String>, ExchangeError> {
    let mut symbols = Vec::new();
    for s in transport::array(data, "")? {
        let quote = s.get("quoteCoin").and_then(Value::as_str).unwrap_or_default();
        let status = s.get("status").and_then(Value::as_str).unwrap_or_default();
        if quote == QUOTE && status == "online" {
            symbols.push(transport::str_field(s, "baseCoin")?.to_string());
        }
    }
    Ok(symbols)
}

#[async_trait]
impl ExchangeClient for BitgetClient {
    fn id(&self) -> ExchangeId {
        ExchangeId::Bitget
    }

    async fn fetch_balance(&self) -> Result<RawBalance, ExchangeError> {
        let data = self.signed_get("/api/v2/spot/account/assets", "").await?;
        parse_assets(&data)
    }

    async fn fetch_ticker_price(&self, pair: &str) -> Result<Decimal, ExchangeError> {
        let symbol = SymbolMapper::exchange_pair(ExchangeId::Bitget, pair);
        let data = self
            .public_get("/api/v2/spot/market/tickers", &build_query(&[("symbol", symbol)]))
            .await?;
        let ticker = transport::array(&data, "")?
            .first()
            .ok_or_else(|| ExchangeError::Parse(format!("No ticker for {}", pair)))?;
        transport::decimal_field(ticker, "lastPr")
    }

    async fn fetch_ohlcv(
        &self,
        pair: &str,
        timeframe: Timeframe,
        since: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let limit = limit.min(MAX_CANDLES);
        let end = since + limit as i64 * timeframe.millis() - 1;
        let query = build_query(&[
            ("symbol", SymbolMapper::exchange_pair(ExchangeId::Bitget, pair)),
            ("granularity", granularity(timeframe).to_string()),
            ("startTime", since.to_string()),
            ("endTime", end.to_string()),
            ("limit", limit.to_string()),
        ]);
        let data = self.public_get("/api/v2/spot/market/candles", &query).await?;
        parse_candles(&data)
    }

    async fn fetch_my_trades(&self, pair: &str) -> Result<Vec<TradeFill>, ExchangeError> {
        let query = build_query(&[("symbol", SymbolMapper::exchange_pair(ExchangeId::Bitget, pair))]);
        let data = self.signed_get("/api/v2/spot/trade/fills", &query).await?;
        parse_fills(&data)
    }

    async fn fetch_quote_symbols(&self) -> Result<Vec<String>, ExchangeError> {
        let data = self.public_get("/api/v2/spot/public/symbols", "").await?;
        parse_symbols(&data)
    }
}
