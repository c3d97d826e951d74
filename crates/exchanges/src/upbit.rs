//! Upbit public market listing, the symbol universe of the mapping file.

use crate::transport::{self, ClientConfig, HttpTransport};
use folio_core::ExchangeError;
use serde_json::Value;

const BASE_URL: &str = "https://api.upbit.com";

/// Venue name of Upbit in the mapping file; also the mapping fallback.
pub const UPBIT: &str = "Upbit";

/// Base symbols of every KRW market, excluding USD-pegged markets.
pub async fn fetch_krw_symbols(config: &ClientConfig) -> Result<Vec<String>, ExchangeError> {
    let transport = HttpTransport::new(BASE_URL, config)?;
    let value = transport.get_public("/v1/market/all", "isDetails=true").await?;
    parse_krw_symbols(&value)
}

fn parse_krw_symbols(value: &Value) -> Result<Vec<String>, ExchangeError> {
    let mut symbols = Vec::new();
    for market in transport::array(value, "")? {
        let name = transport::str_field(market, "market")?;
        if name.contains("USD") {
            continue;
        }
        if let Some(symbol) = name.strip_prefix("KRW-") {
            symbols.push(symbol.to_string());
        }
    }
    Ok(symbols)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_krw_markets_only() {
        let value = json!([
            {"market": "KRW-BTC", "korean_name": "비트코인"},
            {"market": "BTC-ETH"},
            {"market": "KRW-USDT"},
            {"market": "KRW-XRP"}
        ]);
        assert_eq!(parse_krw_symbols(&value).unwrap(), vec!["BTC", "XRP"]);
    }
}
