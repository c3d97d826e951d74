//! Symbol reconciliation across exchanges.
//!
//! Exchanges disagree on asset codes (renamed tokens, legacy tickers) and on
//! pair notation. Everything inside the pipeline is keyed by the canonical
//! symbol; adapters only ever see their native notation.

use crate::models::ExchangeId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Quote currency every holding is valued in.
pub const QUOTE: &str = "USDT";

/// Assets valued at exactly one USDT.
pub const STABLECOINS: [&str; 2] = ["USDT", "USDC"];

/// Errors loading or saving a symbol mapping.
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid mapping JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Symbol -> venue mapping file
// ---------------------------------------------------------------------------

/// Which venue is the preferred price source for each canonical symbol.
///
/// On disk this is a JSON object of venue display name to symbol list:
/// `{"Binance": ["BTC", "ETH"], "OKX": ["PI"], "Upbit": ["KRW-ONLY"]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolMapping {
    venues: BTreeMap<String, Vec<String>>,
}

impl SymbolMapping {
    pub fn from_json(json: &str) -> Result<Self, MappingError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, MappingError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn to_json_pretty(&self) -> Result<String, MappingError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), MappingError> {
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }

    /// Assign every symbol of `universe` to the first venue in `venues`
    /// (priority order) that lists it; unlisted symbols go to `fallback`.
    pub fn build(universe: &[String], venues: &[(String, Vec<String>)], fallback: &str) -> Self {
        let mut mapping: BTreeMap<String, Vec<String>> = venues
            .iter()
            .map(|(name, _)| (name.clone(), Vec::new()))
            .collect();
        mapping.entry(fallback.to_string()).or_default();

        for symbol in universe {
            let venue = venues
                .iter()
                .find(|(name, listed)| name != fallback && listed.contains(symbol))
                .map(|(name, _)| name.as_str())
                .unwrap_or(fallback);
            if let Some(symbols) = mapping.get_mut(venue) {
                symbols.push(symbol.clone());
            }
        }

        Self { venues: mapping }
    }

    /// Preferred venue for a canonical symbol.
    pub fn venue_for(&self, symbol: &str) -> Option<&str> {
        self.venues
            .iter()
            .find(|(_, symbols)| symbols.iter().any(|s| s == symbol))
            .map(|(venue, _)| venue.as_str())
    }

    pub fn symbols_for(&self, venue: &str) -> &[String] {
        self.venues.get(venue).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn venues(&self) -> impl Iterator<Item = &str> {
        self.venues.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.venues.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Canonical symbol resolution
// ---------------------------------------------------------------------------

/// Resolves exchange-specific asset codes and pairs.
#[derive(Debug, Clone)]
pub struct SymbolMapper {
    aliases: HashMap<String, String>,
    trade_alternatives: HashMap<String, String>,
    mapping: SymbolMapping,
}

impl Default for SymbolMapper {
    fn default() -> Self {
        Self::new(SymbolMapping::default())
    }
}

impl SymbolMapper {
    pub fn new(mapping: SymbolMapping) -> Self {
        let aliases = [("XBT", "BTC"), ("RNDR", "RENDER"), ("MIOTA", "IOTA")]
            .into_iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect();

        // Renamed or merged tokens whose trade history lives under the old ticker.
        let trade_alternatives = [
            ("RENDER/USDT", "RNDR/USDT"),
            ("FET/USDT", "OCEAN/USDT"),
            ("OCEAN/USDT", "AGIX/USDT"),
        ]
        .into_iter()
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .collect();

        Self {
            aliases,
            trade_alternatives,
            mapping,
        }
    }

    /// Register an extra rename, e.g. a ticker migration.
    pub fn with_alias(mut self, from: &str, to: &str) -> Self {
        self.aliases
            .insert(from.trim().to_uppercase(), to.trim().to_uppercase());
        self
    }

    pub fn mapping(&self) -> &SymbolMapping {
        &self.mapping
    }

    /// Canonical identifier for an asset code reported by `exchange`.
    ///
    /// Binance reports Simple Earn flexible positions as `LD<asset>`; those
    /// are folded into the underlying asset.
    pub fn canonical(&self, exchange: ExchangeId, raw: &str) -> String {
        let mut code = raw.trim().to_uppercase();
        if exchange == ExchangeId::Binance {
            if let Some(underlying) = code.strip_prefix("LD") {
                if underlying.len() >= 3 {
                    code = underlying.to_string();
                }
            }
        }
        self.aliases.get(&code).cloned().unwrap_or(code)
    }

    /// Preferred price venue for a canonical symbol, if the mapping names a
    /// supported exchange.
    pub fn preferred_exchange(&self, symbol: &str) -> Option<ExchangeId> {
        self.mapping.venue_for(symbol)?.parse().ok()
    }

    pub fn is_stablecoin(symbol: &str) -> bool {
        STABLECOINS.contains(&symbol)
    }

    /// Unified pair against USDT: `BTC` -> `BTC/USDT`.
    pub fn pair(symbol: &str) -> String {
        format!("{}/{}", symbol, QUOTE)
    }

    /// Split a unified pair into base and quote.
    pub fn split_pair(pair: &str) -> (&str, &str) {
        pair.split_once('/').unwrap_or((pair, QUOTE))
    }

    /// Native pair notation used by an exchange's REST API.
    pub fn exchange_pair(exchange: ExchangeId, pair: &str) -> String {
        let (base, quote) = Self::split_pair(pair);
        match exchange {
            ExchangeId::Okx => format!("{}-{}", base, quote),
            ExchangeId::Gateio => format!("{}_{}", base, quote),
            ExchangeId::Binance | ExchangeId::Bybit | ExchangeId::Bitget | ExchangeId::Mexc => {
                format!("{}{}", base, quote)
            }
        }
    }

    /// Older pair to query when the current one has no trade history.
    pub fn trade_alternative(&self, pair: &str) -> Option<&str> {
        self.trade_alternatives.get(pair).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_canonical_aliases() {
        let mapper = SymbolMapper::default();
        assert_eq!(mapper.canonical(ExchangeId::Binance, " btc "), "BTC");
        assert_eq!(mapper.canonical(ExchangeId::Okx, "XBT"), "BTC");
        assert_eq!(mapper.canonical(ExchangeId::Gateio, "rndr"), "RENDER");
        assert_eq!(mapper.canonical(ExchangeId::Binance, "LDUSDT"), "USDT");
        assert_eq!(mapper.canonical(ExchangeId::Binance, "LDO"), "LDO");
        assert_eq!(mapper.canonical(ExchangeId::Okx, "LDUSDT"), "LDUSDT");
        let mapper = mapper.with_alias("matic", "pol");
        assert_eq!(mapper.canonical(ExchangeId::Bybit, "MATIC"), "POL");
    }

    #[test]
    fn test_exchange_pair_notation() {
        assert_eq!(SymbolMapper::exchange_pair(ExchangeId::Binance, "BTC/USDT"), "BTCUSDT");
        assert_eq!(SymbolMapper::exchange_pair(ExchangeId::Okx, "BTC/USDT"), "BTC-USDT");
        assert_eq!(SymbolMapper::exchange_pair(ExchangeId::Gateio, "ETH/USDT"), "ETH_USDT");
        assert_eq!(SymbolMapper::pair("SOL"), "SOL/USDT");
        assert_eq!(SymbolMapper::split_pair("SOL"), ("SOL", "USDT"));
    }

    #[test]
    fn test_trade_alternatives() {
        let mapper = SymbolMapper::default();
        assert_eq!(mapper.trade_alternative("RENDER/USDT"), Some("RNDR/USDT"));
        assert_eq!(mapper.trade_alternative("BTC/USDT"), None);
    }

    #[test]
    fn test_build_mapping_by_priority() {
        let universe = strings(&["BTC", "ETH", "PI", "KRWONLY"]);
        let venues = vec![
            ("Binance".to_string(), strings(&["BTC", "ETH"])),
            ("OKX".to_string(), strings(&["BTC", "PI"])),
            ("Upbit".to_string(), universe.clone()),
        ];
        let mapping = SymbolMapping::build(&universe, &venues, "Upbit");

        assert_eq!(mapping.symbols_for("Binance"), &strings(&["BTC", "ETH"])[..]);
        assert_eq!(mapping.symbols_for("OKX"), &strings(&["PI"])[..]);
        assert_eq!(mapping.symbols_for("Upbit"), &strings(&["KRWONLY"])[..]);
        assert_eq!(mapping.venue_for("PI"), Some("OKX"));
        assert_eq!(mapping.len(), 4);
    }

    #[test]
    fn test_mapping_json_round_trip_and_preferred_exchange() {
        let json = r#"{"Binance": ["BTC"], "Gate.io": ["XYZ"], "Upbit": ["ABC"]}"#;
        let mapping = SymbolMapping::from_json(json).unwrap();
        let mapper = SymbolMapper::new(mapping.clone());
        assert_eq!(mapper.preferred_exchange("XYZ"), Some(ExchangeId::Gateio));
        assert_eq!(mapper.preferred_exchange("ABC"), None);
        assert_eq!(mapper.preferred_exchange("NONE"), None);

        let again = SymbolMapping::from_json(&mapping.to_json_pretty().unwrap()).unwrap();
        assert_eq!(again, mapping);
    }
}
