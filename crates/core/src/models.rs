use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Milliseconds in one UTC day.
pub const DAY_MS: i64 = 86_400_000;

/// Current UTC time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Floor an epoch-millisecond timestamp to the start of its UTC day.
pub fn day_start(ts_ms: i64) -> i64 {
    ts_ms.div_euclid(DAY_MS) * DAY_MS
}

/// Convert epoch milliseconds to a `DateTime<Utc>`.
pub fn millis_to_datetime(ts_ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ts_ms)
}

// ---------------------------------------------------------------------------
// Exchange identity
// ---------------------------------------------------------------------------

/// Exchanges the ingestion pipeline knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeId {
    Binance,
    Okx,
    Bybit,
    Bitget,
    Mexc,
    Gateio,
}

impl ExchangeId {
    pub const ALL: [ExchangeId; 6] = [
        ExchangeId::Binance,
        ExchangeId::Okx,
        ExchangeId::Bybit,
        ExchangeId::Bitget,
        ExchangeId::Mexc,
        ExchangeId::Gateio,
    ];

    /// Lowercase identifier used in API payloads and storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Binance => "binance",
            ExchangeId::Okx => "okx",
            ExchangeId::Bybit => "bybit",
            ExchangeId::Bitget => "bitget",
            ExchangeId::Mexc => "mexc",
            ExchangeId::Gateio => "gateio",
        }
    }

    /// Venue name as written in the symbol mapping file.
    pub fn display_name(&self) -> &'static str {
        match self {
            ExchangeId::Binance => "Binance",
            ExchangeId::Okx => "OKX",
            ExchangeId::Bybit => "Bybit",
            ExchangeId::Bitget => "Bitget",
            ExchangeId::Mexc => "MEXC",
            ExchangeId::Gateio => "Gate.io",
        }
    }

    /// Whether the exchange requires a passphrase alongside key and secret.
    pub fn needs_password(&self) -> bool {
        matches!(self, ExchangeId::Okx | ExchangeId::Bitget)
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['.', '_', '-', ' '], "");
        match normalized.as_str() {
            "binance" => Ok(ExchangeId::Binance),
            "okx" | "okex" => Ok(ExchangeId::Okx),
            "bybit" => Ok(ExchangeId::Bybit),
            "bitget" => Ok(ExchangeId::Bitget),
            "mexc" => Ok(ExchangeId::Mexc),
            "gateio" | "gate" => Ok(ExchangeId::Gateio),
            _ => Err(format!("unknown exchange '{}'", s)),
        }
    }
}

/// API credentials for one exchange account.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub api_key: String,
    #[serde(skip_serializing)]
    pub secret: String,
    /// Passphrase (OKX, Bitget).
    #[serde(default, alias = "passphrase", skip_serializing)]
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            password: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.api_key.is_empty() || self.secret.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret", &"<redacted>")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// Candle widths supported by the price history service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1w")]
    W1,
}

impl Timeframe {
    /// Width of one candle in milliseconds.
    pub fn millis(&self) -> i64 {
        match self {
            Timeframe::M1 => 60_000,
            Timeframe::M5 => 300_000,
            Timeframe::M15 => 900_000,
            Timeframe::M30 => 1_800_000,
            Timeframe::H1 => 3_600_000,
            Timeframe::H4 => 14_400_000,
            Timeframe::D1 => DAY_MS,
            Timeframe::W1 => 604_800_000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
        }
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "30m" => Ok(Timeframe::M30),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            "1w" => Ok(Timeframe::W1),
            _ => Err(format!("unsupported timeframe '{}'", s)),
        }
    }
}

/// A single OHLCV candle. `timestamp` is the candle open time in epoch ms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Trade side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// One of the account's own executions, as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeFill {
    pub side: TradeSide,
    /// Base asset quantity.
    pub amount: Decimal,
    /// Quote (USDT) amount: price * amount.
    pub cost: Decimal,
    pub timestamp: i64,
}

// ---------------------------------------------------------------------------
// Balances
// ---------------------------------------------------------------------------

/// Raw account balance as returned by an exchange, keyed by the exchange's
/// own asset code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawBalance {
    pub free: BTreeMap<String, Decimal>,
    pub used: BTreeMap<String, Decimal>,
    pub total: BTreeMap<String, Decimal>,
}

impl RawBalance {
    /// Record one asset. `total` is `free + used`.
    pub fn insert(&mut self, asset: &str, free: Decimal, used: Decimal) {
        self.free.insert(asset.to_string(), free);
        self.used.insert(asset.to_string(), used);
        self.total.insert(asset.to_string(), free + used);
    }

    /// Add another account's balance into this one, asset by asset.
    pub fn merge(&mut self, other: &RawBalance) {
        for (asset, amount) in &other.free {
            *self.free.entry(asset.clone()).or_default() += *amount;
        }
        for (asset, amount) in &other.used {
            *self.used.entry(asset.clone()).or_default() += *amount;
        }
        for (asset, amount) in &other.total {
            *self.total.entry(asset.clone()).or_default() += *amount;
        }
    }

    pub fn free_of(&self, asset: &str) -> Decimal {
        self.free.get(asset).copied().unwrap_or_default()
    }

    pub fn used_of(&self, asset: &str) -> Decimal {
        self.used.get(asset).copied().unwrap_or_default()
    }

    pub fn total_of(&self, asset: &str) -> Decimal {
        self.total.get(asset).copied().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.total.is_empty()
    }
}

/// Normalized holding of one asset on one exchange, valued in USDT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub free: Decimal,
    pub used: Decimal,
    pub total: Decimal,
    pub avg_price: Decimal,
    pub current_price: Decimal,
    /// Return on investment in percent.
    pub roi: Decimal,
    pub value_in_usdt: Decimal,
    pub profit_usdt: Decimal,
}

impl AssetBalance {
    /// Build a balance and derive its valuation metrics.
    pub fn calculate(
        free: Decimal,
        used: Decimal,
        total: Decimal,
        avg_price: Decimal,
        current_price: Decimal,
    ) -> Self {
        let value_in_usdt = total * current_price;
        let initial = total * avg_price;
        let profit_usdt = value_in_usdt - initial;
        Self {
            free,
            used,
            total,
            avg_price,
            current_price,
            roi: roi_percent(profit_usdt, initial),
            value_in_usdt,
            profit_usdt,
        }
    }

    /// Cost basis of the holding.
    pub fn initial_value(&self) -> Decimal {
        self.total * self.avg_price
    }
}

/// Profit relative to cost basis, in percent. Zero when there is no basis.
pub fn roi_percent(profit: Decimal, initial: Decimal) -> Decimal {
    if initial > Decimal::ZERO {
        profit / initial * Decimal::ONE_HUNDRED
    } else {
        Decimal::ZERO
    }
}

/// Portfolio-wide totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    /// Market value of every holding in USDT.
    pub total: Decimal,
    pub profit: Decimal,
    /// Aggregate cost basis.
    pub initial: Decimal,
    pub roi: Decimal,
}

impl PortfolioSummary {
    pub fn calculate(total: Decimal, profit: Decimal, initial: Decimal) -> Self {
        Self {
            total,
            profit,
            initial,
            roi: roi_percent(profit, initial),
        }
    }

    /// Accumulate one holding into running totals (roi is recomputed by `finish`).
    pub fn add(&mut self, balance: &AssetBalance) {
        self.total += balance.value_in_usdt;
        self.profit += balance.profit_usdt;
        self.initial += balance.initial_value();
    }

    pub fn finish(self) -> Self {
        Self::calculate(self.total, self.profit, self.initial)
    }
}

/// Holdings grouped by exchange name, then canonical asset symbol.
pub type ExchangeHoldings = BTreeMap<String, BTreeMap<String, AssetBalance>>;

/// Result of one ingestion pass over all configured exchanges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioAssets {
    pub exchanges: ExchangeHoldings,
    pub summary: PortfolioSummary,
    /// Exchanges that could not be polled, with the reason.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failures: BTreeMap<String, String>,
}

impl PortfolioAssets {
    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Persisted documents
// ---------------------------------------------------------------------------

/// Daily portfolio snapshot. Unique per `timestamp` (UTC day start, epoch ms).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSnapshot {
    pub timestamp: i64,
    pub exchanges: ExchangeHoldings,
    pub summary: PortfolioSummary,
    /// When the snapshot was last written, epoch ms.
    pub update_time: i64,
}

impl AssetSnapshot {
    pub fn from_assets(assets: &PortfolioAssets, daily_timestamp: i64, update_time: i64) -> Self {
        Self {
            timestamp: daily_timestamp,
            exchanges: assets.exchanges.clone(),
            summary: assets.summary.clone(),
            update_time,
        }
    }

    pub fn to_assets(&self) -> PortfolioAssets {
        PortfolioAssets {
            exchanges: self.exchanges.clone(),
            summary: self.summary.clone(),
            failures: BTreeMap::new(),
        }
    }

    /// Whether the snapshot was written less than `ttl_ms` before `now_ms`.
    pub fn is_fresh(&self, now_ms: i64, ttl_ms: i64) -> bool {
        now_ms - self.update_time < ttl_ms
    }

    pub fn history_point(&self) -> HistoryPoint {
        HistoryPoint {
            timestamp: self.timestamp,
            summary: self.summary.clone(),
        }
    }
}

/// One point of the portfolio value history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub timestamp: i64,
    pub summary: PortfolioSummary,
}

/// Latest known holding of one asset on one exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAsset {
    pub exchange: String,
    pub symbol: String,
    #[serde(flatten)]
    pub balance: AssetBalance,
    pub update_time: i64,
}

/// Average acquisition price of an asset on an exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetCost {
    pub exchange: String,
    pub symbol: String,
    pub avg_price: Decimal,
    pub update_time: i64,
    /// Who set the price: "Server" when derived from trade history.
    pub update_by: String,
}
