use crate::models::*;
use async_trait::async_trait;
use rust_decimal::Decimal;

// ---------------------------------------------------------------------------
// Exchange Client Trait
// ---------------------------------------------------------------------------

/// Errors that can occur while talking to an exchange.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Exchange API error {code}: {message}")]
    Api { code: String, message: String },
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Not supported: {0}")]
    Unsupported(String),
    #[error("Unknown exchange: {0}")]
    UnknownExchange(String),
}

impl ExchangeError {
    pub fn api(code: impl ToString, message: impl Into<String>) -> Self {
        ExchangeError::Api {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Unified read-only view of one exchange account.
///
/// Pairs are always passed in unified `BASE/QUOTE` notation (`BTC/USDT`);
/// adapters translate to their native format.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn id(&self) -> ExchangeId;

    /// Spot balances of the account.
    async fn fetch_balance(&self) -> Result<RawBalance, ExchangeError>;

    /// Last traded price of a pair.
    async fn fetch_ticker_price(&self, pair: &str) -> Result<Decimal, ExchangeError>;

    /// Up to `limit` candles starting at `since` (epoch ms), oldest first.
    async fn fetch_ohlcv(
        &self,
        pair: &str,
        timeframe: Timeframe,
        since: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// The account's own executions on a pair.
    async fn fetch_my_trades(&self, pair: &str) -> Result<Vec<TradeFill>, ExchangeError>;

    /// Whether `fetch_my_trades` is backed by a real endpoint.
    fn has_my_trades(&self) -> bool {
        true
    }

    /// Base assets of every tradable USDT spot pair.
    async fn fetch_quote_symbols(&self) -> Result<Vec<String>, ExchangeError>;

    /// Connectivity check. A private call, so it also validates credentials.
    async fn ping(&self) -> bool {
        match self.fetch_balance().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(exchange = %self.id(), error = %e, "Ping failed");
                false
            }
        }
    }

    /// Release connections held by the client.
    async fn close(&self) {}
}

// ---------------------------------------------------------------------------
// Snapshot Store Trait
// ---------------------------------------------------------------------------

/// Errors raised by the persistence sink.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Store not connected")]
    NotConnected,
}

/// Document persistence for normalized portfolio data.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Create unique indexes. Idempotent.
    async fn ensure_indexes(&self) -> Result<(), StoreError>;

    /// Insert or replace the holding keyed by `(exchange, symbol)`.
    async fn upsert_asset(
        &self,
        exchange: &str,
        symbol: &str,
        balance: &AssetBalance,
        update_time: i64,
    ) -> Result<(), StoreError>;

    async fn all_assets(&self) -> Result<Vec<StoredAsset>, StoreError>;

    async fn asset_cost(&self, exchange: &str, symbol: &str)
        -> Result<Option<AssetCost>, StoreError>;

    /// Insert or replace the cost basis keyed by `(exchange, symbol)`.
    async fn upsert_asset_cost(
        &self,
        exchange: &str,
        symbol: &str,
        avg_price: Decimal,
        update_by: &str,
    ) -> Result<(), StoreError>;

    /// Insert or replace the snapshot keyed by its daily `timestamp`.
    async fn upsert_snapshot(&self, snapshot: &AssetSnapshot) -> Result<(), StoreError>;

    /// Snapshot with the highest timestamp (ties broken by `update_time`).
    async fn latest_snapshot(&self) -> Result<Option<AssetSnapshot>, StoreError>;

    /// Snapshots with `start <= timestamp <= end`, oldest first.
    async fn snapshots_between(&self, start: i64, end: i64)
        -> Result<Vec<AssetSnapshot>, StoreError>;
}
