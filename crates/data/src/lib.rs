pub mod db;

use async_trait::async_trait;
use folio_core::*;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::info;

fn db_error(e: impl std::fmt::Display) -> StoreError {
    StoreError::Database(e.to_string())
}

fn decode<T: DeserializeOwned>(doc: serde_json::Value) -> Result<T, StoreError> {
    Ok(serde_json::from_value(doc)?)
}

/// Open a connection pool and check that the database answers.
pub async fn connect(url: &str, min_connections: u32, max_connections: u32) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .min_connections(min_connections)
        .max_connections(max_connections.max(min_connections).max(1))
        .connect(url)
        .await
        .map_err(db_error)?;
    sqlx::query("SELECT 1").execute(&pool).await.map_err(db_error)?;
    info!("Connected to database");
    Ok(pool)
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

/// Document store on PostgreSQL: each table holds a JSONB document plus
/// the key columns its unique index covers.
pub struct PgDocumentStore {
    pub pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SnapshotStore for PgDocumentStore {
    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        db::run_migrations(&self.pool).await.map_err(db_error)
    }

    async fn upsert_asset(
        &self,
        exchange: &str,
        symbol: &str,
        balance: &AssetBalance,
        update_time: i64,
    ) -> Result<(), StoreError> {
        db::upsert_asset(&self.pool, exchange, symbol, balance, update_time)
            .await
            .map_err(db_error)
    }

    async fn all_assets(&self) -> Result<Vec<StoredAsset>, StoreError> {
        db::load_assets(&self.pool)
            .await
            .map_err(db_error)?
            .into_iter()
            .map(decode)
            .collect()
    }

    async fn asset_cost(&self, exchange: &str, symbol: &str) -> Result<Option<AssetCost>, StoreError> {
        db::load_asset_cost(&self.pool, exchange, symbol)
            .await
            .map_err(db_error)?
            .map(decode)
            .transpose()
    }

    async fn upsert_asset_cost(
        &self,
        exchange: &str,
        symbol: &str,
        avg_price: Decimal,
        update_by: &str,
    ) -> Result<(), StoreError> {
        db::upsert_asset_cost(&self.pool, exchange, symbol, avg_price, update_by, now_millis())
            .await
            .map_err(db_error)
    }

    async fn upsert_snapshot(&self, snapshot: &AssetSnapshot) -> Result<(), StoreError> {
        db::upsert_snapshot(&self.pool, snapshot).await.map_err(db_error)
    }

    async fn latest_snapshot(&self) -> Result<Option<AssetSnapshot>, StoreError> {
        db::load_latest_snapshot(&self.pool)
            .await
            .map_err(db_error)?
            .map(decode)
            .transpose()
    }

    async fn snapshots_between(&self, start: i64, end: i64) -> Result<Vec<AssetSnapshot>, StoreError> {
        db::load_snapshots(&self.pool, start, end)
            .await
            .map_err(db_error)?
            .into_iter()
            .map(decode)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

type Key = (String, String);

/// Process-local store with the same keying and upsert rules as
/// [`PgDocumentStore`]. Backs tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    assets: RwLock<BTreeMap<Key, StoredAsset>>,
    costs: RwLock<BTreeMap<Key, AssetCost>>,
    snapshots: RwLock<BTreeMap<i64, AssetSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot_count(&self) -> usize {
        self.snapshots.read().await.len()
    }
}

fn key(exchange: &str, symbol: &str) -> Key {
    (exchange.to_string(), symbol.to_string())
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn upsert_asset(
        &self,
        exchange: &str,
        symbol: &str,
        balance: &AssetBalance,
        update_time: i64,
    ) -> Result<(), StoreError> {
        let doc = StoredAsset {
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            balance: balance.clone(),
            update_time,
        };
        self.assets.write().await.insert(key(exchange, symbol), doc);
        Ok(())
    }

    async fn all_assets(&self) -> Result<Vec<StoredAsset>, StoreError> {
        Ok(self.assets.read().await.values().cloned().collect())
    }

    async fn asset_cost(&self, exchange: &str, symbol: &str) -> Result<Option<AssetCost>, StoreError> {
        Ok(self.costs.read().await.get(&key(exchange, symbol)).cloned())
    }

    async fn upsert_asset_cost(
        &self,
        exchange: &str,
        symbol: &str,
        avg_price: Decimal,
        update_by: &str,
    ) -> Result<(), StoreError> {
        let doc = AssetCost {
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            avg_price,
            update_time: now_millis(),
            update_by: update_by.to_string(),
        };
        self.costs.write().await.insert(key(exchange, symbol), doc);
        Ok(())
    }

    async fn upsert_snapshot(&self, snapshot: &AssetSnapshot) -> Result<(), StoreError> {
        self.snapshots
            .write()
            .await
            .insert(snapshot.timestamp, snapshot.clone());
        Ok(())
    }

    async fn latest_snapshot(&self) -> Result<Option<AssetSnapshot>, StoreError> {
        Ok(self.snapshots.read().await.values().next_back().cloned())
    }

    async fn snapshots_between(&self, start: i64, end: i64) -> Result<Vec<AssetSnapshot>, StoreError> {
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self
            .snapshots
            .read()
            .await
            .range(start..=end)
            .map(|(_, s)| s.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot(timestamp: i64, total: Decimal, update_time: i64) -> AssetSnapshot {
        AssetSnapshot {
            timestamp,
            exchanges: ExchangeHoldings::new(),
            summary: PortfolioSummary::calculate(total, Decimal::ZERO, total),
            update_time,
        }
    }

    #[tokio::test]
    async fn test_snapshot_upsert_is_unique_per_day() {
        let store = MemoryStore::new();
        store.upsert_snapshot(&snapshot(DAY_MS, dec!(100), 1)).await.unwrap();
        store.upsert_snapshot(&snapshot(DAY_MS, dec!(150), 2)).await.unwrap();
        store.upsert_snapshot(&snapshot(0, dec!(90), 3)).await.unwrap();

        assert_eq!(store.snapshot_count().await, 2);
        let latest = store.latest_snapshot().await.unwrap().unwrap();
        assert_eq!(latest.timestamp, DAY_MS);
        assert_eq!(latest.summary.total, dec!(150));
    }

    #[tokio::test]
    async fn test_snapshots_between_inclusive_and_sorted() {
        let store = MemoryStore::new();
        for day in [3, 1, 2, 5] {
            store
                .upsert_snapshot(&snapshot(day * DAY_MS, Decimal::from(day), 0))
                .await
                .unwrap();
        }
        let found = store.snapshots_between(DAY_MS, 3 * DAY_MS).await.unwrap();
        let days: Vec<i64> = found.iter().map(|s| s.timestamp / DAY_MS).collect();
        assert_eq!(days, vec![1, 2, 3]);
        assert!(store.snapshots_between(5 * DAY_MS, DAY_MS).await.unwrap().is_empty());
        assert!(MemoryStore::new().latest_snapshot().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_asset_and_cost_upserts() {
        let store = MemoryStore::new();
        let balance = AssetBalance::calculate(dec!(1), dec!(0), dec!(1), dec!(10), dec!(12));
        store.upsert_asset("binance", "BTC", &balance, 1).await.unwrap();
        store.upsert_asset("binance", "BTC", &balance, 2).await.unwrap();
        store.upsert_asset("okx", "BTC", &balance, 2).await.unwrap();

        let assets = store.all_assets().await.unwrap();
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].update_time, 2);

        assert!(store.asset_cost("binance", "BTC").await.unwrap().is_none());
        store.upsert_asset_cost("binance", "BTC", dec!(10), "Server").await.unwrap();
        store.upsert_asset_cost("binance", "BTC", dec!(11), "User").await.unwrap();
        let cost = store.asset_cost("binance", "BTC").await.unwrap().unwrap();
        assert_eq!(cost.avg_price, dec!(11));
        assert_eq!(cost.update_by, "User");
    }

    #[test]
    fn test_stored_asset_document_shape() {
        let balance = AssetBalance::calculate(dec!(1), dec!(0), dec!(1), dec!(10), dec!(12));
        let doc = serde_json::to_value(StoredAsset {
            exchange: "okx".into(),
            symbol: "ETH".into(),
            balance,
            update_time: 5,
        })
        .unwrap();
        // Balance fields are flattened next to the keys.
        assert_eq!(doc["symbol"], "ETH");
        assert!(doc.get("value_in_usdt").is_some());
        let back: StoredAsset = decode(doc).unwrap();
        assert_eq!(back.balance.current_price, dec!(12));
    }
}
