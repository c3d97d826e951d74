use folio_core::{AssetBalance, AssetCost, AssetSnapshot, StoredAsset};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::{PgPool, Row};

/// Run embedded migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

/// Insert or replace the holding of `symbol` on `exchange`.
pub async fn upsert_asset(
    pool: &PgPool,
    exchange: &str,
    symbol: &str,
    balance: &AssetBalance,
    update_time: i64,
) -> Result<(), sqlx::Error> {
    let doc = StoredAsset {
        exchange: exchange.to_string(),
        symbol: symbol.to_string(),
        balance: balance.clone(),
        update_time,
    };
    let doc = serde_json::to_value(&doc).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    sqlx::query(
        "INSERT INTO asset (exchange, symbol, doc, update_time)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (exchange, symbol) DO UPDATE
         SET doc = EXCLUDED.doc, update_time = EXCLUDED.update_time",
    )
    .bind(exchange)
    .bind(symbol)
    .bind(&doc)
    .bind(update_time)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_assets(pool: &PgPool) -> Result<Vec<Value>, sqlx::Error> {
    let rows = sqlx::query("SELECT doc FROM asset ORDER BY exchange, symbol")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(|r| r.get("doc")).collect())
}

pub async fn load_asset_cost(
    pool: &PgPool,
    exchange: &str,
    symbol: &str,
) -> Result<Option<Value>, sqlx::Error> {
    let row = sqlx::query("SELECT doc FROM asset_cost WHERE exchange = $1 AND symbol = $2")
        .bind(exchange)
        .bind(symbol)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.get("doc")))
}

/// Insert or replace the cost basis of `symbol` on `exchange`.
pub async fn upsert_asset_cost(
    pool: &PgPool,
    exchange: &str,
    symbol: &str,
    avg_price: Decimal,
    update_by: &str,
    update_time: i64,
) -> Result<(), sqlx::Error> {
    let doc = AssetCost {
        exchange: exchange.to_string(),
        symbol: symbol.to_string(),
        avg_price,
        update_time,
        update_by: update_by.to_string(),
    };
    let doc = serde_json::to_value(&doc).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    sqlx::query(
        "INSERT INTO asset_cost (exchange, symbol, doc, update_time, update_by)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (exchange, symbol) DO UPDATE
         SET doc = EXCLUDED.doc, update_time = EXCLUDED.update_time,
             update_by = EXCLUDED.update_by",
    )
    .bind(exchange)
    .bind(symbol)
    .bind(&doc)
    .bind(update_time)
    .bind(update_by)
    .execute(pool)
    .await?;
    Ok(())
}

/// Insert or replace the snapshot of one day.
pub async fn upsert_snapshot(pool: &PgPool, snapshot: &AssetSnapshot) -> Result<(), sqlx::Error> {
    let doc = serde_json::to_value(snapshot).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    sqlx::query(
        "INSERT INTO asset_history (timestamp, doc, update_time)
         VALUES ($1, $2, $3)
         ON CONFLICT (timestamp) DO UPDATE
         SET doc = EXCLUDED.doc, update_time = EXCLUDED.update_time",
    )
    .bind(snapshot.timestamp)
    .bind(&doc)
    .bind(snapshot.update_time)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_latest_snapshot(pool: &PgPool) -> Result<Option<Value>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT doc FROM asset_history
         ORDER BY timestamp DESC, update_time DESC
         LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| r.get("doc")))
}

pub async fn load_snapshots(pool: &PgPool, start: i64, end: i64) -> Result<Vec<Value>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT doc FROM asset_history
         WHERE timestamp >= $1 AND timestamp <= $2
         ORDER BY timestamp ASC",
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(|r| r.get("doc")).collect())
}
