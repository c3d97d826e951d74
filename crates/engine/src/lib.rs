//! Ingestion pipeline: polls exchanges, values holdings, writes snapshots.

pub mod cost;
pub mod history;
pub mod quotes;
pub mod scheduler;
pub mod wallet;

pub use cost::{average_cost, CostBasis};
pub use history::HistoryService;
pub use quotes::QuoteService;
pub use scheduler::{Schedule, Scheduler, SchedulerHandle};
pub use wallet::WalletService;

use folio_core::*;
use folio_exchanges::ExchangeSet;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("No exchanges configured")]
    NoExchanges,
}

/// Start of the UTC day before the one containing `now_ms`.
pub fn previous_day(now_ms: i64) -> i64 {
    day_start(now_ms - DAY_MS)
}

/// The live exchange set plus the services that read from it.
///
/// The set can be swapped at runtime (e.g. new API keys); every operation
/// works on the set current when it starts.
pub struct AssetManager {
    exchanges: RwLock<ExchangeSet>,
    wallet: Arc<WalletService>,
    history: HistoryService,
}

impl AssetManager {
    pub fn new(store: Arc<dyn SnapshotStore>, mapper: SymbolMapper, exchanges: ExchangeSet) -> Self {
        let wallet = Arc::new(WalletService::new(store.clone(), Arc::new(mapper)));
        Self {
            exchanges: RwLock::new(exchanges),
            history: HistoryService::new(wallet.clone(), store),
            wallet,
        }
    }

    pub async fn exchanges(&self) -> ExchangeSet {
        self.exchanges.read().await.clone()
    }

    /// Replace the exchange set, closing the previous connections.
    pub async fn replace_exchanges(&self, exchanges: ExchangeSet) {
        let previous = {
            let mut current = self.exchanges.write().await;
            std::mem::replace(&mut *current, exchanges)
        };
        previous.close_all().await;
        let names: Vec<String> = self
            .exchanges
            .read()
            .await
            .names()
            .map(str::to_string)
            .collect();
        info!(exchanges = ?names, "Exchange set replaced");
    }

    pub async fn ping_all(&self) -> Option<BTreeMap<String, bool>> {
        self.exchanges().await.ping_all().await
    }

    pub async fn close(&self) {
        self.exchanges().await.close_all().await;
    }

    pub async fn collect_assets(&self, min_value: Decimal, at: Option<i64>) -> PortfolioAssets {
        let exchanges = self.exchanges().await;
        self.wallet.collect(&exchanges, min_value, at).await
    }

    pub async fn update_daily_snapshot(
        &self,
        assets: Option<PortfolioAssets>,
        min_value: Decimal,
        at: Option<i64>,
    ) -> Result<Option<AssetSnapshot>, EngineError> {
        let exchanges = self.exchanges().await;
        self.history
            .update_daily_snapshot(&exchanges, assets, min_value, at)
            .await
    }

    pub async fn latest_snapshot(&self) -> Result<Option<AssetSnapshot>, EngineError> {
        self.history.latest_snapshot().await
    }

    pub async fn asset_history(&self, period_days: u32) -> Result<Vec<HistoryPoint>, EngineError> {
        let exchanges = self.exchanges().await;
        self.history.asset_history(&exchanges, period_days).await
    }
}

/// Register the standard jobs: yesterday's snapshot at 00:00 UTC and, when
/// `poll_interval` is set, a periodic refresh of today's snapshot.
pub fn schedule_snapshots(
    scheduler: &mut Scheduler,
    manager: Arc<AssetManager>,
    min_value: Decimal,
    poll_interval: Option<std::time::Duration>,
) {
    let daily = manager.clone();
    scheduler.add_job("daily_snapshot", Schedule::DailyAt { hour: 0, minute: 0 }, move |at| {
        let manager = daily.clone();
        async move {
            let day = previous_day(at.timestamp_millis());
            manager
                .update_daily_snapshot(None, min_value, Some(day))
                .await
                .map(|_| ())
        }
    });

    if let Some(interval) = poll_interval {
        scheduler.add_job("intraday_snapshot", Schedule::Every(interval), move |_| {
            let manager = manager.clone();
            async move {
                manager
                    .update_daily_snapshot(None, min_value, None)
                    .await
                    .map(|_| ())
            }
        });
    }
}
