use crate::wallet::WalletService;
use crate::EngineError;
use folio_core::*;
use folio_exchanges::ExchangeSet;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Daily snapshots and the portfolio value history.
pub struct HistoryService {
    wallet: Arc<WalletService>,
    store: Arc<dyn SnapshotStore>,
}

impl HistoryService {
    pub fn new(wallet: Arc<WalletService>, store: Arc<dyn SnapshotStore>) -> Self {
        Self { wallet, store }
    }

    /// Write the snapshot of one UTC day: the day containing `at`, or today.
    ///
    /// Collects fresh assets when none are given. Returns `None` when no
    /// exchange could be collected.
    pub async fn update_daily_snapshot(
        &self,
        exchanges: &ExchangeSet,
        assets: Option<PortfolioAssets>,
        min_value: Decimal,
        at: Option<i64>,
    ) -> Result<Option<AssetSnapshot>, EngineError> {
        let assets = match assets {
            Some(assets) => assets,
            None => self.wallet.collect(exchanges, min_value, at).await,
        };
        if assets.is_empty() {
            warn!("No exchange data collected, snapshot skipped");
            return Ok(None);
        }

        let now = now_millis();
        let daily_timestamp = day_start(at.unwrap_or(now));
        let snapshot = AssetSnapshot::from_assets(&assets, daily_timestamp, now);
        self.store.upsert_snapshot(&snapshot).await?;

        info!(
            day = %millis_to_datetime(daily_timestamp).map(|d| d.date_naive().to_string()).unwrap_or_default(),
            total = %snapshot.summary.total,
            "Snapshot updated"
        );
        Ok(Some(snapshot))
    }

    pub async fn latest_snapshot(&self) -> Result<Option<AssetSnapshot>, EngineError> {
        Ok(self.store.latest_snapshot().await?)
    }

    /// Snapshots whose day lies between the days of `start` and `end`.
    pub async fn snapshots_between(&self, start: i64, end: i64) -> Result<Vec<AssetSnapshot>, EngineError> {
        Ok(self
            .store
            .snapshots_between(day_start(start), day_start(end))
            .await?)
    }

    /// Portfolio value over the last `period_days` days, oldest first.
    ///
    /// Days without a stored snapshot are estimated by revaluing the oldest
    /// snapshot's holdings with each day's close.
    pub async fn asset_history(
        &self,
        exchanges: &ExchangeSet,
        period_days: u32,
    ) -> Result<Vec<HistoryPoint>, EngineError> {
        let end = now_millis();
        let start = end - i64::from(period_days) * DAY_MS;
        let snapshots = self.snapshots_between(start, end).await?;

        if snapshots.len() >= period_days as usize {
            return Ok(snapshots.iter().map(AssetSnapshot::history_point).collect());
        }
        if snapshots.is_empty() {
            return Ok(Vec::new());
        }

        Ok(self
            .fill_history(exchanges, &snapshots, day_start(start), end)
            .await)
    }

    async fn fill_history(
        &self,
        exchanges: &ExchangeSet,
        snapshots: &[AssetSnapshot],
        start: i64,
        end: i64,
    ) -> Vec<HistoryPoint> {
        let mut points: BTreeMap<i64, PortfolioSummary> = snapshots
            .iter()
            .map(|s| (s.timestamp, s.summary.clone()))
            .collect();
        let mut estimated: BTreeMap<i64, PortfolioSummary> = BTreeMap::new();

        let Some(oldest) = snapshots.first() else {
            return Vec::new();
        };

        for (exchange, assets) in &oldest.exchanges {
            let Some(client) = exchanges.get(exchange) else {
                debug!(%exchange, "Exchange not configured, skipped in history fill");
                continue;
            };

            for (symbol, balance) in assets {
                if symbol == QUOTE {
                    continue;
                }
                let pair = SymbolMapper::pair(symbol);
                let candles = match self
                    .wallet
                    .quotes()
                    .price_history(client.as_ref(), &pair, Timeframe::D1, start, end)
                    .await
                {
                    Ok(candles) => candles,
                    Err(e) => {
                        warn!(%exchange, %pair, error = %e, "Failed to fetch price history");
                        continue;
                    }
                };

                for candle in candles {
                    if points.contains_key(&candle.timestamp) {
                        continue;
                    }
                    let value = balance.total * candle.close;
                    let initial = balance.initial_value();
                    let day = estimated.entry(candle.timestamp).or_default();
                    day.total += value;
                    day.initial += initial;
                    day.profit += value - initial;
                }
            }
        }

        for (timestamp, summary) in estimated {
            points.insert(timestamp, summary.finish());
        }

        points
            .into_iter()
            .map(|(timestamp, summary)| HistoryPoint { timestamp, summary })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_data::MemoryStore;
    use folio_exchanges::SimulatedExchange;
    use rust_decimal_macros::dec;

    fn setup(store: Arc<MemoryStore>) -> HistoryService {
        let wallet = Arc::new(WalletService::new(store.clone(), Arc::new(SymbolMapper::default())));
        HistoryService::new(wallet, store)
    }

    fn holdings(exchange: &str, symbol: &str, balance: AssetBalance) -> ExchangeHoldings {
        let mut assets = BTreeMap::new();
        assets.insert(symbol.to_string(), balance);
        let mut exchanges = ExchangeHoldings::new();
        exchanges.insert(exchange.to_string(), assets);
        exchanges
    }

    #[tokio::test]
    async fn test_update_daily_snapshot_keys_by_day() {
        let store = Arc::new(MemoryStore::new());
        let history = setup(store.clone());
        let exchanges = ExchangeSet::new().with(Arc::new(
            SimulatedExchange::new(ExchangeId::Bybit).with_balance("USDT", dec!(100), dec!(0)),
        ));

        let at = 20 * DAY_MS + 5 * 3_600_000;
        let snapshot = history
            .update_daily_snapshot(&exchanges, None, dec!(1), Some(at))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.timestamp, 20 * DAY_MS);
        assert_eq!(snapshot.summary.total, dec!(100));

        // Same day again replaces the document.
        history
            .update_daily_snapshot(&exchanges, None, dec!(1), Some(at + 1))
            .await
            .unwrap();
        assert_eq!(store.snapshot_count().await, 1);
    }

    #[tokio::test]
    async fn test_no_exchanges_means_no_snapshot() {
        let history = setup(Arc::new(MemoryStore::new()));
        let result = history
            .update_daily_snapshot(&ExchangeSet::new(), None, dec!(1), None)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_history_empty_without_snapshots() {
        let history = setup(Arc::new(MemoryStore::new()));
        let points = history.asset_history(&ExchangeSet::new(), 30).await.unwrap();
        assert!(points.is_empty());
    }

    #[tokio::test]
    async fn test_history_gap_fill_merges_and_sorts() {
        let store = Arc::new(MemoryStore::new());
        let history = setup(store.clone());

        let today = day_start(now_millis());
        let first = today - 3 * DAY_MS;
        let btc = AssetBalance::calculate(dec!(2), dec!(0), dec!(2), dec!(10), dec!(12));
        let usdt = AssetBalance::calculate(dec!(5), dec!(0), dec!(5), dec!(1), dec!(1));
        let mut exchanges_held = holdings("binance", "BTC", btc.clone());
        exchanges_held.get_mut("binance").unwrap().insert("USDT".into(), usdt);

        let mut summary = PortfolioSummary::default();
        summary.add(&btc);
        let stored = AssetSnapshot {
            timestamp: first,
            exchanges: exchanges_held,
            summary: summary.finish(),
            update_time: first,
        };
        store.upsert_snapshot(&stored).await.unwrap();

        let exchanges = ExchangeSet::new().with(Arc::new(
            SimulatedExchange::new(ExchangeId::Binance).with_daily_closes(
                "BTC/USDT",
                first,
                &[dec!(11), dec!(15), dec!(5), dec!(20)],
            ),
        ));

        let points = history.asset_history(&exchanges, 30).await.unwrap();
        let stamps: Vec<i64> = points.iter().map(|p| p.timestamp).collect();
        assert_eq!(stamps, vec![first, first + DAY_MS, first + 2 * DAY_MS, today]);

        // The stored day keeps its own summary.
        assert_eq!(points[0].summary.total, dec!(24));
        // Estimated days revalue 2 BTC at the close; USDT is not counted.
        assert_eq!(points[1].summary.total, dec!(30));
        assert_eq!(points[1].summary.profit, dec!(10));
        assert_eq!(points[1].summary.roi, dec!(50));
        assert_eq!(points[2].summary.profit, dec!(-10));
        assert_eq!(points[2].summary.roi, dec!(-50));
        assert_eq!(points[3].summary.total, dec!(40));
    }
}
