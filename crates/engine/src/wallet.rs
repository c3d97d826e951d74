use crate::cost::CostBasis;
use crate::quotes::QuoteService;
use crate::EngineError;
use folio_core::*;
use folio_exchanges::ExchangeSet;
use futures_util::future::join_all;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Free, used and total amounts of one asset.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Amounts {
    pub free: Decimal,
    pub used: Decimal,
    pub total: Decimal,
}

/// Re-key a raw exchange balance by canonical symbol, summing codes that
/// resolve to the same asset. Empty holdings are dropped.
pub fn canonical_balance(
    mapper: &SymbolMapper,
    exchange: ExchangeId,
    raw: &RawBalance,
) -> BTreeMap<String, Amounts> {
    let mut merged: BTreeMap<String, Amounts> = BTreeMap::new();
    for (code, total) in &raw.total {
        if *total <= Decimal::ZERO {
            continue;
        }
        let entry = merged.entry(mapper.canonical(exchange, code)).or_default();
        entry.free += raw.free_of(code);
        entry.used += raw.used_of(code);
        entry.total += *total;
    }
    merged
}

/// Balance normalization: turns raw exchange balances into valued holdings.
pub struct WalletService {
    quotes: QuoteService,
    costs: CostBasis,
    store: Arc<dyn SnapshotStore>,
    mapper: Arc<SymbolMapper>,
}

impl WalletService {
    pub fn new(store: Arc<dyn SnapshotStore>, mapper: Arc<SymbolMapper>) -> Self {
        Self {
            quotes: QuoteService::new(),
            costs: CostBasis::new(store.clone(), mapper.clone()),
            store,
            mapper,
        }
    }

    pub fn quotes(&self) -> &QuoteService {
        &self.quotes
    }

    pub fn mapper(&self) -> &SymbolMapper {
        &self.mapper
    }

    /// Price of `symbol` on `client`: the live ticker, or the daily close of
    /// the day containing `at`.
    async fn price_on(&self, client: &dyn ExchangeClient, symbol: &str, at: Option<i64>) -> Decimal {
        let pair = SymbolMapper::pair(symbol);
        match at {
            None => self.quotes.current_price(client, &pair).await,
            Some(ts) => {
                let day = day_start(ts);
                self.quotes
                    .last_close(client, &pair, Timeframe::D1, day, day)
                    .await
            }
        }
    }

    /// Price of `symbol`, asking the mapping's preferred venue when the
    /// holding exchange has no quote.
    async fn price(
        &self,
        client: &dyn ExchangeClient,
        exchanges: &ExchangeSet,
        symbol: &str,
        at: Option<i64>,
    ) -> Decimal {
        let price = self.price_on(client, symbol, at).await;
        if !price.is_zero() {
            return price;
        }

        let preferred = self
            .mapper
            .preferred_exchange(symbol)
            .filter(|id| *id != client.id())
            .and_then(|id| exchanges.get_by_id(id));
        match preferred {
            Some(venue) => {
                debug!(symbol, from = %client.id(), via = %venue.id(), "Pricing via preferred venue");
                self.price_on(venue.as_ref(), symbol, at).await
            }
            None => price,
        }
    }

    async fn process_asset(
        &self,
        client: &dyn ExchangeClient,
        exchanges: &ExchangeSet,
        symbol: &str,
        amounts: Amounts,
        at: Option<i64>,
    ) -> Result<AssetBalance, EngineError> {
        let exchange = client.id().as_str();

        let balance = if SymbolMapper::is_stablecoin(symbol) {
            AssetBalance::calculate(amounts.free, amounts.used, amounts.total, Decimal::ONE, Decimal::ONE)
        } else {
            let current_price = self.price(client, exchanges, symbol, at).await;
            let avg_price = self
                .costs
                .resolve(client, exchange, symbol, current_price)
                .await?;
            AssetBalance::calculate(amounts.free, amounts.used, amounts.total, avg_price, current_price)
        };

        self.store
            .upsert_asset(exchange, symbol, &balance, now_millis())
            .await?;
        Ok(balance)
    }

    /// Valued holdings of one exchange account, keyed by canonical symbol.
    ///
    /// Fails only when the balance itself cannot be fetched; an asset that
    /// fails to value is logged and left out.
    pub async fn exchange_assets(
        &self,
        client: &dyn ExchangeClient,
        exchanges: &ExchangeSet,
        at: Option<i64>,
    ) -> Result<BTreeMap<String, AssetBalance>, ExchangeError> {
        let raw = client.fetch_balance().await?;
        let holdings = canonical_balance(&self.mapper, client.id(), &raw);

        let results = join_all(holdings.iter().map(|(symbol, amounts)| async move {
            let result = self.process_asset(client, exchanges, symbol, *amounts, at).await;
            (symbol.clone(), result)
        }))
        .await;

        let mut assets = BTreeMap::new();
        for (symbol, result) in results {
            match result {
                Ok(balance) => {
                    assets.insert(symbol, balance);
                }
                Err(e) => warn!(exchange = %client.id(), %symbol, error = %e, "Failed to process asset"),
            }
        }
        Ok(assets)
    }

    /// Poll every exchange concurrently and aggregate the portfolio.
    ///
    /// Exchanges that fail are listed in `failures` and left out. Holdings
    /// worth less than `min_value` are hidden from the per-exchange listing
    /// (stablecoins always shown) but still count towards the summary.
    pub async fn collect(&self, exchanges: &ExchangeSet, min_value: Decimal, at: Option<i64>) -> PortfolioAssets {
        let results = join_all(exchanges.iter().map(|(name, client)| async move {
            (name.to_string(), self.exchange_assets(client.as_ref(), exchanges, at).await)
        }))
        .await;

        let mut portfolio = PortfolioAssets::default();
        let mut summary = PortfolioSummary::default();

        for (name, result) in results {
            let assets = match result {
                Ok(assets) => assets,
                Err(e) => {
                    warn!(exchange = %name, error = %e, "Failed to fetch balance");
                    portfolio.failures.insert(name, e.to_string());
                    continue;
                }
            };

            let mut listed = BTreeMap::new();
            for (symbol, balance) in assets {
                summary.add(&balance);
                if balance.value_in_usdt >= min_value || SymbolMapper::is_stablecoin(&symbol) {
                    listed.insert(symbol, balance);
                }
            }
            portfolio.exchanges.insert(name, listed);
        }

        portfolio.summary = summary.finish();
        info!(
            exchanges = portfolio.exchanges.len(),
            failures = portfolio.failures.len(),
            total = %portfolio.summary.total,
            "Collected portfolio"
        );
        portfolio
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_data::MemoryStore;
    use folio_exchanges::SimulatedExchange;
    use rust_decimal_macros::dec;

    fn service(store: Arc<MemoryStore>) -> WalletService {
        WalletService::new(store, Arc::new(SymbolMapper::default()))
    }

    #[test]
    fn test_canonical_balance_merges_aliases() {
        let mut raw = RawBalance::default();
        raw.insert("RNDR", dec!(1), dec!(0));
        raw.insert("RENDER", dec!(2), dec!(1));
        raw.insert("LDUSDT", dec!(5), dec!(0));
        raw.insert("USDT", dec!(10), dec!(0));
        raw.insert("DUST", dec!(0), dec!(0));

        let merged = canonical_balance(&SymbolMapper::default(), ExchangeId::Binance, &raw);
        assert_eq!(merged["RENDER"].total, dec!(4));
        assert_eq!(merged["RENDER"].used, dec!(1));
        assert_eq!(merged["USDT"].total, dec!(15));
        assert!(!merged.contains_key("DUST"));
    }

    #[tokio::test]
    async fn test_exchange_assets_values_holdings() {
        let store = Arc::new(MemoryStore::new());
        let wallet = service(store.clone());
        let exchange = SimulatedExchange::new(ExchangeId::Binance)
            .with_balance("BTC", dec!(1), dec!(0))
            .with_balance("USDC", dec!(20), dec!(0))
            .with_price("BTC/USDT", dec!(50000))
            .with_trades(
                "BTC/USDT",
                vec![TradeFill {
                    side: TradeSide::Buy,
                    amount: dec!(1),
                    cost: dec!(40000),
                    timestamp: 0,
                }],
            );

        let assets = wallet
            .exchange_assets(&exchange, &ExchangeSet::new(), None)
            .await
            .unwrap();
        assert_eq!(assets["BTC"].value_in_usdt, dec!(50000));
        assert_eq!(assets["BTC"].profit_usdt, dec!(10000));
        assert_eq!(assets["BTC"].roi, dec!(25));
        assert_eq!(assets["USDC"].avg_price, dec!(1));
        assert_eq!(store.all_assets().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_collect_tolerates_failing_exchange() {
        let wallet = service(Arc::new(MemoryStore::new()));
        let exchanges = ExchangeSet::new()
            .with(Arc::new(
                SimulatedExchange::new(ExchangeId::Binance)
                    .with_balance("ETH", dec!(1), dec!(0))
                    .with_balance("SHIB", dec!(10), dec!(0))
                    .with_balance("USDT", dec!(0.5), dec!(0))
                    .with_price("ETH/USDT", dec!(2000))
                    .with_price("SHIB/USDT", dec!(0.00001)),
            ))
            .with(Arc::new(SimulatedExchange::new(ExchangeId::Okx).failing_balance("timeout")));

        let portfolio = wallet.collect(&exchanges, dec!(1), None).await;

        assert!(portfolio.failures.contains_key("okx"));
        assert!(!portfolio.exchanges.contains_key("okx"));
        let binance = &portfolio.exchanges["binance"];
        assert!(binance.contains_key("ETH"));
        assert!(binance.contains_key("USDT"));
        assert!(!binance.contains_key("SHIB"));
        // Hidden dust still counts.
        assert_eq!(portfolio.summary.total, dec!(2000.5001));
    }

    #[tokio::test]
    async fn test_daily_close_pricing_and_preferred_venue() {
        let day = 10 * DAY_MS;
        let wallet = WalletService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SymbolMapper::new(
                SymbolMapping::from_json(r#"{"OKX": ["PI"]}"#).unwrap(),
            )),
        );
        let holder = Arc::new(
            SimulatedExchange::new(ExchangeId::Binance)
                .with_balance("PI", dec!(100), dec!(0))
                .with_balance("SOL", dec!(2), dec!(0))
                .with_daily_closes("SOL/USDT", day, &[dec!(150)]),
        );
        let okx = Arc::new(
            SimulatedExchange::new(ExchangeId::Okx)
                .with_price("PI/USDT", dec!(0.7))
                .with_daily_closes("PI/USDT", day, &[dec!(0.5)]),
        );
        let exchanges = ExchangeSet::new().with(holder.clone()).with(okx);

        let live = wallet.exchange_assets(holder.as_ref(), &exchanges, None).await.unwrap();
        assert_eq!(live["PI"].current_price, dec!(0.7));

        let past = wallet
            .exchange_assets(holder.as_ref(), &exchanges, Some(day + 3600_000))
            .await
            .unwrap();
        assert_eq!(past["SOL"].current_price, dec!(150));
        assert_eq!(past["PI"].current_price, dec!(0.5));
    }
}
