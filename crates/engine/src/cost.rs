use folio_core::*;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

/// `update_by` marker for cost bases derived from trade history.
pub const UPDATED_BY_SERVER: &str = "Server";

/// Average acquisition price from the account's fills.
///
/// Buys add their cost and amount, sells subtract them. When the net amount
/// is zero (no trades, or everything sold) the `fallback` price is used.
pub fn average_cost(trades: &[TradeFill], fallback: Decimal) -> Decimal {
    let (cost, amount) = trades
        .iter()
        .fold((Decimal::ZERO, Decimal::ZERO), |(cost, amount), t| match t.side {
            TradeSide::Buy => (cost + t.cost, amount + t.amount),
            TradeSide::Sell => (cost - t.cost, amount - t.amount),
        });
    if amount.is_zero() {
        fallback
    } else {
        cost / amount
    }
}

/// Resolves and persists the cost basis of holdings.
#[derive(Clone)]
pub struct CostBasis {
    store: Arc<dyn SnapshotStore>,
    mapper: Arc<SymbolMapper>,
}

impl CostBasis {
    pub fn new(store: Arc<dyn SnapshotStore>, mapper: Arc<SymbolMapper>) -> Self {
        Self { store, mapper }
    }

    /// The account's fills on `pair`, falling back to the pair's former
    /// ticker when the current one has none. Errors read as no history.
    pub async fn trade_history(&self, client: &dyn ExchangeClient, pair: &str) -> Vec<TradeFill> {
        if !client.has_my_trades() {
            return Vec::new();
        }

        let mut trades = self.fetch_trades(client, pair).await;
        if trades.is_empty() {
            if let Some(alternative) = self.mapper.trade_alternative(pair) {
                debug!(exchange = %client.id(), pair, alternative, "Trying former ticker");
                trades = self.fetch_trades(client, alternative).await;
            }
        }
        trades
    }

    async fn fetch_trades(&self, client: &dyn ExchangeClient, pair: &str) -> Vec<TradeFill> {
        client.fetch_my_trades(pair).await.unwrap_or_else(|e| {
            warn!(exchange = %client.id(), pair, error = %e, "Failed to fetch trade history");
            Vec::new()
        })
    }

    /// Stored cost basis of `symbol`, or one computed from trade history
    /// and persisted with `update_by = "Server"`.
    pub async fn resolve(
        &self,
        client: &dyn ExchangeClient,
        exchange: &str,
        symbol: &str,
        current_price: Decimal,
    ) -> Result<Decimal, StoreError> {
        if let Some(cost) = self.store.asset_cost(exchange, symbol).await? {
            return Ok(cost.avg_price);
        }

        let trades = self.trade_history(client, &SymbolMapper::pair(symbol)).await;
        let avg_price = average_cost(&trades, current_price);

        // A zero basis means the price was unavailable; leave it unset so the
        // next run retries.
        if !avg_price.is_zero() {
            self.store
                .upsert_asset_cost(exchange, symbol, avg_price, UPDATED_BY_SERVER)
                .await?;
        }
        Ok(avg_price)
    }
}
