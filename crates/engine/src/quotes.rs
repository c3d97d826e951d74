use folio_core::*;
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// Largest number of candles requested in one call.
pub const MAX_CANDLES_PER_REQUEST: usize = 1000;

/// Number of candles from `since` through `end`, both inclusive.
pub fn period_count(since: i64, end: i64, timeframe: Timeframe) -> i64 {
    let width = timeframe.millis();
    ((end + width - since) / width).max(0)
}

/// Split a candle range into `(since, limit)` requests of at most
/// [`MAX_CANDLES_PER_REQUEST`] candles.
pub fn chunk_plan(since: i64, end: i64, timeframe: Timeframe) -> Vec<(i64, usize)> {
    let width = timeframe.millis();
    let periods = period_count(since, end, timeframe);
    let chunk = MAX_CANDLES_PER_REQUEST as i64;

    (0..(periods + chunk - 1) / chunk)
        .map(|i| {
            let start = since + i * chunk * width;
            let limit = chunk.min(periods - i * chunk);
            (start, limit as usize)
        })
        .collect()
}

/// Market data lookups on top of an [`ExchangeClient`].
#[derive(Debug, Clone, Default)]
pub struct QuoteService;

impl QuoteService {
    pub fn new() -> Self {
        Self
    }

    /// Last traded price, or zero when the exchange cannot quote the pair.
    pub async fn current_price(&self, client: &dyn ExchangeClient, pair: &str) -> Decimal {
        match client.fetch_ticker_price(pair).await {
            Ok(price) => price,
            Err(e) => {
                warn!(exchange = %client.id(), pair, error = %e, "Failed to fetch ticker");
                Decimal::ZERO
            }
        }
    }

    /// Candles from `since` through `end` (inclusive), oldest first.
    pub async fn price_history(
        &self,
        client: &dyn ExchangeClient,
        pair: &str,
        timeframe: Timeframe,
        since: i64,
        end: i64,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let mut candles = Vec::new();
        for (chunk_since, limit) in chunk_plan(since, end, timeframe) {
            let chunk = client.fetch_ohlcv(pair, timeframe, chunk_since, limit).await?;
            if chunk.is_empty() {
                break;
            }
            candles.extend(chunk);
        }
        debug!(exchange = %client.id(), pair, count = candles.len(), "Fetched price history");
        Ok(candles)
    }

    /// Close of the last candle in the range; zero when there is none.
    pub async fn last_close(
        &self,
        client: &dyn ExchangeClient,
        pair: &str,
        timeframe: Timeframe,
        since: i64,
        end: i64,
    ) -> Decimal {
        match self.price_history(client, pair, timeframe, since, end).await {
            Ok(candles) => candles.last().map(|c| c.close).unwrap_or_default(),
            Err(e) => {
                warn!(exchange = %client.id(), pair, error = %e, "Failed to fetch price history");
                Decimal::ZERO
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_exchanges::SimulatedExchange;
    use rust_decimal_macros::dec;

    #[test]
    fn test_period_count_includes_end() {
        assert_eq!(period_count(0, 0, Timeframe::D1), 1);
        assert_eq!(period_count(0, 2 * DAY_MS, Timeframe::D1), 3);
        assert_eq!(period_count(DAY_MS, 0, Timeframe::D1), 0);
    }

    #[test]
    fn test_chunk_plan_splits_by_thousand() {
        let end = 2499 * 60_000;
        let plan = chunk_plan(0, end, Timeframe::M1);
        assert_eq!(plan, vec![(0, 1000), (1000 * 60_000, 1000), (2000 * 60_000, 500)]);
        assert!(chunk_plan(10, 0, Timeframe::M1).is_empty());
    }

    #[tokio::test]
    async fn test_last_close_of_single_day() {
        let exchange = SimulatedExchange::new(ExchangeId::Binance).with_daily_closes(
            "BTC/USDT",
            0,
            &[dec!(100), dec!(110), dec!(120)],
        );
        let quotes = QuoteService::new();
        let close = quotes
            .last_close(&exchange, "BTC/USDT", Timeframe::D1, DAY_MS, DAY_MS)
            .await;
        assert_eq!(close, dec!(110));

        let history = quotes
            .price_history(&exchange, "BTC/USDT", Timeframe::D1, 0, 2 * DAY_MS)
            .await
            .unwrap();
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn test_failures_read_as_zero() {
        let exchange = SimulatedExchange::new(ExchangeId::Okx)
            .with_price("ETH/USDT", dec!(3000))
            .failing_pair("ETH/USDT");
        let quotes = QuoteService::new();
        assert_eq!(quotes.current_price(&exchange, "ETH/USDT").await, Decimal::ZERO);
        assert_eq!(
            quotes.last_close(&exchange, "ETH/USDT", Timeframe::D1, 0, 0).await,
            Decimal::ZERO
        );
    }
}
