use async_trait::async_trait;
use folio_core::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// An in-memory exchange with canned balances and market data.
///
/// Used by tests and by `--dry-run`, where no exchange is contacted.
/// Failures can be injected per operation to exercise partial-failure paths.
pub struct SimulatedExchange {
    id: ExchangeId,
    balance: RawBalance,
    prices: HashMap<String, Decimal>,
    candles: HashMap<String, Vec<Candle>>,
    trades: HashMap<String, Vec<TradeFill>>,
    quote_symbols: Vec<String>,
    /// Generate flat candles at the ticker price for pairs without candles.
    synthetic_candles: bool,
    has_trades: bool,
    balance_error: Option<String>,
    failing_pairs: HashSet<String>,
    balance_calls: AtomicUsize,
}

impl SimulatedExchange {
    pub fn new(id: ExchangeId) -> Self {
        Self {
            id,
            balance: RawBalance::default(),
            prices: HashMap::new(),
            candles: HashMap::new(),
            trades: HashMap::new(),
            quote_symbols: Vec::new(),
            synthetic_candles: false,
            has_trades: true,
            balance_error: None,
            failing_pairs: HashSet::new(),
            balance_calls: AtomicUsize::new(0),
        }
    }

    /// A small demo account for dry runs.
    pub fn demo(id: ExchangeId) -> Self {
        let mut exchange = Self::new(id)
            .with_balance("BTC", dec!(0.25), Decimal::ZERO)
            .with_balance("ETH", dec!(2), dec!(0.5))
            .with_balance("USDT", dec!(1500), Decimal::ZERO)
            .with_price("BTC/USDT", dec!(65000))
            .with_price("ETH/USDT", dec!(3200))
            .with_trades(
                "BTC/USDT",
                vec![TradeFill {
                    side: TradeSide::Buy,
                    amount: dec!(0.25),
                    cost: dec!(12500),
                    timestamp: 0,
                }],
            )
            .with_quote_symbols(&["BTC", "ETH"]);
        exchange.synthetic_candles = true;
        exchange
    }

    pub fn with_balance(mut self, asset: &str, free: Decimal, used: Decimal) -> Self {
        self.balance.insert(asset, free, used);
        self
    }

    pub fn with_price(mut self, pair: &str, price: Decimal) -> Self {
        self.prices.insert(pair.to_string(), price);
        self
    }

    pub fn with_candles(mut self, pair: &str, candles: Vec<Candle>) -> Self {
        self.candles.insert(pair.to_string(), candles);
        self
    }

    /// One daily candle per close, starting at the UTC day of `first_day`.
    pub fn with_daily_closes(self, pair: &str, first_day: i64, closes: &[Decimal]) -> Self {
        let start = day_start(first_day);
        let candles = closes
            .iter()
            .enumerate()
            .map(|(i, close)| flat_candle(start + i as i64 * DAY_MS, *close))
            .collect();
        self.with_candles(pair, candles)
    }

    pub fn with_trades(mut self, pair: &str, fills: Vec<TradeFill>) -> Self {
        self.trades.insert(pair.to_string(), fills);
        self
    }

    pub fn with_quote_symbols(mut self, symbols: &[&str]) -> Self {
        self.quote_symbols = symbols.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Make `fetch_my_trades` unsupported.
    pub fn without_trade_history(mut self) -> Self {
        self.has_trades = false;
        self
    }

    /// Make every balance request fail with `message`.
    pub fn failing_balance(mut self, message: &str) -> Self {
        self.balance_error = Some(message.to_string());
        self
    }

    /// Make price and candle requests for `pair` fail.
    pub fn failing_pair(mut self, pair: &str) -> Self {
        self.failing_pairs.insert(pair.to_string());
        self
    }

    /// Number of balance requests served so far.
    pub fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }

    fn check_pair(&self, pair: &str) -> Result<(), ExchangeError> {
        if self.failing_pairs.contains(pair) {
            return Err(ExchangeError::api("503", format!("{} unavailable", pair)));
        }
        Ok(())
    }
}

fn flat_candle(timestamp: i64, price: Decimal) -> Candle {
    Candle {
        timestamp,
        open: price,
        high: price,
        low: price,
        close: price,
        volume: Decimal::ONE,
    }
}

#[async_trait]
impl ExchangeClient for SimulatedExchange {
    fn id(&self) -> ExchangeId {
        self.id
    }

    async fn fetch_balance(&self) -> Result<RawBalance, ExchangeError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        match &self.balance_error {
            Some(message) => Err(ExchangeError::Http(message.clone())),
            None => Ok(self.balance.clone()),
        }
    }

    async fn fetch_ticker_price(&self, pair: &str) -> Result<Decimal, ExchangeError> {
        self.check_pair(pair)?;
        self.prices
            .get(pair)
            .copied()
            .ok_or_else(|| ExchangeError::api("404", format!("Unknown pair {}", pair)))
    }

    async fn fetch_ohlcv(
        &self,
        pair: &str,
        timeframe: Timeframe,
        since: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        self.check_pair(pair)?;
        if let Some(candles) = self.candles.get(pair) {
            return Ok(candles
                .iter()
                .filter(|c| c.timestamp >= since)
                .take(limit)
                .cloned()
                .collect());
        }

        match (self.synthetic_candles, self.prices.get(pair)) {
            (true, Some(price)) => {
                let width = timeframe.millis();
                let now = now_millis();
                let first = since.div_euclid(width) * width;
                Ok((0..limit as i64)
                    .map(|i| first + i * width)
                    .take_while(|ts| *ts <= now)
                    .map(|ts| flat_candle(ts, *price))
                    .collect())
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn fetch_my_trades(&self, pair: &str) -> Result<Vec<TradeFill>, ExchangeError> {
        if !self.has_trades {
            return Err(ExchangeError::Unsupported("fetch_my_trades".into()));
        }
        Ok(self.trades.get(pair).cloned().unwrap_or_default())
    }

    fn has_my_trades(&self) -> bool {
        self.has_trades
    }

    async fn fetch_quote_symbols(&self) -> Result<Vec<String>, ExchangeError> {
        Ok(self.quote_symbols.clone())
    }
}
