use crate::transport::{self, ClientConfig, HttpTransport};
use folio_core::{now_millis, ExchangeError};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

const MAX_API: &str = "https://max-api.maicoin.com";
const CACHE_TTL: Duration = Duration::from_secs(300);

/// A USDT->TWD quote and when it was fetched (epoch ms).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FxQuote {
    pub rate: Decimal,
    pub timestamp: i64,
}

struct Cached {
    quote: FxQuote,
    fetched: Instant,
}

/// USDT/TWD rate from the MAX exchange's last trade, cached for five minutes.
///
/// A failed refresh keeps serving the previous value.
pub struct UsdtTwdRate {
    transport: HttpTransport,
    ttl: Duration,
    cache: Mutex<Option<Cached>>,
}

impl UsdtTwdRate {
    pub fn new(config: &ClientConfig) -> Result<Self, ExchangeError> {
        Self::with_base_url(MAX_API, config)
    }

    pub fn with_base_url(base_url: &str, config: &ClientConfig) -> Result<Self, ExchangeError> {
        Ok(Self {
            transport: HttpTransport::new(base_url, config)?,
            ttl: CACHE_TTL,
            cache: Mutex::new(None),
        })
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Prime the cache with a known rate.
    pub async fn seed(&self, rate: Decimal) {
        *self.cache.lock().await = Some(Cached {
            quote: FxQuote {
                rate,
                timestamp: now_millis(),
            },
            fetched: Instant::now(),
        });
    }

    /// Current rate, refreshing when the cache is stale.
    pub async fn quote(&self) -> Option<FxQuote> {
        let mut cache = self.cache.lock().await;
        let stale = cache
            .as_ref()
            .map_or(true, |c| c.fetched.elapsed() > self.ttl);

        if stale {
            match self.fetch().await {
                Ok(rate) => {
                    debug!(%rate, "Refreshed USDT/TWD rate");
                    *cache = Some(Cached {
                        quote: FxQuote {
                            rate,
                            timestamp: now_millis(),
                        },
                        fetched: Instant::now(),
                    });
                }
                Err(e) => warn!(error = %e, "Failed to refresh USDT/TWD rate"),
            }
        }

        cache.as_ref().map(|c| c.quote)
    }

    async fn fetch(&self) -> Result<Decimal, ExchangeError> {
        let value = self
            .transport
            .get_public("/api/v3/trades", "market=usdttwd&limit=1")
            .await?;
        parse_last_trade(&value)
    }
}

fn parse_last_trade(value: &Value) -> Result<Decimal, ExchangeError> {
    let trade = transport::array(value, "")?
        .first()
        .ok_or_else(|| ExchangeError::Parse("No USDT/TWD trades".into()))?;
    transport::decimal_field(trade, "price")
}
