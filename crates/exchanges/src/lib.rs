//! Exchange client adapters.
//!
//! Signed REST clients for Binance, OKX, Bybit, Bitget, MEXC and Gate.io,
//! all behind [`folio_core::ExchangeClient`], plus the public Upbit listing,
//! the USDT/TWD rate source and a simulated exchange.

pub mod binance;
pub mod bitget;
pub mod bybit;
pub mod fx;
pub mod gateio;
pub mod okx;
pub mod simulated;
pub mod transport;
pub mod upbit;

pub use fx::{FxQuote, UsdtTwdRate};
pub use simulated::SimulatedExchange;
pub use transport::ClientConfig;

use folio_core::{Credentials, ExchangeClient, ExchangeError, ExchangeId, Settings};
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Build the REST client for one exchange.
pub fn build_client(
    id: ExchangeId,
    credentials: Credentials,
    config: &ClientConfig,
) -> Result<Arc<dyn ExchangeClient>, ExchangeError> {
    let client: Arc<dyn ExchangeClient> = match id {
        ExchangeId::Binance => Arc::new(binance::BinanceClient::new(
            binance::BinanceFlavor::binance(),
            credentials,
            config,
        )?),
        ExchangeId::Mexc => Arc::new(binance::BinanceClient::new(
            binance::BinanceFlavor::mexc(),
            credentials,
            config,
        )?),
        ExchangeId::Okx => Arc::new(okx::OkxClient::new(credentials, config)?),
        ExchangeId::Bybit => Arc::new(bybit::BybitClient::new(credentials, config)?),
        ExchangeId::Bitget => Arc::new(bitget::BitgetClient::new(credentials, config)?),
        ExchangeId::Gateio => Arc::new(gateio::GateioClient::new(credentials, config)?),
    };
    Ok(client)
}

/// The configured exchange connections, keyed by lowercase exchange id.
#[derive(Clone, Default)]
pub struct ExchangeSet {
    clients: BTreeMap<String, Arc<dyn ExchangeClient>>,
}

impl ExchangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a client under its exchange id.
    pub fn insert(&mut self, client: Arc<dyn ExchangeClient>) {
        self.clients.insert(client.id().to_string(), client);
    }

    pub fn with(mut self, client: Arc<dyn ExchangeClient>) -> Self {
        self.insert(client);
        self
    }

    /// Clients for every exchange with credentials in `settings`.
    pub fn from_settings(settings: &Settings) -> Self {
        let config = ClientConfig::from_settings(settings);
        let mut set = Self::new();
        for (id, credentials) in settings.configured_exchanges() {
            set.add_configured(id, credentials.clone(), &config);
        }
        set
    }

    /// Clients from a name -> credentials map, e.g. an API request body.
    /// Unknown exchange names are skipped.
    pub fn from_credentials(credentials: &BTreeMap<String, Credentials>, config: &ClientConfig) -> Self {
        let mut set = Self::new();
        for (name, creds) in credentials {
            match name.parse::<ExchangeId>() {
                Ok(id) => set.add_configured(id, creds.clone(), config),
                Err(_) => warn!(exchange = %name, "Unsupported exchange, skipping"),
            }
        }
        set
    }

    fn add_configured(&mut self, id: ExchangeId, credentials: Credentials, config: &ClientConfig) {
        if credentials.is_empty() {
            warn!(exchange = %id, "Missing API key or secret, skipping");
            return;
        }
        if id.needs_password() && credentials.password.as_deref().unwrap_or_default().is_empty() {
            warn!(exchange = %id, "Missing API passphrase, skipping");
            return;
        }
        match build_client(id, credentials, config) {
            Ok(client) => {
                info!(exchange = %id, "Exchange client initialized");
                self.insert(client);
            }
            Err(e) => warn!(exchange = %id, error = %e, "Failed to initialize exchange client"),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ExchangeClient>> {
        let key = name
            .parse::<ExchangeId>()
            .map(|id| id.to_string())
            .unwrap_or_else(|_| name.to_lowercase());
        self.clients.get(&key).cloned()
    }

    pub fn get_by_id(&self, id: ExchangeId) -> Option<Arc<dyn ExchangeClient>> {
        self.clients.get(id.as_str()).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn ExchangeClient>)> {
        self.clients.iter().map(|(name, client)| (name.as_str(), client))
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Ping every exchange concurrently. `None` when nothing is configured.
    pub async fn ping_all(&self) -> Option<BTreeMap<String, bool>> {
        if self.is_empty() {
            return None;
        }
        let results = join_all(self.clients.iter().map(|(name, client)| async move {
            (name.clone(), client.ping().await)
        }))
        .await;
        Some(results.into_iter().collect())
    }

    pub async fn close_all(&self) {
        join_all(self.clients.values().map(|client| client.close())).await;
    }
}
