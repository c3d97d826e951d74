use folio_core::Settings;
use folio_engine::AssetManager;
use folio_exchanges::UsdtTwdRate;
use std::sync::Arc;

/// Shared application state accessible by all route handlers.
pub struct AppState {
    pub manager: Arc<AssetManager>,
    /// Server-side settings, used by `/initialize` to rebuild exchanges.
    pub settings: Settings,
    pub fx: UsdtTwdRate,
}

impl AppState {
    pub fn new(manager: Arc<AssetManager>, settings: Settings, fx: UsdtTwdRate) -> Self {
        Self {
            manager,
            settings,
            fx,
        }
    }
}
