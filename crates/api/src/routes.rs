use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use folio_core::{now_millis, Credentials};
use folio_exchanges::{ClientConfig, ExchangeSet};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// `/assets` serves the latest snapshot while it is younger than this.
pub const ASSETS_CACHE_TTL_MS: i64 = 60_000;

/// Accepted `period` range of `/asset_history`, in days.
pub const HISTORY_PERIOD_DAYS: std::ops::RangeInclusive<u32> = 30..=365;

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Health
        .route("/health", get(health_check))
        // Exchange connections
        .route("/update_exchange_settings", post(update_exchange_settings))
        .route("/initialize", get(initialize_exchanges))
        .route("/ping", get(ping_exchanges))
        // Portfolio
        .route("/assets", get(get_assets))
        .route("/asset_history", get(get_asset_history))
        // Rates
        .route("/exchange_rate/usdt_twd", get(get_usdt_twd_rate))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let exchanges: Vec<String> = state
        .manager
        .exchanges()
        .await
        .names()
        .map(str::to_string)
        .collect();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "exchanges": exchanges,
    }))
}

// ---------------------------------------------------------------------------
// Exchange connections
// ---------------------------------------------------------------------------

/// Credentials keyed by exchange name, either wrapped in `exchanges` or bare.
#[derive(Deserialize)]
#[serde(untagged)]
enum ExchangeSettingsBody {
    Wrapped {
        exchanges: BTreeMap<String, Credentials>,
    },
    Bare(BTreeMap<String, Credentials>),
}

impl ExchangeSettingsBody {
    fn into_credentials(self) -> BTreeMap<String, Credentials> {
        match self {
            ExchangeSettingsBody::Wrapped { exchanges } => exchanges,
            ExchangeSettingsBody::Bare(exchanges) => exchanges,
        }
    }
}

async fn update_exchange_settings(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ExchangeSettingsBody>,
) -> impl IntoResponse {
    let config = ClientConfig::from_settings(&state.settings);
    let exchanges = ExchangeSet::from_credentials(&body.into_credentials(), &config);
    state.manager.replace_exchanges(exchanges).await;

    let Some(results) = state.manager.ping_all().await else {
        return Json(serde_json::json!({
            "status": "error",
            "message": "No valid exchange credentials provided",
        }));
    };

    let failed: Vec<&str> = results
        .iter()
        .filter(|(_, ok)| !**ok)
        .map(|(name, _)| name.as_str())
        .collect();
    if !failed.is_empty() {
        warn!(exchanges = ?failed, "Exchange connection check failed");
        return Json(serde_json::json!({
            "status": "error",
            "message": format!("Failed to connect to exchanges: {}", failed.join(", ")),
        }));
    }

    info!(exchanges = results.len(), "API keys updated");
    Json(serde_json::json!({
        "status": "success",
        "message": "API keys set successfully",
    }))
}

async fn initialize_exchanges(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state
        .manager
        .replace_exchanges(ExchangeSet::from_settings(&state.settings))
        .await;
    Json(serde_json::json!({
        "status": "success",
        "message": "Exchanges initialized successfully",
    }))
}

async fn ping_exchanges(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let results = state.manager.ping_all().await.unwrap_or_default();
    Json(serde_json::json!({
        "status": "success",
        "data": results,
    }))
}

// ---------------------------------------------------------------------------
// Portfolio
// ---------------------------------------------------------------------------

fn default_min_value() -> Decimal {
    Decimal::ONE
}

#[derive(Deserialize)]
struct AssetsQuery {
    #[serde(default = "default_min_value")]
    min_value: Decimal,
}

async fn get_assets(
    State(state): State<Arc<AppState>>,
    query: Result<Query<AssetsQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query.map_err(ApiError::from)?;
    let latest = state
        .manager
        .latest_snapshot()
        .await
        .map_err(ApiError::internal("Failed to fetch assets"))?;

    if let Some(snapshot) = latest.filter(|s| s.is_fresh(now_millis(), ASSETS_CACHE_TTL_MS)) {
        return Ok(Json(serde_json::json!({
            "status": "success",
            "data": snapshot.to_assets(),
        })));
    }

    let assets = state.manager.collect_assets(query.min_value, None).await;
    state
        .manager
        .update_daily_snapshot(Some(assets.clone()), query.min_value, None)
        .await
        .map_err(ApiError::internal("Failed to fetch assets"))?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "data": assets,
    })))
}

#[derive(Deserialize)]
struct HistoryQuery {
    period: Option<u32>,
}

async fn get_asset_history(
    State(state): State<Arc<AppState>>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query.map_err(ApiError::from)?;
    let period = query.period.unwrap_or(*HISTORY_PERIOD_DAYS.start());
    if !HISTORY_PERIOD_DAYS.contains(&period) {
        return Err(ApiError::Validation(format!(
            "period must be between {} and {} days",
            HISTORY_PERIOD_DAYS.start(),
            HISTORY_PERIOD_DAYS.end()
        )));
    }

    let history = state
        .manager
        .asset_history(period)
        .await
        .map_err(ApiError::internal("Failed to fetch asset history"))?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "data": history,
    })))
}

// ---------------------------------------------------------------------------
// Rates
// ---------------------------------------------------------------------------

async fn get_usdt_twd_rate(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let quote = state
        .fx
        .quote()
        .await
        .ok_or_else(|| ApiError::Unavailable("Could not fetch exchange rate".into()))?;
    Ok(Json(serde_json::json!({
        "status": "success",
        "data": quote,
    })))
}
