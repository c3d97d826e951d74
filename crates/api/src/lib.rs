pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use state::AppState;

use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Default listen address of the API server.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5001";

/// Build the Axum application router, all routes under the settings' prefix.
pub fn build_router(state: Arc<AppState>) -> Router {
    let prefix = state.settings.api_prefix();

    Router::new()
        .nest(&prefix, routes::api_routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the API server and serve until `shutdown` resolves.
pub async fn start_server<F>(state: Arc<AppState>, bind_addr: &str, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("API server listening on {}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use folio_core::{now_millis, AssetSnapshot, ExchangeId, PortfolioAssets, Settings, SnapshotStore, SymbolMapper};
    use folio_data::MemoryStore;
    use folio_engine::AssetManager;
    use folio_exchanges::{ClientConfig, ExchangeSet, SimulatedExchange, UsdtTwdRate};
    use rust_decimal_macros::dec;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    fn offline_fx() -> UsdtTwdRate {
        let config = ClientConfig {
            timeout: Duration::from_millis(500),
            rate_limit: None,
        };
        UsdtTwdRate::with_base_url("http://127.0.0.1:9", &config).unwrap()
    }

    fn app_state(store: Arc<MemoryStore>, exchanges: ExchangeSet) -> Arc<AppState> {
        let manager = Arc::new(AssetManager::new(store, SymbolMapper::default(), exchanges));
        Arc::new(AppState::new(manager, Settings::default(), offline_fx()))
    }

    async fn call(state: &Arc<AppState>, request: Request<Body>) -> (StatusCode, Value) {
        let response = build_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn get(state: &Arc<AppState>, uri: &str) -> (StatusCode, Value) {
        call(state, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }

    async fn post_json(state: &Arc<AppState>, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        call(state, request).await
    }

    #[tokio::test]
    async fn test_health() {
        let state = app_state(
            Arc::new(MemoryStore::new()),
            ExchangeSet::new().with(Arc::new(SimulatedExchange::new(ExchangeId::Bybit))),
        );
        let (status, body) = get(&state, "/api/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["exchanges"][0], "bybit");
    }

    #[tokio::test]
    async fn test_ping_reports_each_exchange() {
        let state = app_state(
            Arc::new(MemoryStore::new()),
            ExchangeSet::new()
                .with(Arc::new(SimulatedExchange::new(ExchangeId::Binance)))
                .with(Arc::new(
                    SimulatedExchange::new(ExchangeId::Okx).failing_balance("invalid key"),
                )),
        );
        let (status, body) = get(&state, "/api/v1/ping").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["data"]["binance"], true);
        assert_eq!(body["data"]["okx"], false);
    }

    #[tokio::test]
    async fn test_assets_cached_for_a_minute() {
        let store = Arc::new(MemoryStore::new());
        let exchange = Arc::new(SimulatedExchange::demo(ExchangeId::Binance));
        let state = app_state(store.clone(), ExchangeSet::new().with(exchange.clone()));

        let (status, body) = get(&state, "/api/v1/assets?min_value=5").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert!(body["data"]["exchanges"]["binance"]["BTC"].is_object());
        assert_eq!(store.snapshot_count().await, 1);
        let calls = exchange.balance_calls();

        // Served from the fresh snapshot, no new exchange calls.
        let (status, cached) = get(&state, "/api/v1/assets").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cached["data"]["summary"], body["data"]["summary"]);
        assert_eq!(exchange.balance_calls(), calls);
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_recollected() {
        let store = Arc::new(MemoryStore::new());
        let stale = AssetSnapshot::from_assets(
            &PortfolioAssets::default(),
            folio_core::day_start(now_millis()),
            now_millis() - 2 * routes::ASSETS_CACHE_TTL_MS,
        );
        store.upsert_snapshot(&stale).await.unwrap();

        let exchange = Arc::new(
            SimulatedExchange::new(ExchangeId::Mexc).with_balance("USDT", dec!(42), dec!(0)),
        );
        let state = app_state(store.clone(), ExchangeSet::new().with(exchange.clone()));

        let (status, body) = get(&state, "/api/v1/assets").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["summary"]["total"], "42");
        assert!(exchange.balance_calls() > 0);

        let latest = store.latest_snapshot().await.unwrap().unwrap();
        assert_eq!(latest.summary.total, dec!(42));
    }

    #[tokio::test]
    async fn test_asset_history_validates_period() {
        let state = app_state(Arc::new(MemoryStore::new()), ExchangeSet::new());

        let (status, body) = get(&state, "/api/v1/asset_history?period=7").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"].as_str().unwrap().contains("period"));

        let (status, _) = get(&state, "/api/v1/asset_history?period=366").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        for uri in [
            "/api/v1/asset_history?period=-1",
            "/api/v1/asset_history?period=abc",
            "/api/v1/assets?min_value=abc",
        ] {
            let (status, body) = get(&state, uri).await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{}", uri);
            assert!(body["detail"].is_string(), "{}", uri);
        }

        let (status, body) = get(&state, "/api/v1/asset_history").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_update_exchange_settings_replaces_set() {
        let state = app_state(
            Arc::new(MemoryStore::new()),
            ExchangeSet::new().with(Arc::new(SimulatedExchange::new(ExchangeId::Binance))),
        );

        let (status, body) = post_json(
            &state,
            "/api/v1/update_exchange_settings",
            serde_json::json!({ "exchanges": { "kraken": { "api_key": "k", "secret": "s" } } }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "error");
        assert!(state.manager.exchanges().await.is_empty());

        // A bare name -> credentials map is accepted too.
        let (status, body) = post_json(
            &state,
            "/api/v1/update_exchange_settings",
            serde_json::json!({ "okx": { "api_key": "k", "secret": "s" } }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_initialize_uses_server_settings() {
        let state = app_state(
            Arc::new(MemoryStore::new()),
            ExchangeSet::new().with(Arc::new(SimulatedExchange::new(ExchangeId::Gateio))),
        );
        let (status, body) = get(&state, "/api/v1/initialize").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Exchanges initialized successfully");
        // Default settings carry no credentials.
        assert!(state.manager.exchanges().await.is_empty());
    }

    #[tokio::test]
    async fn test_usdt_twd_rate() {
        let state = app_state(Arc::new(MemoryStore::new()), ExchangeSet::new());
        let (status, body) = get(&state, "/api/v1/exchange_rate/usdt_twd").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["detail"], "Could not fetch exchange rate");

        state.fx.seed(dec!(32.15)).await;
        let (status, body) = get(&state, "/api/v1/exchange_rate/usdt_twd").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["rate"], "32.15");
        assert!(body["data"]["timestamp"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let state = app_state(Arc::new(MemoryStore::new()), ExchangeSet::new());
        let response = build_router(state)
            .oneshot(Request::builder().uri("/api/v2/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
