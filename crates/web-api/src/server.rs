use crate::{handlers, market};
use axum::{
    routing::{get, post},
    Router,
};
use qbot_core::{CandleSource, StatusStore};
use qbot_data::ModelInventory;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StatusStore>,
    pub inventory: ModelInventory,
    pub candles: Arc<dyn CandleSource>,
    /// Expiry of published start signals.
    pub signal_ttl: Duration,
}

pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    #[must_use]
    pub const fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/health", get(handlers::health))
            .route("/training/status", get(handlers::training_status))
            .route("/training/start", post(handlers::start_training))
            .route("/training/models", get(handlers::list_models))
            .route("/training/history", get(handlers::training_history))
            .route("/market/data/:symbol", get(market::candles))
            .route("/market/ohlcv/:symbol/multi", get(market::multi_candles))
            .route("/market/latest/:symbol", get(market::latest))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Starts the web server listening on the specified address.
    ///
    /// # Errors
    /// Returns an error if the server fails to bind to the address or serve requests.
    pub async fn serve(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Web API listening on {}", addr);

        axum::serve(listener, self.router()).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::{TimeZone, Utc};
    use qbot_core::{Candle, CandleQuery, Horizon, LatestQuote, Run, RunSummary, Timeframe};
    use qbot_data::MemoryStatusStore;
    use serde_json::Value;
    use std::sync::Mutex;
    use tower::ServiceExt;

    /// Answers every query with one candle and knows only AAPL's latest price.
    #[derive(Default)]
    struct FakeCandles {
        queries: Mutex<Vec<CandleQuery>>,
    }

    #[async_trait::async_trait]
    impl CandleSource for FakeCandles {
        async fn candles(&self, query: &CandleQuery) -> anyhow::Result<Vec<Candle>> {
            self.queries.lock().unwrap().push(query.clone());
            let time = Utc.with_ymd_and_hms(2026, 1, 30, 14, 0, 0).unwrap();
            Ok(vec![Candle {
                time,
                timestamp: time.timestamp(),
                open: Some(100.0),
                high: Some(101.0),
                low: Some(99.5),
                close: Some(100.5),
                volume: 1500,
            }])
        }

        async fn latest(&self, ticker: &str) -> anyhow::Result<Option<LatestQuote>> {
            let time = Utc.with_ymd_and_hms(2026, 1, 30, 15, 59, 0).unwrap();
            Ok((ticker == "AAPL").then(|| LatestQuote {
                symbol: ticker.to_string(),
                price: 102.5,
                open: Some(100.0),
                high: Some(103.0),
                low: Some(99.0),
                volume: 1200,
                change: 2.5,
                change_percent: 2.5,
                time,
                timestamp: time.timestamp(),
            }))
        }
    }

    struct Fixture {
        store: Arc<MemoryStatusStore>,
        candles: Arc<FakeCandles>,
        router: Router,
        _models: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let models = tempfile::tempdir().unwrap();
        std::fs::create_dir(models.path().join("autogluon_model_AAPL_15")).unwrap();
        std::fs::create_dir(models.path().join("autogluon_model_AAPL_60")).unwrap();

        let store = Arc::new(MemoryStatusStore::new());
        let candles = Arc::new(FakeCandles::default());
        let router = ApiServer::new(AppState {
            store: store.clone(),
            inventory: ModelInventory::new(models.path()),
            candles: candles.clone(),
            signal_ttl: Duration::from_secs(300),
        })
        .router();

        Fixture {
            store,
            candles,
            router,
            _models: models,
        }
    }

    async fn call(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn start(body: Option<&str>) -> Request<Body> {
        let builder = Request::builder().method("POST").uri("/training/start");
        match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_health() {
        let f = fixture();
        let (status, body) = call(&f.router, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_status_is_idle_without_record() {
        let f = fixture();
        let (status, body) = call(&f.router, get("/training/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "idle");
        assert_eq!(body["total_models"], 0);
        assert!(body["current_ticker"].is_null());
    }

    #[tokio::test]
    async fn test_start_publishes_signal() {
        let f = fixture();
        let (status, body) = call(&f.router, start(Some(r#"{"tickers": [" aapl", "MSFT", "MSFT"]}"#))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["accepted"], true);

        let signal = f.store.take_start_signal().await.unwrap().unwrap();
        assert_eq!(
            signal.tickers,
            Some(vec!["aapl".to_string(), "MSFT".to_string()])
        );
        assert_eq!(signal.source, "api");
    }

    #[tokio::test]
    async fn test_start_without_body_uses_selector() {
        let f = fixture();
        let (status, _) = call(&f.router, start(None)).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let signal = f.store.take_start_signal().await.unwrap().unwrap();
        assert_eq!(signal.tickers, None);
    }

    #[tokio::test]
    async fn test_start_with_blank_tickers_is_bad_request() {
        let f = fixture();
        let (status, body) = call(&f.router, start(Some(r#"{"tickers": ["", "  "]}"#))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["reason"], "no tickers found");
        assert!(f.store.take_start_signal().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_start_rejects_unparsable_bodies() {
        let f = fixture();
        for body in [
            r#"{"tickers": "AAPL"}"#,
            r#"{"tickers": ["AAPL""#,
            r#"{"ticker": ["AAPL"]}"#,
        ] {
            let (status, response) = call(&f.router, start(Some(body))).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(response["accepted"], false);
        }
        assert!(f.store.take_start_signal().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_start_requires_json_content_type() {
        let f = fixture();
        let request = Request::builder()
            .method("POST")
            .uri("/training/start")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(r#"{"tickers": ["AAPL"]}"#))
            .unwrap();

        let (status, body) = call(&f.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["accepted"], false);
        assert!(f.store.take_start_signal().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_start_with_empty_list_uses_selector() {
        let f = fixture();
        let (status, _) = call(&f.router, start(Some(r#"{"tickers": []}"#))).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let signal = f.store.take_start_signal().await.unwrap().unwrap();
        assert_eq!(signal.tickers, None);
    }

    #[tokio::test]
    async fn test_start_rejects_path_like_tickers() {
        let f = fixture();
        let (status, body) = call(
            &f.router,
            start(Some(r#"{"tickers": ["AAPL", "../../../tmp/evil"]}"#)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["reason"], "invalid tickers");
        assert_eq!(body["tickers"][0], "../../../tmp/evil");
        assert!(f.store.take_start_signal().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_start_conflicts_while_running() {
        let f = fixture();
        let mut run = Run::begin("run-1", &["AAPL".to_string()], Utc::now());
        run.start_ticker("AAPL");
        run.start_horizon("AAPL", Horizon::Min30);
        f.store.save_run(&run, Duration::from_secs(60)).await.unwrap();

        let (status, body) = call(&f.router, start(None)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["accepted"], false);
        assert_eq!(body["reason"], "training already in progress");
        assert_eq!(body["current_ticker"], "AAPL");
        assert_eq!(body["current_horizon"], 30);
        assert_eq!(body["progress_percent"], 0);
        assert!(f.store.take_start_signal().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_models_listing() {
        let f = fixture();
        let (status, body) = call(&f.router, get("/training/models")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["statistics"]["by_ticker"]["AAPL"], 2);
    }

    #[tokio::test]
    async fn test_history_returns_latest_page() {
        let f = fixture();
        for i in 0..12 {
            let summary = RunSummary {
                total_tickers: i,
                ..Run::idle().summary()
            };
            f.store.push_history(&summary, 50).await.unwrap();
        }

        let (status, body) = call(&f.router, get("/training/history")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 12);
        assert_eq!(body["history"].as_array().unwrap().len(), 10);
        assert_eq!(body["history"][0]["total_tickers"], 11);
    }

    #[tokio::test]
    async fn test_candles_default_timeframe_and_clamped_limit() {
        let f = fixture();
        let (status, body) = call(&f.router, get("/market/data/aapl?limit=5000")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["symbol"], "AAPL");
        assert_eq!(body["timeframe"], "15min");
        assert_eq!(body["count"], 1);
        assert_eq!(body["data"][0]["close"], 100.5);
        assert_eq!(body["data"][0]["volume"], 1500);

        let queries = f.candles.queries.lock().unwrap();
        assert_eq!(queries[0].ticker, "AAPL");
        assert_eq!(queries[0].timeframe, Timeframe::Min15);
        assert_eq!(queries[0].limit, 1000);
        assert_eq!(queries[0].start, None);
    }

    #[tokio::test]
    async fn test_candles_pass_time_range() {
        let f = fixture();
        let (status, body) = call(
            &f.router,
            get("/market/data/AAPL?timeframe=4hour&start=2025-10-01T00:00:00Z&end=2025-10-02"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["timeframe"], "4hour");

        let queries = f.candles.queries.lock().unwrap();
        assert_eq!(queries[0].timeframe, Timeframe::Hour4);
        assert_eq!(queries[0].limit, 100);
        assert_eq!(
            queries[0].start,
            Some(Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            queries[0].end,
            Some(Utc.with_ymd_and_hms(2025, 10, 2, 0, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_candles_reject_bad_queries() {
        let f = fixture();
        for uri in [
            "/market/data/AAPL?timeframe=2min",
            "/market/data/AAPL?start=2025-10-02&end=2025-10-01",
            "/market/data/AAPL?start=yesterday",
            "/market/data/a..b",
        ] {
            let (status, body) = call(&f.router, get(uri)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert!(body["error"].is_string());
        }
        assert!(f.candles.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_multi_timeframe_candles() {
        let f = fixture();
        let (status, body) = call(
            &f.router,
            get("/market/ohlcv/msft/multi?timeframes=1day,15min&limit=20"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["symbol"], "MSFT");
        assert_eq!(body["requested"], serde_json::json!(["1day", "15min"]));
        assert_eq!(body["timeframes"]["1day"].as_array().unwrap().len(), 1);
        assert_eq!(body["timeframes"]["15min"].as_array().unwrap().len(), 1);

        let queries = f.candles.queries.lock().unwrap();
        assert_eq!(queries.len(), 2);
        assert!(queries.iter().all(|q| q.limit == 20 && q.ticker == "MSFT"));
    }

    #[tokio::test]
    async fn test_multi_timeframe_rejects_empty_list() {
        let f = fixture();
        let (status, _) = call(&f.router, get("/market/ohlcv/MSFT/multi?timeframes=,")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_latest_price() {
        let f = fixture();
        let (status, body) = call(&f.router, get("/market/latest/aapl")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["symbol"], "AAPL");
        assert_eq!(body["price"], 102.5);
        assert_eq!(body["change_percent"], 2.5);

        let (status, body) = call(&f.router, get("/market/latest/MSFT")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "No data found for MSFT");
    }
}
