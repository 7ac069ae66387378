mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chartfeed::application::market_data::HistoricalQueryService;
use chartfeed::application::streaming::{DispatcherConfig, StreamDispatcher};
use chartfeed::domain::ports::HistoricalKlineSource;
use chartfeed::infrastructure::binance::BinanceKlinesClient;
use chartfeed::infrastructure::core::HttpClientFactory;
use chartfeed::infrastructure::observability::Metrics;
use chartfeed::interfaces::{AppState, router};
use common::{MIN, ScriptedConnector, ScriptedKlineSource, T0};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const HORIZON: i64 = T0 + 10_000 * MIN;

struct TestApp {
    router: Router,
    source: Arc<ScriptedKlineSource>,
}

fn test_app() -> TestApp {
    let source = Arc::new(ScriptedKlineSource::new(HORIZON));
    TestApp {
        router: router_over(source.clone()),
        source,
    }
}

fn router_over(source: Arc<dyn HistoricalKlineSource>) -> Router {
    let metrics = Metrics::new().unwrap();
    let historical = Arc::new(HistoricalQueryService::new(source, None, metrics.clone()));

    let connector = Arc::new(ScriptedConnector::default());
    let (dispatcher, streams) =
        StreamDispatcher::new(connector, DispatcherConfig::default(), metrics.clone());
    tokio::spawn(dispatcher.run());

    let state = Arc::new(AppState {
        historical,
        streams,
        metrics,
    });
    router(state)
}

async fn get(router: &Router, uri: &str) -> (StatusCode, String) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn get_json(router: &Router, uri: &str) -> (StatusCode, Value) {
    let (status, body) = get(router, uri).await;
    (status, serde_json::from_str(&body).unwrap())
}

#[tokio::test]
async fn test_latest_defaults_to_one_minute_and_hundred_candles() {
    let app = test_app();

    let (status, body) = get_json(&app.router, "/api/v1/klines/latest?symbol=BTCUSDT").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 100);
    assert_eq!(body["symbol"], "BTC/USDT");
    assert_eq!(body["interval"], "ONE_MINUTE");
    assert_eq!(body["data"].as_array().unwrap().len(), 100);
    assert_eq!(body["data"][99]["openTime"], HORIZON);
    assert!(body.get("start").is_none());

    let requests = app.source.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].limit, Some(100));
}

#[tokio::test]
async fn test_history_returns_requested_window() {
    let app = test_app();
    let uri = format!(
        "/api/v1/klines/history?symbol=ETH/USDT&interval=5m&start={}&end={}",
        T0,
        T0 + 60 * MIN
    );

    let (status, body) = get_json(&app.router, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["interval"], "FIVE_MINUTES");
    assert_eq!(body["start"], T0);
    assert_eq!(body["end"], T0 + 60 * MIN);

    let data = body["data"].as_array().unwrap();
    assert!(!data.is_empty());
    for candle in data {
        let open_time = candle["openTime"].as_i64().unwrap();
        assert!(open_time >= T0 && open_time < T0 + 60 * MIN);
    }
}

#[tokio::test]
async fn test_invalid_queries_are_bad_requests() {
    let app = test_app();
    let cases = [
        "/api/v1/klines/latest".to_string(),
        "/api/v1/klines/latest?symbol=".to_string(),
        "/api/v1/klines/latest?symbol=BTCUSDT&interval=7m".to_string(),
        "/api/v1/klines/latest?symbol=BTCUSDT&limit=0".to_string(),
        "/api/v1/klines/latest?symbol=BTCUSDT&limit=ten".to_string(),
        format!("/api/v1/klines/history?symbol=BTCUSDT&start={}&end={}", T0, T0),
        format!("/api/v1/klines/history?symbol=BTCUSDT&start={}&end={}", T0 + MIN, T0),
    ];

    for uri in &cases {
        let (status, body) = get_json(&app.router, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert!(body["error"].is_string(), "{}", uri);
    }
    assert_eq!(app.source.request_count(), 0);
}

#[tokio::test]
async fn test_upstream_failure_is_bad_gateway() {
    let app = test_app();
    app.source.set_failing(true);

    let (status, body) = get_json(&app.router, "/api/v1/klines/latest?symbol=BTCUSDT").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "Upstream unavailable (status 503)");
}

#[tokio::test]
async fn test_unreachable_upstream_does_not_leak_its_address() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = BinanceKlinesClient::new(
        HttpClientFactory::create_client(Duration::from_secs(5), 0),
        &format!("http://{}", addr),
        Metrics::new().unwrap(),
    );
    let router = router_over(Arc::new(client));

    let (status, body) = get(&router, "/api/v1/klines/latest?symbol=BTCUSDT&limit=10").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(!body.contains("http://"), "{}", body);
    assert!(!body.contains("127.0.0.1"), "{}", body);
    assert!(!body.contains("/api/v3/klines"), "{}", body);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["error"], "Upstream unavailable");
}

#[tokio::test]
async fn test_health_reports_store_state() {
    let app = test_app();

    let (status, body) = get_json(&app.router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"], false);
    assert!(body["server_time"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_metrics_are_exposed_as_text() {
    let app = test_app();
    get(&app.router, "/api/v1/klines/latest?symbol=BTCUSDT").await;

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("chartfeed_historical_queries_total"));
}

#[tokio::test]
async fn test_streams_endpoint_lists_empty_pool() {
    let app = test_app();

    let (status, body) = get_json(&app.router, "/api/v1/streams").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["streams"].as_array().unwrap().len(), 0);
    assert_eq!(body["exhausted"].as_array().unwrap().len(), 0);
    assert_eq!(body["consumers"], 0);
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let app = test_app();
    let (status, _) = get(&app.router, "/api/v1/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
