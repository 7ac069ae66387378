//! Downstream REST surface.
//!
//! `/api/v1/klines/*` front the historical query service, `/api/v1/streams`
//! reports the live stream pool, `/health` and `/metrics` serve operators.
//! Every failure leaves as `{"error": ..}` with a 4xx/5xx status.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, rejection::QueryRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

use crate::application::market_data::HistoricalQueryService;
use crate::application::streaming::{GatewayError, StreamHandle};
use crate::domain::errors::MarketDataError;
use crate::domain::market::candle::KlineResponse;
use crate::domain::market::interval::KlineInterval;
use crate::infrastructure::observability::Metrics;

pub const DEFAULT_LATEST_LIMIT: u32 = 100;
/// Interval used when a request omits one.
pub const DEFAULT_REQUEST_INTERVAL: KlineInterval = KlineInterval::OneMinute;

#[derive(Clone)]
pub struct AppState {
    pub historical: Arc<HistoricalQueryService>,
    pub streams: StreamHandle,
    pub metrics: Metrics,
}

/// Build the full router (REST + WebSocket) with CORS and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/v1/klines/latest", get(latest_klines))
        .route("/api/v1/klines/history", get(historical_klines))
        .route("/api/v1/streams", get(streams))
        .route("/ws", get(crate::interfaces::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<MarketDataError> for ApiError {
    fn from(err: MarketDataError) -> Self {
        let status = match &err {
            MarketDataError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            MarketDataError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            MarketDataError::StoreUnavailable { .. }
            | MarketDataError::StreamReconnectExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
        };
        // Transport and storage details stay in the log.
        let message = match &err {
            MarketDataError::UpstreamUnavailable { status, .. } => {
                warn!("Upstream failure behind HTTP request: {}", err);
                match status {
                    Some(code) => format!("Upstream unavailable (status {})", code),
                    None => "Upstream unavailable".to_string(),
                }
            }
            MarketDataError::StoreUnavailable { .. } => {
                warn!("Store failure behind HTTP request: {}", err);
                "Store unavailable".to_string()
            }
            _ => err.to_string(),
        };
        Self { status, message }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Rejected(inner) => inner.into(),
            GatewayError::Stopped => Self {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message: err.to_string(),
            },
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!("HTTP {}: {}", self.status, self.message);
        } else {
            debug!("HTTP {}: {}", self.status, self.message);
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct LatestParams {
    pub symbol: Option<String>,
    pub interval: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub symbol: Option<String>,
    pub interval: Option<String>,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub limit: Option<u32>,
}

fn required_symbol(symbol: Option<String>) -> Result<String, ApiError> {
    symbol
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("symbol is required"))
}

/// Parses an interval in canonical or wire form; absent means the default.
pub fn parse_interval(raw: Option<&str>) -> Result<KlineInterval, MarketDataError> {
    match raw {
        Some(raw) => raw.parse(),
        None => Ok(DEFAULT_REQUEST_INTERVAL),
    }
}

async fn latest_klines(
    State(state): State<Arc<AppState>>,
    params: Result<Query<LatestParams>, QueryRejection>,
) -> Result<Json<KlineResponse>, ApiError> {
    let Query(params) = params?;
    let symbol = required_symbol(params.symbol)?;
    let interval = parse_interval(params.interval.as_deref())?;
    let limit = params.limit.unwrap_or(DEFAULT_LATEST_LIMIT);

    let response = state.historical.get_latest(&symbol, interval, limit).await?;
    Ok(Json(response))
}

async fn historical_klines(
    State(state): State<Arc<AppState>>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Json<KlineResponse>, ApiError> {
    let Query(params) = params?;
    let symbol = required_symbol(params.symbol)?;
    let interval = parse_interval(params.interval.as_deref())?;

    let response = state
        .historical
        .get_range(&symbol, interval, params.start, params.end, params.limit)
        .await?;
    Ok(Json(response))
}

async fn streams(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.streams.snapshot().await?;
    Ok(Json(snapshot))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    store: bool,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        store: state.historical.has_store(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            ApiError::from(MarketDataError::invalid("bad")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(MarketDataError::upstream(Some(500), "down")).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::from(MarketDataError::upstream(None, "request timed out")).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::from(GatewayError::Stopped).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(GatewayError::Rejected(MarketDataError::invalid("x"))).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_upstream_and_store_details_are_not_exposed() {
        let err = ApiError::from(MarketDataError::upstream(
            None,
            "error sending request for url (http://10.0.0.7:8080/api/v3/klines?symbol=BTCUSDT)",
        ));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.message, "Upstream unavailable");

        let err = ApiError::from(MarketDataError::upstream(Some(418), "IP banned until 1700000000000"));
        assert_eq!(err.message, "Upstream unavailable (status 418)");

        let err = ApiError::from(MarketDataError::store("unable to open /var/lib/chartfeed/klines.db"));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.message, "Store unavailable");

        let err = ApiError::from(MarketDataError::invalid("symbol is required"));
        assert!(err.message.contains("symbol is required"));
    }

    #[test]
    fn test_interval_parsing() {
        assert_eq!(parse_interval(None).unwrap(), KlineInterval::OneMinute);
        assert_eq!(parse_interval(Some("4h")).unwrap(), KlineInterval::FourHours);
        assert_eq!(parse_interval(Some("ONE_DAY")).unwrap(), KlineInterval::OneDay);
        assert!(parse_interval(Some("7m")).is_err());
    }

    #[test]
    fn test_symbol_required() {
        assert!(required_symbol(None).is_err());
        assert!(required_symbol(Some("  ".to_string())).is_err());
        assert_eq!(required_symbol(Some("BTCUSDT".to_string())).unwrap(), "BTCUSDT");
    }
}
