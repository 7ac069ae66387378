use crate::domain::errors::MarketDataError;
use crate::domain::market::candle::Candle;
use crate::domain::market::interval::KlineInterval;
use crate::domain::market::symbol::denormalize_crypto_symbol;
use crate::domain::ports::{HistoricalKlineSource, KlineRequest};
use crate::infrastructure::core::http_client_factory::build_url_with_query;
use crate::infrastructure::observability::Metrics;
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, warn};

const KLINES_PATH: &str = "/api/v3/klines";

/// Binance REST client for `GET /api/v3/klines`.
pub struct BinanceKlinesClient {
    client: ClientWithMiddleware,
    base_url: String,
    metrics: Metrics,
}

impl BinanceKlinesClient {
    pub fn new(client: ClientWithMiddleware, base_url: impl Into<String>, metrics: Metrics) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            metrics,
        }
    }

    fn query_params(request: &KlineRequest) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("symbol", denormalize_crypto_symbol(&request.symbol)),
            ("interval", request.interval.to_wire_format().to_string()),
        ];
        if let Some(start) = request.start {
            params.push(("startTime", start.to_string()));
        }
        if let Some(end) = request.end {
            params.push(("endTime", end.to_string()));
        }
        if let Some(limit) = request.limit {
            params.push(("limit", limit.to_string()));
        }
        params
    }
}

#[async_trait]
impl HistoricalKlineSource for BinanceKlinesClient {
    async fn fetch_klines(&self, request: &KlineRequest) -> Result<Vec<Candle>, MarketDataError> {
        if request.symbol.trim().is_empty() {
            return Err(MarketDataError::invalid("symbol must not be empty"));
        }

        let url = build_url_with_query(
            &format!("{}{}", self.base_url, KLINES_PATH),
            &Self::query_params(request),
        )
        .map_err(|e| MarketDataError::invalid(format!("bad upstream url: {}", e)))?;

        debug!("BinanceKlinesClient: GET {}", url);
        let started = Instant::now();

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                self.metrics.observe_upstream(
                    "klines",
                    "error",
                    started.elapsed().as_secs_f64(),
                );
                return Err(transport_error(e));
            }
        };

        let status = response.status();
        self.metrics.observe_upstream(
            "klines",
            status.as_str(),
            started.elapsed().as_secs_f64(),
        );

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                "BinanceKlinesClient: {} {} -> {}: {}",
                request.symbol, request.interval, status, body
            );
            return Err(MarketDataError::upstream(
                Some(status.as_u16()),
                upstream_message(&body, status.canonical_reason()),
            ));
        }

        let rows: Vec<Value> = response.json().await.map_err(|e| {
            MarketDataError::upstream(Some(status.as_u16()), format!("malformed klines payload: {}", e))
        })?;

        Ok(parse_kline_rows(&rows, &request.symbol, request.interval))
    }
}

fn transport_error(error: reqwest_middleware::Error) -> MarketDataError {
    match &error {
        reqwest_middleware::Error::Reqwest(inner) if inner.is_timeout() => {
            MarketDataError::upstream(None, "request timed out")
        }
        _ => MarketDataError::upstream(None, error.to_string()),
    }
}

#[derive(Deserialize)]
struct BinanceErrorBody {
    msg: String,
}

/// Prefers Binance's `{"code":..,"msg":..}` message over the raw body.
fn upstream_message(body: &str, reason: Option<&str>) -> String {
    if let Ok(parsed) = serde_json::from_str::<BinanceErrorBody>(body) {
        return parsed.msg;
    }
    if body.trim().is_empty() {
        return reason.unwrap_or("upstream request failed").to_string();
    }
    body.trim().to_string()
}

/// Converts the positional kline rows into candles.
///
/// Layout: `[open_time, open, high, low, close, volume, close_time,
/// quote_volume, trade_count, taker_buy_base, taker_buy_quote, ignore]`.
/// Rows that do not match the layout are skipped.
pub fn parse_kline_rows(rows: &[Value], symbol: &str, interval: KlineInterval) -> Vec<Candle> {
    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        match parse_kline_row(row, symbol, interval) {
            Some(candle) => candles.push(candle),
            None => warn!("BinanceKlinesClient: skipping malformed kline row {}", row),
        }
    }
    candles
}

fn parse_kline_row(row: &Value, symbol: &str, interval: KlineInterval) -> Option<Candle> {
    let arr = row.as_array()?;
    if arr.len() < 11 {
        return None;
    }

    Some(Candle {
        symbol: symbol.to_string(),
        interval,
        open_time: arr[0].as_i64()?,
        open: decimal_at(arr, 1)?,
        high: decimal_at(arr, 2)?,
        low: decimal_at(arr, 3)?,
        close: decimal_at(arr, 4)?,
        volume: decimal_at(arr, 5)?,
        close_time: arr[6].as_i64()?,
        quote_volume: decimal_at(arr, 7)?,
        trade_count: arr[8].as_u64()?,
        taker_buy_base_volume: decimal_at(arr, 9)?,
        taker_buy_quote_volume: decimal_at(arr, 10)?,
    })
}

fn decimal_at(arr: &[Value], idx: usize) -> Option<Decimal> {
    match &arr[idx] {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}
