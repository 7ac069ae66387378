use crate::domain::errors::MarketDataError;
use crate::domain::market::candle::Candle;
use crate::domain::market::interval::KlineInterval;
use crate::domain::repositories::CandleRepository;
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::debug;

pub struct SqliteCandleRepository {
    pool: SqlitePool,
}

impl SqliteCandleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CandleRepository for SqliteCandleRepository {
    async fn write_candles(&self, candles: &[Candle]) -> Result<(), MarketDataError> {
        if candles.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(MarketDataError::store)?;

        for candle in candles {
            sqlx::query(
                r#"
                INSERT INTO klines (
                    symbol, kline_interval, open_time, open, high, low, close, volume,
                    close_time, quote_volume, trade_count,
                    taker_buy_base_volume, taker_buy_quote_volume
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(symbol, kline_interval, open_time) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume,
                    close_time = excluded.close_time,
                    quote_volume = excluded.quote_volume,
                    trade_count = excluded.trade_count,
                    taker_buy_base_volume = excluded.taker_buy_base_volume,
                    taker_buy_quote_volume = excluded.taker_buy_quote_volume
                "#,
            )
            .bind(&candle.symbol)
            .bind(candle.interval.canonical_name())
            .bind(candle.open_time)
            .bind(candle.open.to_string())
            .bind(candle.high.to_string())
            .bind(candle.low.to_string())
            .bind(candle.close.to_string())
            .bind(candle.volume.to_string())
            .bind(candle.close_time)
            .bind(candle.quote_volume.to_string())
            .bind(candle.trade_count as i64)
            .bind(candle.taker_buy_base_volume.to_string())
            .bind(candle.taker_buy_quote_volume.to_string())
            .execute(&mut *tx)
            .await
            .map_err(MarketDataError::store)?;
        }

        tx.commit().await.map_err(MarketDataError::store)?;
        debug!("Persisted {} klines", candles.len());
        Ok(())
    }

    async fn query_range(
        &self,
        symbol: &str,
        interval: KlineInterval,
        start: Option<i64>,
        end: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let (mut lower, mut upper) = (start.unwrap_or(i64::MIN), end.unwrap_or(i64::MAX));
        if lower > upper {
            std::mem::swap(&mut lower, &mut upper);
        }
        // SQLite treats a negative LIMIT as unbounded.
        let limit = limit.map(i64::from).unwrap_or(-1);

        let rows = sqlx::query(
            r#"
            SELECT * FROM klines
            WHERE symbol = ? AND kline_interval = ? AND open_time >= ? AND open_time < ?
            ORDER BY open_time ASC
            LIMIT ?
            "#,
        )
        .bind(symbol)
        .bind(interval.canonical_name())
        .bind(lower)
        .bind(upper)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(MarketDataError::store)?;

        rows.iter().map(map_row_to_candle).collect()
    }
}

fn map_row_to_candle(row: &SqliteRow) -> Result<Candle, MarketDataError> {
    let interval: String = row.try_get("kline_interval").map_err(MarketDataError::store)?;
    let trade_count: i64 = row.try_get("trade_count").map_err(MarketDataError::store)?;

    Ok(Candle {
        symbol: row.try_get("symbol").map_err(MarketDataError::store)?,
        interval: KlineInterval::from_canonical_name(&interval),
        open_time: row.try_get("open_time").map_err(MarketDataError::store)?,
        open: decimal_column(row, "open")?,
        high: decimal_column(row, "high")?,
        low: decimal_column(row, "low")?,
        close: decimal_column(row, "close")?,
        volume: decimal_column(row, "volume")?,
        close_time: row.try_get("close_time").map_err(MarketDataError::store)?,
        quote_volume: decimal_column(row, "quote_volume")?,
        trade_count: trade_count.max(0) as u64,
        taker_buy_base_volume: decimal_column(row, "taker_buy_base_volume")?,
        taker_buy_quote_volume: decimal_column(row, "taker_buy_quote_volume")?,
    })
}

fn decimal_column(row: &SqliteRow, column: &str) -> Result<Decimal, MarketDataError> {
    let raw: String = row.try_get(column).map_err(MarketDataError::store)?;
    Decimal::from_str(&raw)
        .map_err(|e| MarketDataError::store(format!("corrupt {} value '{}': {}", column, raw, e)))
}
