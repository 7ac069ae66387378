//! chartfeed command-line tool
//!
//! Runs historical queries against the configured store and upstream without
//! starting the server, and reports what the store is missing.

use anyhow::{Context, Result, bail};
use chartfeed::application::bootstrap::persistence::PersistenceBootstrap;
use chartfeed::application::bootstrap::services::ServicesBootstrap;
use chartfeed::config::Config;
use chartfeed::domain::market::interval::KlineInterval;
use chartfeed::infrastructure::observability::Metrics;
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{Level, info};

#[derive(Parser)]
#[command(author, version, about = "chartfeed historical data tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a historical range through the store (gap-filling as needed)
    History {
        /// Symbol (BTC/USDT or BTCUSDT)
        #[arg(short, long)]
        symbol: String,

        /// Interval in canonical (ONE_HOUR) or wire (1h) form
        #[arg(short, long, default_value = "1m")]
        interval: String,

        /// Window start: epoch milliseconds, RFC 3339, or YYYY-MM-DD
        #[arg(long)]
        start: String,

        /// Window end (exclusive): epoch milliseconds, RFC 3339, or YYYY-MM-DD
        #[arg(long)]
        end: String,

        /// Maximum number of candles returned
        #[arg(short, long)]
        limit: Option<u32>,
    },
    /// Fetch the most recent candles straight from upstream
    Latest {
        #[arg(short, long)]
        symbol: String,

        #[arg(short, long, default_value = "1m")]
        interval: String,

        #[arg(short, long, default_value = "100")]
        limit: u32,
    },
    /// Report the ranges the store is missing for a window
    Gaps {
        #[arg(short, long)]
        symbol: String,

        #[arg(short, long, default_value = "1m")]
        interval: String,

        #[arg(long)]
        start: String,

        #[arg(long)]
        end: String,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GapReport {
    symbol: String,
    interval: KlineInterval,
    start: i64,
    end: i64,
    gaps: Vec<GapEntry>,
    missing_candles: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GapEntry {
    start: i64,
    end: i64,
    candles: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to stderr so stdout stays valid JSON.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let metrics = Metrics::new()?;
    let persistence = PersistenceBootstrap::init(&config.store).await;
    let services = ServicesBootstrap::init(&config, persistence.as_ref(), metrics);
    let historical = services.historical;

    match cli.command {
        Commands::History {
            symbol,
            interval,
            start,
            end,
            limit,
        } => {
            let interval: KlineInterval = interval.parse()?;
            let (start, end) = (parse_time(&start)?, parse_time(&end)?);
            info!("history {} {} [{}, {})", symbol, interval, start, end);

            let response = historical
                .get_range(&symbol, interval, Some(start), Some(end), limit)
                .await?;
            print_json(&response)?;
        }
        Commands::Latest {
            symbol,
            interval,
            limit,
        } => {
            let interval: KlineInterval = interval.parse()?;
            let response = historical.get_latest(&symbol, interval, limit).await?;
            print_json(&response)?;
        }
        Commands::Gaps {
            symbol,
            interval,
            start,
            end,
        } => {
            if !historical.has_store() {
                bail!("gap report needs the candle store (check STORE_ENABLED / DATABASE_URL)");
            }
            let interval: KlineInterval = interval.parse()?;
            let (start, end) = (parse_time(&start)?, parse_time(&end)?);

            let gaps = historical.find_gaps(&symbol, interval, start, end).await?;
            let step = interval.duration_ms();
            let entries: Vec<GapEntry> = gaps
                .iter()
                .map(|g| GapEntry {
                    start: g.start,
                    end: g.end,
                    candles: g.slots(step),
                })
                .collect();

            print_json(&GapReport {
                symbol,
                interval,
                start,
                end,
                missing_candles: entries.iter().map(|e| e.candles).sum(),
                gaps: entries,
            })?;
        }
    }

    Ok(())
}

/// Accepts epoch milliseconds, RFC 3339 timestamps, or `YYYY-MM-DD` (UTC midnight).
fn parse_time(raw: &str) -> Result<i64> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<i64>() {
        return Ok(ms);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc).timestamp_millis());
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("Invalid time '{}'", raw))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .context("Invalid midnight")?
        .and_utc();
    Ok(midnight.timestamp_millis())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}
