use crate::domain::errors::MarketDataError;
use chrono::{DateTime, Months};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SECOND_MS: i64 = 1_000;
const MINUTE_MS: i64 = 60 * SECOND_MS;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Candle granularity, serialized in its canonical form (`ONE_MINUTE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KlineInterval {
    OneSecond,
    OneMinute,
    ThreeMinutes,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    TwoHours,
    FourHours,
    SixHours,
    EightHours,
    TwelveHours,
    OneDay,
    ThreeDays,
    OneWeek,
    OneMonth,
}

impl KlineInterval {
    /// Fallback for unrecognized input on the non-throwing codec paths: the
    /// smallest supported granularity.
    pub const DEFAULT: KlineInterval = KlineInterval::OneSecond;

    pub const ALL: [KlineInterval; 16] = [
        KlineInterval::OneSecond,
        KlineInterval::OneMinute,
        KlineInterval::ThreeMinutes,
        KlineInterval::FiveMinutes,
        KlineInterval::FifteenMinutes,
        KlineInterval::ThirtyMinutes,
        KlineInterval::OneHour,
        KlineInterval::TwoHours,
        KlineInterval::FourHours,
        KlineInterval::SixHours,
        KlineInterval::EightHours,
        KlineInterval::TwelveHours,
        KlineInterval::OneDay,
        KlineInterval::ThreeDays,
        KlineInterval::OneWeek,
        KlineInterval::OneMonth,
    ];

    /// Converts to the Binance wire format (`1m`, `4h`, `1M`, ...)
    pub fn to_wire_format(&self) -> &'static str {
        match self {
            KlineInterval::OneSecond => "1s",
            KlineInterval::OneMinute => "1m",
            KlineInterval::ThreeMinutes => "3m",
            KlineInterval::FiveMinutes => "5m",
            KlineInterval::FifteenMinutes => "15m",
            KlineInterval::ThirtyMinutes => "30m",
            KlineInterval::OneHour => "1h",
            KlineInterval::TwoHours => "2h",
            KlineInterval::FourHours => "4h",
            KlineInterval::SixHours => "6h",
            KlineInterval::EightHours => "8h",
            KlineInterval::TwelveHours => "12h",
            KlineInterval::OneDay => "1d",
            KlineInterval::ThreeDays => "3d",
            KlineInterval::OneWeek => "1w",
            KlineInterval::OneMonth => "1M",
        }
    }

    pub fn canonical_name(&self) -> &'static str {
        match self {
            KlineInterval::OneSecond => "ONE_SECOND",
            KlineInterval::OneMinute => "ONE_MINUTE",
            KlineInterval::ThreeMinutes => "THREE_MINUTES",
            KlineInterval::FiveMinutes => "FIVE_MINUTES",
            KlineInterval::FifteenMinutes => "FIFTEEN_MINUTES",
            KlineInterval::ThirtyMinutes => "THIRTY_MINUTES",
            KlineInterval::OneHour => "ONE_HOUR",
            KlineInterval::TwoHours => "TWO_HOURS",
            KlineInterval::FourHours => "FOUR_HOURS",
            KlineInterval::SixHours => "SIX_HOURS",
            KlineInterval::EightHours => "EIGHT_HOURS",
            KlineInterval::TwelveHours => "TWELVE_HOURS",
            KlineInterval::OneDay => "ONE_DAY",
            KlineInterval::ThreeDays => "THREE_DAYS",
            KlineInterval::OneWeek => "ONE_WEEK",
            KlineInterval::OneMonth => "ONE_MONTH",
        }
    }

    /// Maps a wire string back to the canonical interval.
    ///
    /// Unknown input yields [`KlineInterval::DEFAULT`] instead of failing.
    /// The match is case-sensitive because `1m` and `1M` differ.
    pub fn from_wire_format(wire: &str) -> KlineInterval {
        Self::ALL
            .iter()
            .copied()
            .find(|i| i.to_wire_format() == wire)
            .unwrap_or(Self::DEFAULT)
    }

    /// Like [`from_wire_format`](Self::from_wire_format) but for canonical names.
    pub fn from_canonical_name(name: &str) -> KlineInterval {
        Self::ALL
            .iter()
            .copied()
            .find(|i| i.canonical_name() == name)
            .unwrap_or(Self::DEFAULT)
    }

    /// Nominal duration of one candle in milliseconds. A month counts as 30
    /// days here; use [`next_open_time`](Self::next_open_time) to walk a series.
    pub fn duration_ms(&self) -> i64 {
        match self {
            KlineInterval::OneSecond => SECOND_MS,
            KlineInterval::OneMinute => MINUTE_MS,
            KlineInterval::ThreeMinutes => 3 * MINUTE_MS,
            KlineInterval::FiveMinutes => 5 * MINUTE_MS,
            KlineInterval::FifteenMinutes => 15 * MINUTE_MS,
            KlineInterval::ThirtyMinutes => 30 * MINUTE_MS,
            KlineInterval::OneHour => HOUR_MS,
            KlineInterval::TwoHours => 2 * HOUR_MS,
            KlineInterval::FourHours => 4 * HOUR_MS,
            KlineInterval::SixHours => 6 * HOUR_MS,
            KlineInterval::EightHours => 8 * HOUR_MS,
            KlineInterval::TwelveHours => 12 * HOUR_MS,
            KlineInterval::OneDay => DAY_MS,
            KlineInterval::ThreeDays => 3 * DAY_MS,
            KlineInterval::OneWeek => 7 * DAY_MS,
            KlineInterval::OneMonth => 30 * DAY_MS,
        }
    }

    /// Open time of the candle following the one opened at `open_time`.
    ///
    /// Monthly candles open on the first of each calendar month (UTC), so
    /// they step by calendar month rather than a fixed duration.
    pub fn next_open_time(&self, open_time: i64) -> i64 {
        match self {
            KlineInterval::OneMonth => shift_months(open_time, 1),
            _ => open_time + self.duration_ms(),
        }
    }

    /// Open time of the candle preceding the one opened at `open_time`.
    pub fn previous_open_time(&self, open_time: i64) -> i64 {
        match self {
            KlineInterval::OneMonth => shift_months(open_time, -1),
            _ => open_time - self.duration_ms(),
        }
    }
}

fn shift_months(open_time: i64, months: i32) -> i64 {
    let shifted = DateTime::from_timestamp_millis(open_time).and_then(|at| {
        if months >= 0 {
            at.checked_add_months(Months::new(months.unsigned_abs()))
        } else {
            at.checked_sub_months(Months::new(months.unsigned_abs()))
        }
    });
    match shifted {
        Some(at) => at.timestamp_millis(),
        None => open_time + i64::from(months) * 30 * DAY_MS,
    }
}

/// Strict parse used on request boundaries: accepts either the canonical
/// name or the wire string and rejects anything else.
impl FromStr for KlineInterval {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|i| i.canonical_name() == trimmed || i.to_wire_format() == trimmed)
            .ok_or_else(|| {
                MarketDataError::invalid(format!(
                    "Invalid interval: '{}'. Use a canonical name (ONE_MINUTE) or wire format (1m)",
                    s
                ))
            })
    }
}

impl fmt::Display for KlineInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_wire_format())
    }
}
