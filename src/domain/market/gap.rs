use crate::domain::market::interval::KlineInterval;
use serde::{Deserialize, Serialize};

/// Half-open `[start, end)` window of open times absent from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    pub start: i64,
    pub end: i64,
}

impl Gap {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn duration_ms(&self) -> i64 {
        self.end - self.start
    }

    /// Number of candle slots the gap spans at the given cadence.
    pub fn slots(&self, interval_ms: i64) -> i64 {
        if interval_ms <= 0 {
            return 0;
        }
        (self.duration_ms() + interval_ms - 1) / interval_ms
    }
}

/// Computes the missing sub-ranges of `[start, end)` given the open times
/// already present.
///
/// `open_times` must be ascending. Points outside the window are ignored and
/// duplicates collapse. The output is ascending and pairwise disjoint; empty
/// or inverted windows yield no gaps. A sub-range is reported only when a
/// candle of `interval` could open inside it, so a window starting mid-candle
/// is satisfied by the first slot after `start`.
pub fn find_gaps(open_times: &[i64], start: i64, end: i64, interval: KlineInterval) -> Vec<Gap> {
    if end <= start {
        return Vec::new();
    }

    let mut present = open_times
        .iter()
        .copied()
        .filter(|t| *t >= start && *t < end)
        .peekable();

    let Some(first) = present.next() else {
        return vec![Gap::new(start, end)];
    };

    let mut gaps = Vec::new();
    if interval.previous_open_time(first) >= start {
        gaps.push(Gap::new(start, first));
    }

    let mut current = first;
    for next in present {
        if next <= current {
            continue;
        }
        let expected = interval.next_open_time(current);
        if next > expected {
            gaps.push(Gap::new(expected, next));
        }
        current = next;
    }

    let expected = interval.next_open_time(current);
    if expected < end {
        gaps.push(Gap::new(expected, end));
    }

    gaps.retain(|g| g.end > g.start);
    gaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const ONE_MINUTE: KlineInterval = KlineInterval::OneMinute;
    const MIN: i64 = 60_000;
    const T0: i64 = 1_700_000_040_000;

    fn times(slots: &[i64]) -> Vec<i64> {
        slots.iter().map(|s| T0 + s * MIN).collect()
    }

    #[test]
    fn test_empty_store_is_one_gap() {
        let gaps = find_gaps(&[], T0, T0 + 5 * MIN, ONE_MINUTE);
        assert_eq!(gaps, vec![Gap::new(T0, T0 + 5 * MIN)]);
    }

    #[test]
    fn test_complete_range_has_no_gaps() {
        let gaps = find_gaps(&times(&[0, 1, 2, 3, 4]), T0, T0 + 5 * MIN, ONE_MINUTE);
        assert!(gaps.is_empty());
    }

    #[test]
    fn test_single_interior_hole() {
        let gaps = find_gaps(&times(&[0, 1, 3, 4]), T0, T0 + 5 * MIN, ONE_MINUTE);
        assert_eq!(gaps, vec![Gap::new(T0 + 2 * MIN, T0 + 3 * MIN)]);
        assert_eq!(gaps[0].slots(MIN), 1);
    }

    #[test]
    fn test_leading_and_trailing_gaps() {
        let gaps = find_gaps(&times(&[2, 3]), T0, T0 + 6 * MIN, ONE_MINUTE);
        assert_eq!(
            gaps,
            vec![
                Gap::new(T0, T0 + 2 * MIN),
                Gap::new(T0 + 4 * MIN, T0 + 6 * MIN),
            ]
        );
    }

    #[test]
    fn test_last_slot_present_leaves_no_trailing_gap() {
        // last + I == end: nothing missing at the tail
        let gaps = find_gaps(&times(&[0, 4]), T0, T0 + 5 * MIN, ONE_MINUTE);
        assert_eq!(gaps, vec![Gap::new(T0 + MIN, T0 + 4 * MIN)]);
    }

    #[test]
    fn test_degenerate_windows() {
        assert!(find_gaps(&[], T0, T0, ONE_MINUTE).is_empty());
        assert!(find_gaps(&[], T0 + MIN, T0, ONE_MINUTE).is_empty());
        assert!(find_gaps(&times(&[0]), T0 + MIN, T0, ONE_MINUTE).is_empty());
    }

    #[test]
    fn test_points_outside_window_and_duplicates_are_ignored() {
        let mut points = times(&[-3, 1, 1, 2]);
        points.push(T0 + 50 * MIN);
        let gaps = find_gaps(&points, T0, T0 + 4 * MIN, ONE_MINUTE);
        assert_eq!(
            gaps,
            vec![Gap::new(T0, T0 + MIN), Gap::new(T0 + 3 * MIN, T0 + 4 * MIN)]
        );
    }

    #[test]
    fn test_output_is_sorted_and_disjoint() {
        let layouts: [&[i64]; 5] = [
            &[],
            &[0],
            &[1, 5, 6, 9],
            &[0, 2, 4, 6, 8, 10],
            &[3, 4, 5, 17, 18, 40],
        ];
        for layout in layouts {
            let gaps = find_gaps(&times(layout), T0, T0 + 30 * MIN, ONE_MINUTE);
            for gap in &gaps {
                assert!(gap.start < gap.end);
                assert!(gap.start >= T0 && gap.end <= T0 + 30 * MIN);
            }
            for pair in gaps.windows(2) {
                assert!(pair[0].end <= pair[1].start, "{:?}", pair);
            }
        }
    }

    #[test]
    fn test_unaligned_window_end() {
        // end falls mid-slot: the partial slot still counts as missing
        let gaps = find_gaps(&times(&[0, 1]), T0, T0 + 2 * MIN + 30_000, ONE_MINUTE);
        assert_eq!(gaps, vec![Gap::new(T0 + 2 * MIN, T0 + 2 * MIN + 30_000)]);
    }

    #[test]
    fn test_window_starting_mid_candle() {
        // No slot opens in [start, first) when start is less than one interval before it
        let start = T0 + 30_000;
        let gaps = find_gaps(&times(&[1, 2, 3]), start, T0 + 4 * MIN, ONE_MINUTE);
        assert!(gaps.is_empty());

        let gaps = find_gaps(&times(&[2, 3]), start, T0 + 4 * MIN, ONE_MINUTE);
        assert_eq!(gaps, vec![Gap::new(start, T0 + 2 * MIN)]);
    }

    fn month(year: i32, month: u32) -> i64 {
        Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn test_monthly_series_steps_by_calendar_month() {
        // 31, 29 and 30 day months in a row
        let monthly = KlineInterval::OneMonth;
        let opens: Vec<i64> = (1..=12).map(|m| month(2024, m)).collect();
        let gaps = find_gaps(&opens, month(2024, 1), month(2025, 1), monthly);
        assert!(gaps.is_empty());

        let without_march: Vec<i64> = opens
            .iter()
            .copied()
            .filter(|t| *t != month(2024, 3))
            .collect();
        let gaps = find_gaps(&without_march, month(2024, 1), month(2025, 1), monthly);
        assert_eq!(gaps, vec![Gap::new(month(2024, 3), month(2024, 4))]);

        let gaps = find_gaps(&opens, month(2024, 1), month(2025, 2), monthly);
        assert_eq!(gaps, vec![Gap::new(month(2025, 1), month(2025, 2))]);
    }
}
