use chrono::NaiveDate;
use std::collections::BTreeMap;

use super::week_boundary::canonical_week_end;
use crate::models::{DailyBar, WeeklyOhlcv};

/// Fold the daily bars of one week into a weekly OHLCV bar
///
/// `bars` must be in chronological order: open comes from the first bar and
/// close from the last. High, low and volume do not depend on the order.
/// Returns `None` for an empty week.
pub fn aggregate_week(bars: &[DailyBar]) -> Option<WeeklyOhlcv> {
    let first = bars.first()?;
    let last = bars.last()?;

    let high = bars.iter().fold(f64::NEG_INFINITY, |a, b| a.max(b.high));
    let low = bars.iter().fold(f64::INFINITY, |a, b| a.min(b.low));
    let volume = bars.iter().map(|b| b.volume).sum();

    Some(WeeklyOhlcv {
        open: first.open,
        high,
        low,
        close: last.close,
        volume,
    })
}

/// Bucket daily bars by canonical week end, each bucket sorted by date
///
/// Duplicate dates keep the last bar seen for that date.
pub fn group_by_week(bars: Vec<DailyBar>) -> BTreeMap<NaiveDate, Vec<DailyBar>> {
    let mut by_date: BTreeMap<NaiveDate, DailyBar> = BTreeMap::new();
    for bar in bars {
        by_date.insert(bar.date, bar);
    }

    let mut weeks: BTreeMap<NaiveDate, Vec<DailyBar>> = BTreeMap::new();
    for (date, bar) in by_date {
        weeks.entry(canonical_week_end(date)).or_default().push(bar);
    }

    weeks
}

/// Convert a daily series into weekly OHLCV bars, oldest week first
pub fn aggregate_daily_series(bars: Vec<DailyBar>) -> Vec<(NaiveDate, WeeklyOhlcv)> {
    group_by_week(bars)
        .into_iter()
        .filter_map(|(week_end, week_bars)| {
            aggregate_week(&week_bars).map(|ohlcv| (week_end, ohlcv))
        })
        .collect()
}
