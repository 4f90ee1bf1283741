use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// Canonical week-ending Friday for any calendar date
///
/// - Friday stays as is
/// - Saturday and Sunday fall back to the Friday just before
/// - Monday to Thursday move forward to the coming Friday
///
/// Idempotent: `canonical_week_end(canonical_week_end(d)) == canonical_week_end(d)`.
pub fn canonical_week_end(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Fri => date,
        Weekday::Sat => date - Duration::days(1),
        Weekday::Sun => date - Duration::days(2),
        weekday => {
            // Mon=0 .. Thu=3
            let days_to_friday = 4 - weekday.num_days_from_monday() as i64;
            date + Duration::days(days_to_friday)
        }
    }
}

/// Monday of the trading week ending on `week_end`
pub fn week_start(week_end: NaiveDate) -> NaiveDate {
    week_end - Duration::days(4)
}

/// Week end of the last fully completed week as seen on `today`
pub fn last_complete_week_end(today: NaiveDate) -> NaiveDate {
    canonical_week_end(today - Duration::days(7))
}

/// `count` consecutive week ends ending at `last`, newest first
pub fn week_ends_back(last: NaiveDate, count: usize) -> Vec<NaiveDate> {
    let last = canonical_week_end(last);
    (0..count)
        .map(|i| last - Duration::weeks(i as i64))
        .collect()
}

/// Every week end from the week containing `first` up to `last`, oldest first
pub fn week_ends_between(first: NaiveDate, last: NaiveDate) -> Vec<NaiveDate> {
    let mut current = canonical_week_end(first);
    let last = canonical_week_end(last);
    let mut weeks = Vec::new();

    while current <= last {
        weeks.push(current);
        current += Duration::weeks(1);
    }

    weeks
}
