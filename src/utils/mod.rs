use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};

/// Today's date in UTC. Pipeline code takes the date as a parameter so it can
/// be injected in tests; this is the production source.
pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

/// Midnight UTC for a given date. Kickoffs are stored at date granularity.
pub fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

/// Calculate the difference between two dates in days
pub fn days_between(date1: NaiveDate, date2: NaiveDate) -> i64 {
    (date2 - date1).num_days()
}

/// Deterministic match id: `{league}-{YYYYMMDD}-{home}-{away}`, spaces
/// replaced with underscores so the id is a single token. Re-running the
/// pipeline on the same fixture always derives the same id.
pub fn make_match_id(league_code: &str, date: NaiveDate, home: &str, away: &str) -> String {
    format!("{}-{}-{}-{}", league_code, date.format("%Y%m%d"), home, away).replace(' ', "_")
}

/// Arithmetic mean over the present values only. A missing value lowers the
/// divisor rather than contributing zero; all-missing input yields None.
pub fn mean_skip_missing(values: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = values.iter().filter_map(|v| *v).collect();
    if present.is_empty() {
        None
    } else {
        Some(present.iter().sum::<f64>() / present.len() as f64)
    }
}

/// NaN/missing handicaps are persisted as a flat 0.0 line.
pub fn line_or_zero(value: Option<f64>) -> f64 {
    match value {
        Some(v) if v.is_finite() => v,
        _ => 0.0,
    }
}
