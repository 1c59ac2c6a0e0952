use chrono::{Duration, NaiveDate};

use crate::services::normalizer::Fixture;

/// Date window for one forecast pass. Built fresh per invocation from an
/// injected "today" so the job is testable and safe to re-run inside a
/// long-lived process. All comparisons are date-only (UTC-normalized).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForecastWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ForecastWindow {
    pub fn new(today: NaiveDate, start_days_back: i64, forecast_days: i64) -> Self {
        Self {
            start: today - Duration::days(start_days_back),
            end: today + Duration::days(forecast_days),
        }
    }

    /// Partition a league's fixtures into (historical, upcoming).
    ///
    /// Historical: dated strictly before the window start and carrying a
    /// parsed final score. Upcoming: dated inside [start, end], both ends
    /// inclusive. Fixtures without a parsable date fall into neither set.
    pub fn split(&self, fixtures: &[Fixture]) -> (Vec<Fixture>, Vec<Fixture>) {
        let mut historical = Vec::new();
        let mut upcoming = Vec::new();

        for fixture in fixtures {
            let Some(date) = fixture.date else {
                continue;
            };
            if date < self.start && fixture.has_final_score() {
                historical.push(fixture.clone());
            } else if date >= self.start && date <= self.end {
                upcoming.push(fixture.clone());
            }
        }

        (historical, upcoming)
    }
}
