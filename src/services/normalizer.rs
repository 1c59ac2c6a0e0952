use chrono::NaiveDate;

use crate::services::schedule_fetcher::RawFixture;

/// Canonical fixture row. Anything the feed could not express cleanly is a
/// None here; parsing never aborts the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Fixture {
    pub league: String,
    pub season: i32,
    pub date: Option<NaiveDate>,
    pub home: String,
    pub away: String,
    pub xg_home: Option<f64>,
    pub xg_away: Option<f64>,
    pub home_goals: Option<f64>,
    pub away_goals: Option<f64>,
}

impl Fixture {
    pub fn has_final_score(&self) -> bool {
        self.home_goals.is_some() && self.away_goals.is_some()
    }

    pub fn has_xg(&self) -> bool {
        self.xg_home.is_some() && self.xg_away.is_some()
    }
}

/// Normalize a raw schedule into the canonical schema. Pure, row-by-row:
/// unparsable dates become None, malformed scores yield missing goal counts,
/// absent xG stays absent (the fitter treats xG modeling as optional).
pub fn normalize_schedule(raw: &[RawFixture]) -> Vec<Fixture> {
    raw.iter()
        .map(|r| {
            let (home_goals, away_goals) = parse_score(r.score.as_deref());
            Fixture {
                league: r.league.clone(),
                season: r.season,
                date: parse_date(&r.date),
                home: r.home_team.clone(),
                away: r.away_team.clone(),
                xg_home: r.home_xg,
                xg_away: r.away_xg,
                home_goals,
                away_goals,
            }
        })
        .collect()
}

/// Dates arrive either as plain `YYYY-MM-DD` or as a full RFC 3339 instant.
/// Only the date component matters downstream.
fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    chrono::DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.date_naive())
}

/// Split a "home-away" score string (hyphen or en-dash) into two numeric
/// goal counts. Empty, missing or malformed scores produce (None, None).
fn parse_score(score: Option<&str>) -> (Option<f64>, Option<f64>) {
    let Some(raw) = score else {
        return (None, None);
    };
    let normalized = raw.trim().replace('\u{2013}', "-");
    let Some((home, away)) = normalized.split_once('-') else {
        return (None, None);
    };
    match (home.trim().parse::<f64>(), away.trim().parse::<f64>()) {
        (Ok(h), Ok(a)) => (Some(h), Some(a)),
        _ => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(date: &str, score: Option<&str>) -> RawFixture {
        RawFixture {
            league: "ENG".to_string(),
            season: 2024,
            date: date.to_string(),
            home_team: "Arsenal".to_string(),
            home_xg: Some(1.4),
            score: score.map(|s| s.to_string()),
            away_xg: Some(0.9),
            away_team: "Chelsea".to_string(),
        }
    }

    #[test]
    fn test_parse_score_hyphen_and_en_dash() {
        assert_eq!(parse_score(Some("2-1")), (Some(2.0), Some(1.0)));
        assert_eq!(parse_score(Some("2\u{2013}1")), (Some(2.0), Some(1.0)));
    }

    #[test]
    fn test_parse_score_missing_or_malformed() {
        assert_eq!(parse_score(None), (None, None));
        assert_eq!(parse_score(Some("")), (None, None));
        assert_eq!(parse_score(Some("postponed")), (None, None));
        assert_eq!(parse_score(Some("2-")), (None, None));
    }

    #[test]
    fn test_normalize_parses_dates_and_scores() {
        let rows = normalize_schedule(&[raw("2024-06-01", Some("3-0")), raw("not a date", None)]);
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2024, 6, 1));
        assert_eq!(rows[0].home_goals, Some(3.0));
        assert_eq!(rows[0].away_goals, Some(0.0));
        assert!(rows[0].has_final_score());
        assert!(rows[1].date.is_none());
        assert!(!rows[1].has_final_score());
    }

    #[test]
    fn test_normalize_accepts_rfc3339_dates() {
        let rows = normalize_schedule(&[raw("2024-06-01T19:45:00+01:00", None)]);
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2024, 6, 1));
    }

    #[test]
    fn test_normalize_tolerates_missing_xg() {
        let mut fixture = raw("2024-06-01", Some("1-1"));
        fixture.home_xg = None;
        fixture.away_xg = None;
        let rows = normalize_schedule(&[fixture]);
        assert!(!rows[0].has_xg());
        assert!(rows[0].has_final_score());
    }
}
