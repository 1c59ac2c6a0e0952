use std::collections::BTreeMap;
use std::env;

use chrono::NaiveDate;

use crate::services::combiner::{combine, FittedModels, LeagueForecast};
use crate::services::goal_model::{dixon_coles_weights, GoalModel, ModelError, ModelFamily};
use crate::services::normalizer::Fixture;
use crate::services::window::ForecastWindow;

/// How prediction rows are written on refresh. Replace keeps exactly one row
/// per (match, model); Append keeps a snapshot per refresh run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionWriteMode {
    Replace,
    Append,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub leagues: Vec<String>,
    pub seasons: Vec<i32>,
    pub start_days_back: i64,
    pub forecast_days: i64,
    pub decay_rate: f64,
    pub write_mode: PredictionWriteMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            leagues: vec!["Big 5 European Leagues Combined".to_string()],
            seasons: vec![2024, 2025, 2026],
            start_days_back: 1,
            forecast_days: 4,
            decay_rate: 0.00175,
            write_mode: PredictionWriteMode::Replace,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            leagues: env::var("LEAGUES")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.leagues),
            seasons: env::var("SEASONS")
                .map(|v| v.split(',').filter_map(|s| s.trim().parse().ok()).collect())
                .unwrap_or(defaults.seasons),
            start_days_back: env_parse("START_DAYS_BACK", defaults.start_days_back),
            forecast_days: env_parse("FORECAST_DAYS", defaults.forecast_days),
            decay_rate: env_parse("DECAY_RATE", defaults.decay_rate),
            write_mode: match env::var("PREDICTION_HISTORY").as_deref() {
                Ok("append") => PredictionWriteMode::Append,
                _ => PredictionWriteMode::Replace,
            },
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Run the full forecast pass over an already-normalized schedule: group by
/// league, split each league's fixtures around the window, fit the four goal
/// models on the historical set and combine their lines over the upcoming
/// set.
///
/// One league's fit failure never blocks its siblings: the league is skipped
/// with a warning and simply contributes no forecast. A league with no
/// upcoming fixtures yields an empty forecast without fitting anything.
pub fn run_for_leagues(
    fixtures: &[Fixture],
    config: &PipelineConfig,
    today: NaiveDate,
) -> BTreeMap<String, LeagueForecast> {
    let window = ForecastWindow::new(today, config.start_days_back, config.forecast_days);

    let mut by_league: BTreeMap<String, Vec<Fixture>> = BTreeMap::new();
    for fixture in fixtures {
        by_league
            .entry(fixture.league.clone())
            .or_default()
            .push(fixture.clone());
    }

    let mut results = BTreeMap::new();
    for (league, league_fixtures) in by_league {
        let (historical, upcoming) = window.split(&league_fixtures);

        if upcoming.is_empty() {
            tracing::info!("{}: no fixtures in {} .. {}, skipping fit", league, window.start, window.end);
            results.insert(league.clone(), LeagueForecast::empty(&league));
            continue;
        }

        match fit_league(&historical, &upcoming, config.decay_rate, today) {
            Ok(forecast) => {
                tracing::info!(
                    "{}: combined {} upcoming fixtures from {} historical matches",
                    league,
                    forecast.rows.len(),
                    historical.len()
                );
                results.insert(league, forecast);
            }
            Err(e) => {
                tracing::warn!("{}: model fit failed, league skipped: {}", league, e);
            }
        }
    }

    results
}

/// Fit the four models for one league and combine their predictions.
///
/// Actual-goals models carry Dixon-Coles decay weights; xG models are fit
/// unweighted and only when at least one historical row has both xG values.
pub fn fit_league(
    historical: &[Fixture],
    upcoming: &[Fixture],
    decay_rate: f64,
    today: NaiveDate,
) -> Result<LeagueForecast, ModelError> {
    if historical.is_empty() {
        return Err(ModelError::EmptyTrainingSet);
    }

    let mut dates = Vec::with_capacity(historical.len());
    let mut home_goals = Vec::with_capacity(historical.len());
    let mut away_goals = Vec::with_capacity(historical.len());
    let mut home_teams = Vec::with_capacity(historical.len());
    let mut away_teams = Vec::with_capacity(historical.len());
    for fixture in historical {
        // The splitter only admits dated, finished rows into the historical set.
        let (Some(date), Some(hg), Some(ag)) = (fixture.date, fixture.home_goals, fixture.away_goals)
        else {
            continue;
        };
        dates.push(date);
        home_goals.push(hg);
        away_goals.push(ag);
        home_teams.push(fixture.home.clone());
        away_teams.push(fixture.away.clone());
    }

    let weights = dixon_coles_weights(&dates, decay_rate, today);
    let bp_actual = GoalModel::fit(
        ModelFamily::BivariatePoisson,
        &home_goals,
        &away_goals,
        &home_teams,
        &away_teams,
        Some(&weights),
    )?;
    let wb_actual = GoalModel::fit(
        ModelFamily::WeibullCount,
        &home_goals,
        &away_goals,
        &home_teams,
        &away_teams,
        Some(&weights),
    )?;
    tracing::debug!(
        "actual-goals fit: home_adv={:.3} loglik={:.1} corr={:.3}",
        bp_actual.home_advantage(),
        bp_actual.log_likelihood(),
        bp_actual.goal_correlation()
    );

    let xg_rows: Vec<&Fixture> = historical.iter().filter(|f| f.has_xg()).collect();
    let (bp_expected, wb_expected) = if xg_rows.is_empty() {
        (None, None)
    } else {
        let xg_home: Vec<f64> = xg_rows.iter().filter_map(|f| f.xg_home).collect();
        let xg_away: Vec<f64> = xg_rows.iter().filter_map(|f| f.xg_away).collect();
        let xg_home_teams: Vec<String> = xg_rows.iter().map(|f| f.home.clone()).collect();
        let xg_away_teams: Vec<String> = xg_rows.iter().map(|f| f.away.clone()).collect();
        let bp = GoalModel::fit(
            ModelFamily::BivariatePoisson,
            &xg_home,
            &xg_away,
            &xg_home_teams,
            &xg_away_teams,
            None,
        )?;
        let wb = GoalModel::fit(
            ModelFamily::WeibullCount,
            &xg_home,
            &xg_away,
            &xg_home_teams,
            &xg_away_teams,
            None,
        )?;
        tracing::debug!(
            "xG fit on {} rows: home_adv={:.3} dispersion={:.3}",
            xg_rows.len(),
            bp.home_advantage(),
            wb.dispersion()
        );
        (Some(bp), Some(wb))
    };

    let models = FittedModels {
        bp_actual,
        wb_actual,
        bp_expected,
        wb_expected,
    };
    Ok(combine(&models, upcoming))
}
