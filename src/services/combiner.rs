use chrono::NaiveDate;

use crate::services::goal_model::{GoalModel, ModelError};
use crate::services::normalizer::Fixture;
use crate::utils::mean_skip_missing;

/// The four concrete model fits: two families, each on actual goals and
/// (when available) expected goals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    BpActual,
    BpExpected,
    WbActual,
    WbExpected,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::BpActual,
        ModelKind::BpExpected,
        ModelKind::WbActual,
        ModelKind::WbExpected,
    ];

    /// Stored model label, matching the prediction rows in the database.
    pub fn label(&self) -> &'static str {
        match self {
            ModelKind::BpActual => "BP-ag",
            ModelKind::BpExpected => "BP-xg",
            ModelKind::WbActual => "WB-ag",
            ModelKind::WbExpected => "WB-xg",
        }
    }

    fn index(&self) -> usize {
        match self {
            ModelKind::BpActual => 0,
            ModelKind::BpExpected => 1,
            ModelKind::WbActual => 2,
            ModelKind::WbExpected => 3,
        }
    }
}

/// Label for the ensemble-average pseudo-model.
pub const ENSEMBLE_LABEL: &str = "BP+WB Avg";

/// The fitted models for one league. The xG pair is absent when no
/// historical row carried both xG values.
pub struct FittedModels {
    pub bp_actual: GoalModel,
    pub wb_actual: GoalModel,
    pub bp_expected: Option<GoalModel>,
    pub wb_expected: Option<GoalModel>,
}

impl FittedModels {
    fn get(&self, kind: ModelKind) -> Option<&GoalModel> {
        match kind {
            ModelKind::BpActual => Some(&self.bp_actual),
            ModelKind::WbActual => Some(&self.wb_actual),
            ModelKind::BpExpected => self.bp_expected.as_ref(),
            ModelKind::WbExpected => self.wb_expected.as_ref(),
        }
    }
}

/// One upcoming fixture with its per-model handicap lines and the
/// skip-missing ensemble average.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedFixture {
    pub league: String,
    pub date: NaiveDate,
    pub home: String,
    pub away: String,
    lines: [Option<f64>; 4],
    pub average: Option<f64>,
}

impl CombinedFixture {
    pub fn new(
        league: String,
        date: NaiveDate,
        home: String,
        away: String,
        lines: [Option<f64>; 4],
    ) -> Self {
        let average = mean_skip_missing(&lines);
        Self {
            league,
            date,
            home,
            away,
            lines,
            average,
        }
    }

    pub fn line(&self, kind: ModelKind) -> Option<f64> {
        self.lines[kind.index()]
    }
}

/// Everything the upserter needs for one league.
#[derive(Debug, Clone, Default)]
pub struct LeagueForecast {
    pub league: String,
    pub rows: Vec<CombinedFixture>,
}

impl LeagueForecast {
    pub fn empty(league: &str) -> Self {
        Self {
            league: league.to_string(),
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Apply every fitted model to every upcoming fixture. A model that does not
/// know one of the teams contributes a missing line for that fixture rather
/// than failing the league; the average is taken over the lines that exist.
pub fn combine(models: &FittedModels, upcoming: &[Fixture]) -> LeagueForecast {
    let league = upcoming
        .first()
        .map(|f| f.league.clone())
        .unwrap_or_default();
    let mut rows = Vec::new();

    for fixture in upcoming {
        // Fixtures without a parsable date cannot be keyed to a match row.
        let Some(date) = fixture.date else {
            continue;
        };

        let mut lines = [None; 4];
        for kind in ModelKind::ALL {
            let Some(model) = models.get(kind) else {
                continue;
            };
            match model.predict(&fixture.home, &fixture.away) {
                Ok(expectation) => lines[kind.index()] = Some(expectation.handicap()),
                Err(ModelError::UnknownTeam(team)) => {
                    tracing::debug!(
                        "{}: no {} line for {} vs {} (unseen team {})",
                        fixture.league,
                        kind.label(),
                        fixture.home,
                        fixture.away,
                        team
                    );
                }
                Err(e) => {
                    tracing::warn!("{}: {} prediction failed: {}", fixture.league, kind.label(), e);
                }
            }
        }

        rows.push(CombinedFixture::new(
            fixture.league.clone(),
            date,
            fixture.home.clone(),
            fixture.away.clone(),
            lines,
        ));
    }

    LeagueForecast { league, rows }
}
