use std::collections::BTreeMap;

use chrono::NaiveDate;
use nalgebra::DVector;
use statrs::function::gamma::ln_gamma;
use thiserror::Error;

use crate::utils::days_between;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("no historical matches to fit on")]
    EmptyTrainingSet,
    #[error("training vectors have mismatched lengths")]
    LengthMismatch,
    #[error("degenerate training data: {0}")]
    Degenerate(String),
    #[error("team not present in training data: {0}")]
    UnknownTeam(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    BivariatePoisson,
    WeibullCount,
}

/// Predicted goal expectations for one fixture, by name. Downstream code
/// never has to pick columns out of a frame by position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoalExpectation {
    pub home: f64,
    pub away: f64,
}

impl GoalExpectation {
    /// Asian-handicap line for the home side: awayExp - homeExp.
    /// Negative means the home side is expected to outscore the away side.
    pub fn handicap(&self) -> f64 {
        self.away - self.home
    }
}

/// Dixon-Coles style exponential time decay: weight = exp(-rho * days_ago).
/// More recent matches always receive weight greater than or equal to older
/// ones, for any rho >= 0.
pub fn dixon_coles_weights(dates: &[NaiveDate], rho: f64, today: NaiveDate) -> Vec<f64> {
    dates
        .iter()
        .map(|date| {
            let days_ago = days_between(*date, today).max(0) as f64;
            (-rho * days_ago).exp()
        })
        .collect()
}

const MAX_ITERATIONS: usize = 4000;
const PARAM_BOUND: f64 = 6.0;
const CONVERGENCE_TOL: f64 = 1e-9;

/// Goal-expectation model over a multiplicative attack/defence/home-advantage
/// structure with log-linear parameters:
///
///   lambda_home = exp(mu + home_adv + attack[home] - defence[away])
///   lambda_away = exp(mu + attack[away] - defence[home])
///
/// The two families share the mean structure and differ in the estimator:
/// the bivariate Poisson family maximizes the weighted Poisson likelihood,
/// the Weibull-count family minimizes weighted squared error and carries a
/// method-of-moments dispersion shape.
#[derive(Debug, Clone)]
pub struct GoalModel {
    family: ModelFamily,
    teams: BTreeMap<String, usize>,
    params: DVector<f64>,
    log_likelihood: f64,
    goal_correlation: f64,
    dispersion: f64,
}

impl GoalModel {
    pub fn fit(
        family: ModelFamily,
        home_goals: &[f64],
        away_goals: &[f64],
        home_teams: &[String],
        away_teams: &[String],
        weights: Option<&[f64]>,
    ) -> Result<Self, ModelError> {
        let n = home_goals.len();
        if n == 0 {
            return Err(ModelError::EmptyTrainingSet);
        }
        if away_goals.len() != n || home_teams.len() != n || away_teams.len() != n {
            return Err(ModelError::LengthMismatch);
        }
        if let Some(w) = weights {
            if w.len() != n {
                return Err(ModelError::LengthMismatch);
            }
        }

        let mut teams = BTreeMap::new();
        for name in home_teams.iter().chain(away_teams.iter()) {
            let next = teams.len();
            teams.entry(name.clone()).or_insert(next);
        }
        let team_count = teams.len();
        if team_count < 2 {
            return Err(ModelError::Degenerate("fewer than two teams".to_string()));
        }

        let w: Vec<f64> = match weights {
            Some(w) => w.to_vec(),
            None => vec![1.0; n],
        };
        let total_weight: f64 = w.iter().sum();
        if total_weight <= 0.0 {
            return Err(ModelError::Degenerate("total match weight is zero".to_string()));
        }

        let home_idx: Vec<usize> = home_teams.iter().map(|t| teams[t]).collect();
        let away_idx: Vec<usize> = away_teams.iter().map(|t| teams[t]).collect();

        // Parameter layout: [attack_0..T, defence_0..T, home_adv, intercept].
        let dim = 2 * team_count + 2;
        let ha = 2 * team_count;
        let mu = 2 * team_count + 1;

        let weighted_goal_sum: f64 = (0..n)
            .map(|i| w[i] * (home_goals[i] + away_goals[i]))
            .sum();
        let mean_goal = (weighted_goal_sum / (2.0 * total_weight)).max(0.05);

        let mut params = DVector::zeros(dim);
        params[mu] = mean_goal.ln();

        // The squared-error gradient carries an extra lambda factor, so the
        // least-squares family takes smaller steps to stay stable.
        let learning_rate = match family {
            ModelFamily::BivariatePoisson => 0.3,
            ModelFamily::WeibullCount => 0.1,
        };
        let step = learning_rate / total_weight;
        for _ in 0..MAX_ITERATIONS {
            let mut grad = DVector::zeros(dim);

            for i in 0..n {
                let (hi, ai) = (home_idx[i], away_idx[i]);
                let lambda_h =
                    (params[mu] + params[ha] + params[hi] - params[team_count + ai]).exp();
                let lambda_a = (params[mu] + params[ai] - params[team_count + hi]).exp();
                if !lambda_h.is_finite() || !lambda_a.is_finite() {
                    return Err(ModelError::Degenerate("diverging goal rate".to_string()));
                }

                // Poisson score for the MLE family, squared-error gradient
                // (chain rule through the log link) for the least-squares one.
                let (res_h, res_a) = match family {
                    ModelFamily::BivariatePoisson => {
                        (home_goals[i] - lambda_h, away_goals[i] - lambda_a)
                    }
                    ModelFamily::WeibullCount => (
                        (home_goals[i] - lambda_h) * lambda_h,
                        (away_goals[i] - lambda_a) * lambda_a,
                    ),
                };

                grad[hi] += w[i] * res_h;
                grad[team_count + ai] -= w[i] * res_h;
                grad[ha] += w[i] * res_h;
                grad[mu] += w[i] * res_h;

                grad[ai] += w[i] * res_a;
                grad[team_count + hi] -= w[i] * res_a;
                grad[mu] += w[i] * res_a;
            }

            params.axpy(step, &grad, 1.0);
            for value in params.iter_mut() {
                *value = value.clamp(-PARAM_BOUND, PARAM_BOUND);
            }

            // Recentre attack and defence to mean zero for identifiability,
            // folding the shifts into the intercept so rates are unchanged.
            let attack_mean: f64 = (0..team_count).map(|t| params[t]).sum::<f64>() / team_count as f64;
            let defence_mean: f64 =
                (0..team_count).map(|t| params[team_count + t]).sum::<f64>() / team_count as f64;
            for t in 0..team_count {
                params[t] -= attack_mean;
                params[team_count + t] -= defence_mean;
            }
            params[mu] += attack_mean - defence_mean;

            if grad.amax() * step < CONVERGENCE_TOL {
                break;
            }
        }

        let mut model = Self {
            family,
            teams,
            params,
            log_likelihood: 0.0,
            goal_correlation: 0.0,
            dispersion: 1.0,
        };
        model.finalize(home_goals, away_goals, &home_idx, &away_idx, &w, total_weight);
        Ok(model)
    }

    /// Post-fit diagnostics: weighted log-likelihood, the non-negative
    /// residual cross-moment (shared bivariate component), and the
    /// variance-to-mean dispersion shape for the Weibull-count family.
    fn finalize(
        &mut self,
        home_goals: &[f64],
        away_goals: &[f64],
        home_idx: &[usize],
        away_idx: &[usize],
        w: &[f64],
        total_weight: f64,
    ) {
        let mut log_lik = 0.0;
        let mut cross_moment = 0.0;
        for i in 0..home_goals.len() {
            let (lambda_h, lambda_a) = self.rates(home_idx[i], away_idx[i]);
            log_lik += w[i]
                * (home_goals[i] * lambda_h.ln() - lambda_h - ln_gamma(home_goals[i] + 1.0)
                    + away_goals[i] * lambda_a.ln()
                    - lambda_a
                    - ln_gamma(away_goals[i] + 1.0));
            cross_moment += w[i] * (home_goals[i] - lambda_h) * (away_goals[i] - lambda_a);
        }
        self.log_likelihood = log_lik;

        match self.family {
            ModelFamily::BivariatePoisson => {
                self.goal_correlation = (cross_moment / total_weight).max(0.0);
            }
            ModelFamily::WeibullCount => {
                let count = 2.0 * total_weight;
                let mean: f64 = home_goals
                    .iter()
                    .zip(away_goals)
                    .zip(w)
                    .map(|((h, a), wi)| wi * (h + a))
                    .sum::<f64>()
                    / count;
                let var: f64 = home_goals
                    .iter()
                    .zip(away_goals)
                    .zip(w)
                    .map(|((h, a), wi)| wi * ((h - mean).powi(2) + (a - mean).powi(2)))
                    .sum::<f64>()
                    / count;
                self.dispersion = if var > 0.0 {
                    (mean / var).clamp(0.25, 4.0)
                } else {
                    1.0
                };
            }
        }
    }

    fn rates(&self, home: usize, away: usize) -> (f64, f64) {
        let team_count = self.teams.len();
        let ha = self.params[2 * team_count];
        let mu = self.params[2 * team_count + 1];
        let lambda_h = (mu + ha + self.params[home] - self.params[team_count + away]).exp();
        let lambda_a = (mu + self.params[away] - self.params[team_count + home]).exp();
        (lambda_h, lambda_a)
    }

    /// Expected goals for a fixture between two teams known to the training
    /// set. An unseen team is an error the caller degrades to a missing line.
    pub fn predict(&self, home: &str, away: &str) -> Result<GoalExpectation, ModelError> {
        let hi = *self
            .teams
            .get(home)
            .ok_or_else(|| ModelError::UnknownTeam(home.to_string()))?;
        let ai = *self
            .teams
            .get(away)
            .ok_or_else(|| ModelError::UnknownTeam(away.to_string()))?;
        let (lambda_h, lambda_a) = self.rates(hi, ai);
        Ok(GoalExpectation {
            home: lambda_h,
            away: lambda_a,
        })
    }

    pub fn family(&self) -> ModelFamily {
        self.family
    }

    pub fn home_advantage(&self) -> f64 {
        self.params[2 * self.teams.len()]
    }

    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    pub fn goal_correlation(&self) -> f64 {
        self.goal_correlation
    }

    pub fn dispersion(&self) -> f64 {
        self.dispersion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    /// Small synthetic league: City consistently outscores the other two.
    fn training_data() -> (Vec<f64>, Vec<f64>, Vec<String>, Vec<String>) {
        let rows = vec![
            ("City", "United", 3.0, 0.0),
            ("United", "City", 1.0, 2.0),
            ("City", "Rovers", 2.0, 1.0),
            ("Rovers", "City", 0.0, 3.0),
            ("United", "Rovers", 1.0, 1.0),
            ("Rovers", "United", 2.0, 2.0),
            ("City", "United", 2.0, 0.0),
            ("Rovers", "City", 1.0, 2.0),
        ];
        let mut hg = Vec::new();
        let mut ag = Vec::new();
        let mut home = Vec::new();
        let mut away = Vec::new();
        for (h, a, g1, g2) in rows {
            home.push(h.to_string());
            away.push(a.to_string());
            hg.push(g1);
            ag.push(g2);
        }
        (hg, ag, home, away)
    }

    #[test]
    fn test_weights_are_monotone_in_recency() {
        let today = date("2024-06-10");
        let dates = vec![date("2024-01-01"), date("2024-03-01"), date("2024-06-01")];
        for rho in [0.0, 0.00175, 0.01, 0.1] {
            let w = dixon_coles_weights(&dates, rho, today);
            assert!(w[0] <= w[1] && w[1] <= w[2], "rho={rho} gave {w:?}");
        }
    }

    #[test]
    fn test_future_dated_match_is_not_upweighted() {
        let today = date("2024-06-10");
        let w = dixon_coles_weights(&[date("2024-06-20")], 0.01, today);
        assert_relative_eq!(w[0], 1.0);
    }

    #[test]
    fn test_zero_rho_gives_uniform_weights() {
        let today = date("2024-06-10");
        let w = dixon_coles_weights(&[date("2020-01-01"), date("2024-06-09")], 0.0, today);
        assert_relative_eq!(w[0], 1.0);
        assert_relative_eq!(w[1], 1.0);
    }

    #[test]
    fn test_handicap_sign_convention() {
        let away_favored = GoalExpectation { home: 1.0, away: 2.0 };
        assert_relative_eq!(away_favored.handicap(), 1.0);
        let home_favored = GoalExpectation { home: 2.0, away: 1.0 };
        assert_relative_eq!(home_favored.handicap(), -1.0);
    }

    #[test]
    fn test_empty_training_set_fails() {
        let err = GoalModel::fit(ModelFamily::BivariatePoisson, &[], &[], &[], &[], None);
        assert!(matches!(err, Err(ModelError::EmptyTrainingSet)));
    }

    #[test]
    fn test_mismatched_lengths_fail() {
        let err = GoalModel::fit(
            ModelFamily::BivariatePoisson,
            &[1.0],
            &[1.0, 2.0],
            &["A".to_string()],
            &["B".to_string()],
            None,
        );
        assert!(matches!(err, Err(ModelError::LengthMismatch)));
    }

    #[test]
    fn test_zero_total_weight_is_degenerate() {
        let (hg, ag, home, away) = training_data();
        let weights = vec![0.0; hg.len()];
        let err = GoalModel::fit(
            ModelFamily::BivariatePoisson,
            &hg,
            &ag,
            &home,
            &away,
            Some(&weights),
        );
        assert!(matches!(err, Err(ModelError::Degenerate(_))));
    }

    #[test]
    fn test_poisson_fit_ranks_the_strong_team() {
        let (hg, ag, home, away) = training_data();
        let model =
            GoalModel::fit(ModelFamily::BivariatePoisson, &hg, &ag, &home, &away, None).unwrap();

        let pred = model.predict("City", "United").unwrap();
        assert!(pred.home > pred.away, "expected City favored, got {pred:?}");
        assert!(pred.handicap() < 0.0);
        assert!(pred.home.is_finite() && pred.away.is_finite());
    }

    #[test]
    fn test_weibull_fit_agrees_on_the_favorite() {
        let (hg, ag, home, away) = training_data();
        let model =
            GoalModel::fit(ModelFamily::WeibullCount, &hg, &ag, &home, &away, None).unwrap();

        let pred = model.predict("City", "Rovers").unwrap();
        assert!(pred.home > pred.away);
        assert!(model.dispersion() >= 0.25 && model.dispersion() <= 4.0);
    }

    #[test]
    fn test_unknown_team_at_prediction_time() {
        let (hg, ag, home, away) = training_data();
        let model =
            GoalModel::fit(ModelFamily::BivariatePoisson, &hg, &ag, &home, &away, None).unwrap();
        let err = model.predict("City", "Newly Promoted");
        assert!(matches!(err, Err(ModelError::UnknownTeam(name)) if name == "Newly Promoted"));
    }

    #[test]
    fn test_weighted_fit_accepts_decay_weights() {
        let (hg, ag, home, away) = training_data();
        let dates: Vec<NaiveDate> = (0..hg.len())
            .map(|i| date("2024-01-01") + chrono::Duration::days(i as i64 * 14))
            .collect();
        let w = dixon_coles_weights(&dates, 0.00175, date("2024-06-10"));
        let model = GoalModel::fit(
            ModelFamily::BivariatePoisson,
            &hg,
            &ag,
            &home,
            &away,
            Some(&w),
        )
        .unwrap();
        assert!(model.predict("City", "United").unwrap().handicap() < 0.0);
        assert!(model.goal_correlation() >= 0.0);
    }
}
