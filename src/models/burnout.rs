//! Dropout hazard model
//!
//! Fits a Cox proportional-hazards model over the episodes produced by
//! [`EpisodeSegmenter`] and scores an active streak by its relative hazard.

use crate::config::BurnoutConfig;
use crate::error::EngineError;
use crate::models::episodes::{Episode, EpisodeCovariates, EpisodeSegmenter};
use crate::models::linalg::{cholesky_solve, dot, max_abs};
use crate::models::scaler::StandardScaler;
use crate::models::ModelState;
use crate::types::{BurnoutMetrics, FeatureRow};
use tracing::{debug, info, warn};

const MODEL_NAME: &str = "burnout";

/// Relative hazard reported before any successful fit
pub const UNTRAINED_RISK: f64 = 0.5;

const N_COVARIATES: usize = EpisodeCovariates::NAMES.len();

/// Fitted coefficients and the covariate means they are centered on
#[derive(Debug, Clone, PartialEq)]
pub struct CoxArtifact {
    /// Log hazard ratios on the original covariate scale
    coefficients: [f64; N_COVARIATES],
    means: [f64; N_COVARIATES],
}

impl CoxArtifact {
    pub fn coefficients(&self) -> &[f64; N_COVARIATES] {
        &self.coefficients
    }

    /// `exp((x - mean) . beta)`; the training mean maps to 1.0
    pub fn relative_hazard(&self, covariates: &EpisodeCovariates) -> f64 {
        let centered: Vec<f64> = covariates
            .to_array()
            .iter()
            .zip(&self.means)
            .map(|(x, m)| x - m)
            .collect();
        dot(&centered, &self.coefficients).exp()
    }
}

/// Survival model of habit dropout
#[derive(Debug, Clone, Default)]
pub struct BurnoutRiskModel {
    config: BurnoutConfig,
    state: ModelState<CoxArtifact>,
}

impl BurnoutRiskModel {
    pub fn new(config: BurnoutConfig) -> Self {
        Self {
            config,
            state: ModelState::Untrained,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.state.is_trained()
    }

    pub fn artifact(&self) -> Option<&CoxArtifact> {
        self.state.artifact()
    }

    fn segmenter(&self) -> EpisodeSegmenter {
        EpisodeSegmenter::new(self.config.dropout_threshold_days, self.config.min_episode_rows)
    }

    /// Episodes derived from the feature table
    pub fn prepare_data(&self, rows: &[FeatureRow]) -> Vec<Episode> {
        self.segmenter().segment(rows)
    }

    pub fn train(&mut self, rows: &[FeatureRow]) -> Result<BurnoutMetrics, EngineError> {
        let episodes = self.prepare_data(rows);

        if episodes.len() < self.config.min_episodes {
            warn!(
                episodes = episodes.len(),
                "not enough streaks to train survival model"
            );
            return Err(EngineError::InsufficientData {
                model: MODEL_NAME,
                required: self.config.min_episodes,
                found: episodes.len(),
                unit: "episodes",
            });
        }

        let raw: Vec<Vec<f64>> = episodes
            .iter()
            .map(|e| e.covariates.to_array().to_vec())
            .collect();
        let durations: Vec<f64> = episodes.iter().map(|e| e.duration as f64).collect();
        let events: Vec<bool> = episodes.iter().map(|e| e.event).collect();

        let scaler = StandardScaler::fit(&raw);
        let standardized = scaler.transform_all(&raw);
        let beta = fit_cox(&standardized, &durations, &events, &self.config)?;

        let mut coefficients = [0.0; N_COVARIATES];
        let mut means = [0.0; N_COVARIATES];
        for i in 0..N_COVARIATES {
            coefficients[i] = beta[i] / scaler.scales()[i];
            means[i] = scaler.means()[i];
        }
        let artifact = CoxArtifact {
            coefficients,
            means,
        };

        let risks: Vec<f64> = episodes
            .iter()
            .map(|e| artifact.relative_hazard(&e.covariates))
            .collect();
        let concordance = concordance_index(&durations, &events, &risks).unwrap_or_else(|| {
            warn!("no comparable episode pairs; concordance defaults to 0.5");
            0.5
        });

        let event_count = events.iter().filter(|e| **e).count();
        let coefficient_map = EpisodeCovariates::NAMES
            .iter()
            .zip(&artifact.coefficients)
            .map(|(name, c)| (name.to_string(), *c))
            .collect();

        self.state = ModelState::Trained(artifact);
        info!(
            episodes = episodes.len(),
            events = event_count,
            concordance,
            "burnout model trained"
        );

        Ok(BurnoutMetrics {
            concordance,
            coefficients: coefficient_map,
            episodes: episodes.len(),
            events: event_count,
        })
    }

    /// Relative dropout hazard of a streak with these covariates.
    ///
    /// Returns [`UNTRAINED_RISK`] when no model has been fitted.
    pub fn predict_current_risk(&self, covariates: &EpisodeCovariates) -> f64 {
        match &self.state {
            ModelState::Trained(artifact) => artifact.relative_hazard(covariates),
            ModelState::Untrained => {
                debug!("burnout model untrained, returning neutral risk");
                UNTRAINED_RISK
            }
        }
    }
}

/// Penalized Breslow log partial likelihood with its gradient and information matrix
struct PartialLikelihood {
    value: f64,
    gradient: Vec<f64>,
    information: Vec<f64>,
}

fn partial_likelihood(
    x: &[Vec<f64>],
    durations: &[f64],
    events: &[bool],
    beta: &[f64],
    penalizer: f64,
) -> PartialLikelihood {
    let p = beta.len();
    let risk: Vec<f64> = x.iter().map(|xi| dot(xi, beta)).collect();
    let mut value = -0.5 * penalizer * dot(beta, beta);
    let mut gradient: Vec<f64> = beta.iter().map(|b| -penalizer * b).collect();
    let mut information = vec![0.0; p * p];
    for i in 0..p {
        information[i * p + i] = penalizer;
    }

    let mut event_times: Vec<f64> = durations
        .iter()
        .zip(events)
        .filter(|(_, e)| **e)
        .map(|(d, _)| *d)
        .collect();
    event_times.sort_by(|a, b| a.total_cmp(b));
    event_times.dedup();

    for t in event_times {
        let mut s0 = 0.0;
        let mut s1 = vec![0.0; p];
        let mut s2 = vec![0.0; p * p];
        let mut tied = 0.0;
        let mut tied_x = vec![0.0; p];

        for j in 0..x.len() {
            if durations[j] < t {
                continue;
            }
            let w = risk[j].exp();
            s0 += w;
            for a in 0..p {
                s1[a] += w * x[j][a];
                for b in 0..p {
                    s2[a * p + b] += w * x[j][a] * x[j][b];
                }
            }
            if events[j] && durations[j] == t {
                tied += 1.0;
                value += risk[j];
                for a in 0..p {
                    tied_x[a] += x[j][a];
                }
            }
        }

        value -= tied * s0.ln();
        for a in 0..p {
            gradient[a] += tied_x[a] - tied * s1[a] / s0;
            for b in 0..p {
                information[a * p + b] +=
                    tied * (s2[a * p + b] / s0 - (s1[a] / s0) * (s1[b] / s0));
            }
        }
    }

    PartialLikelihood {
        value,
        gradient,
        information,
    }
}

/// Newton-Raphson on the penalized partial likelihood, with step halving
fn fit_cox(
    x: &[Vec<f64>],
    durations: &[f64],
    events: &[bool],
    config: &BurnoutConfig,
) -> Result<Vec<f64>, EngineError> {
    let p = x.first().map_or(0, |r| r.len());
    let mut beta = vec![0.0; p];
    let mut current = partial_likelihood(x, durations, events, &beta, config.penalizer);

    for iteration in 0..config.max_iterations {
        let step = cholesky_solve(&current.information, &current.gradient, p)?;

        let mut scale = 1.0;
        let mut candidate: Vec<f64> = beta.iter().zip(&step).map(|(b, s)| b + s).collect();
        let mut next = partial_likelihood(x, durations, events, &candidate, config.penalizer);
        while !(next.value.is_finite() && next.value >= current.value) && scale > 1e-6 {
            scale *= 0.5;
            candidate = beta
                .iter()
                .zip(&step)
                .map(|(b, s)| b + scale * s)
                .collect();
            next = partial_likelihood(x, durations, events, &candidate, config.penalizer);
        }

        if !next.value.is_finite() {
            return Err(EngineError::ModelFit(
                "partial likelihood diverged".to_string(),
            ));
        }

        let change = max_abs(&step) * scale;
        let improvement = next.value - current.value;
        beta = candidate;
        current = next;

        if change < config.tolerance || improvement.abs() < config.tolerance {
            debug!(iterations = iteration + 1, "cox fit converged");
            return Ok(beta);
        }
    }

    warn!(
        max_iterations = config.max_iterations,
        "cox fit did not converge, using last estimate"
    );
    Ok(beta)
}

/// Harrell's concordance index.
///
/// A pair is comparable when the shorter duration ended in an event; it is
/// concordant when that episode has the higher predicted risk. `None` when no
/// pair is comparable.
pub fn concordance_index(durations: &[f64], events: &[bool], risks: &[f64]) -> Option<f64> {
    let mut comparable = 0.0;
    let mut concordant = 0.0;

    for i in 0..durations.len() {
        if !events[i] {
            continue;
        }
        for j in 0..durations.len() {
            if durations[i] < durations[j] {
                comparable += 1.0;
                if risks[i] > risks[j] {
                    concordant += 1.0;
                } else if risks[i] == risks[j] {
                    concordant += 0.5;
                }
            }
        }
    }

    if comparable == 0.0 {
        None
    } else {
        Some(concordant / comparable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureEngineer;
    use crate::types::DailyRecord;
    use chrono::NaiveDate;

    /// Active blocks of varying length separated by week-long breaks
    fn make_rows(blocks: &[usize]) -> Vec<FeatureRow> {
        let start = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let mut records = Vec::new();
        let mut day = 0i64;
        for (b, &len) in blocks.iter().enumerate() {
            for i in 0..len {
                let steps = 6000 + (b as u32) * 700 + (i as u32 % 3) * 400;
                let sleep = 380.0 + ((i + b) % 4) as f64 * 25.0;
                records.push(DailyRecord::new(
                    start + chrono::Duration::days(day),
                    steps,
                    20.0 + (b * 5) as f64,
                    sleep,
                ));
                day += 1;
            }
            for _ in 0..7 {
                records.push(DailyRecord::new(
                    start + chrono::Duration::days(day),
                    2500,
                    0.0,
                    430.0,
                ));
                day += 1;
            }
        }
        FeatureEngineer::enhance(&records)
    }

    #[test]
    fn test_untrained_returns_neutral_risk() {
        let model = BurnoutRiskModel::default();
        let covariates = EpisodeCovariates {
            avg_sleep_consistency: 0.9,
            avg_effort_ratio: 1.1,
            avg_sleep_var: 40.0,
            initial_motivation: 30.0,
        };
        assert_eq!(model.predict_current_risk(&covariates), UNTRAINED_RISK);
    }

    #[test]
    fn test_no_dropouts_is_insufficient() {
        let start = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let records: Vec<DailyRecord> = (0..40)
            .map(|i| {
                let minutes = if i % 3 == 0 { 0.0 } else { 30.0 };
                DailyRecord::new(start + chrono::Duration::days(i), 7000, minutes, 420.0)
            })
            .collect();
        let rows = FeatureEngineer::enhance(&records);

        let mut model = BurnoutRiskModel::default();
        let err = model.train(&rows).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientData {
                model: "burnout",
                required: 2,
                found: 1,
                ..
            }
        ));
        assert!(!model.is_trained());
    }

    #[test]
    fn test_train_reports_coefficients() {
        let rows = make_rows(&[6, 12, 9, 20, 5, 15]);
        let mut model = BurnoutRiskModel::default();
        let metrics = model.train(&rows).unwrap();

        assert_eq!(metrics.episodes, 6);
        assert_eq!(metrics.events, 6);
        assert_eq!(metrics.coefficients.len(), 4);
        assert!(metrics.coefficients.values().all(|c| c.is_finite()));
        assert!((0.0..=1.0).contains(&metrics.concordance));
        assert!(model.is_trained());
    }

    #[test]
    fn test_training_mean_has_unit_hazard() {
        let rows = make_rows(&[6, 12, 9, 20, 5, 15]);
        let mut model = BurnoutRiskModel::default();
        model.train(&rows).unwrap();

        let episodes = model.prepare_data(&rows);
        let n = episodes.len() as f64;
        let mut mean = [0.0; 4];
        for e in &episodes {
            for (m, v) in mean.iter_mut().zip(e.covariates.to_array()) {
                *m += v / n;
            }
        }
        let covariates = EpisodeCovariates {
            avg_sleep_consistency: mean[0],
            avg_effort_ratio: mean[1],
            avg_sleep_var: mean[2],
            initial_motivation: mean[3],
        };
        assert!((model.predict_current_risk(&covariates) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_concordance_index() {
        let durations = [2.0, 5.0, 9.0];
        let events = [true, true, false];
        assert_eq!(concordance_index(&durations, &events, &[3.0, 2.0, 1.0]), Some(1.0));
        assert_eq!(concordance_index(&durations, &events, &[1.0, 2.0, 3.0]), Some(0.0));
        assert_eq!(concordance_index(&durations, &events, &[1.0, 1.0, 1.0]), Some(0.5));
        assert_eq!(concordance_index(&[4.0, 4.0], &[false, false], &[1.0, 2.0]), None);
    }
}
