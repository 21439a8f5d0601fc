//! Next-day adherence classifier
//!
//! Predicts whether the user exercises tomorrow from today's feature row using
//! class-balanced, L2-regularized logistic regression on standardized inputs.

use crate::config::AdherenceConfig;
use crate::error::EngineError;
use crate::models::linalg::{cholesky_solve, dot, max_abs};
use crate::models::scaler::StandardScaler;
use crate::models::ModelState;
use crate::types::{AdherenceMetrics, FeatureRow, FeatureSource};
use tracing::{debug, info, warn};

const MODEL_NAME: &str = "adherence";
/// Fewest labelled rows that split into a fitting and a held-out part
const MIN_LABELLED_ROWS: usize = 2;

/// Ordered model inputs. This list is the classifier's input contract.
pub const FEATURE_COLUMNS: [&str; 16] = [
    "exercise_done",
    "exercise_minutes",
    "total_steps",
    "prev_steps",
    "prev_sleep_dur",
    "prev_exercise_done",
    "steps_7d_avg",
    "sleep_7d_avg",
    "sleep_variance_7d",
    "sleep_consistency_score",
    "rolling_misses_3d",
    "is_weekend",
    "effort_ratio",
    "is_recovery_period",
    "is_streak_break",
    "days_since_workout",
];

/// Learned scaler and coefficients
#[derive(Debug, Clone, PartialEq)]
pub struct LogisticArtifact {
    scaler: StandardScaler,
    weights: Vec<f64>,
    intercept: f64,
}

impl LogisticArtifact {
    fn predict_scaled(&self, scaled: &[f64]) -> f64 {
        sigmoid(dot(&self.weights, scaled) + self.intercept)
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }
}

/// Supervised next-day activity model
#[derive(Debug, Clone, Default)]
pub struct AdherenceModel {
    config: AdherenceConfig,
    state: ModelState<LogisticArtifact>,
}

impl AdherenceModel {
    pub fn new(config: AdherenceConfig) -> Self {
        Self {
            config,
            state: ModelState::Untrained,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.state.is_trained()
    }

    pub fn feature_columns(&self) -> &'static [&'static str] {
        &FEATURE_COLUMNS
    }

    pub fn artifact(&self) -> Option<&LogisticArtifact> {
        self.state.artifact()
    }

    /// Build (features, next-day target) pairs.
    ///
    /// The target of row `i` is row `i + 1`'s exercise flag, so the final row
    /// is dropped.
    pub fn prepare_data(rows: &[FeatureRow]) -> Result<(Vec<Vec<f64>>, Vec<f64>), EngineError> {
        let labelled = rows.len().saturating_sub(1);
        let mut features = Vec::with_capacity(labelled);
        let mut targets = Vec::with_capacity(labelled);

        for pair in rows.windows(2) {
            features.push(extract_features(&pair[0])?);
            targets.push(if pair[1].record.exercise_done { 1.0 } else { 0.0 });
        }

        Ok((features, targets))
    }

    /// Fit on the leading share of rows and report metrics on the rest
    pub fn train(&mut self, rows: &[FeatureRow]) -> Result<AdherenceMetrics, EngineError> {
        let (features, targets) = Self::prepare_data(rows)?;

        // The chronological split needs a row on each side
        let required = self.config.min_rows.max(MIN_LABELLED_ROWS);
        if features.len() < required {
            return Err(EngineError::InsufficientData {
                model: MODEL_NAME,
                required,
                found: features.len(),
                unit: "rows",
            });
        }

        // Chronological split, no shuffling
        let split = ((features.len() as f64) * self.config.train_fraction) as usize;
        let split = split.clamp(1, features.len() - 1);
        let (x_train, x_test) = features.split_at(split);
        let (y_train, y_test) = targets.split_at(split);

        let scaler = StandardScaler::fit(x_train);
        let x_train = scaler.transform_all(x_train);
        let x_test = scaler.transform_all(x_test);

        let (weights, intercept) = fit_logistic(&x_train, y_train, &self.config)?;
        let artifact = LogisticArtifact {
            scaler,
            weights,
            intercept,
        };

        let probabilities: Vec<f64> = x_test.iter().map(|x| artifact.predict_scaled(x)).collect();
        let correct = probabilities
            .iter()
            .zip(y_test)
            .filter(|(p, y)| (**p > 0.5) == (**y > 0.5))
            .count();
        let accuracy = correct as f64 / y_test.len() as f64;

        let auc = roc_auc(y_test, &probabilities).unwrap_or_else(|| {
            warn!("held-out split has a single class; AUC defaults to 0.5");
            0.5
        });

        let feature_importance = FEATURE_COLUMNS
            .iter()
            .zip(&artifact.weights)
            .map(|(name, w)| (name.to_string(), *w))
            .collect();

        self.state = ModelState::Trained(artifact);
        info!(
            train_rows = split,
            test_rows = y_test.len(),
            accuracy,
            auc,
            "adherence model trained"
        );

        Ok(AdherenceMetrics {
            accuracy,
            auc,
            feature_importance,
        })
    }

    /// Probability that the user is active the day after `row`
    pub fn predict_next_day_proba(&self, row: &impl FeatureSource) -> Result<f64, EngineError> {
        let artifact = self
            .state
            .artifact()
            .ok_or(EngineError::NotTrained(MODEL_NAME))?;
        let features = extract_features(row)?;
        let scaled = artifact.scaler.transform(&features);
        Ok(artifact.predict_scaled(&scaled))
    }
}

fn extract_features(row: &impl FeatureSource) -> Result<Vec<f64>, EngineError> {
    FEATURE_COLUMNS.iter().map(|name| row.require(name)).collect()
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Regularized, class-weighted negative log-likelihood
fn objective(x: &[Vec<f64>], y: &[f64], sample_weights: &[f64], params: &[f64], c: f64) -> f64 {
    let d = params.len() - 1;
    let (w, b) = (&params[..d], params[d]);
    let penalty = 0.5 * dot(w, w);
    let loss: f64 = x
        .iter()
        .zip(y)
        .zip(sample_weights)
        .map(|((xi, yi), si)| {
            let z = dot(w, xi) + b;
            // log(1 + e^z) - y z, computed stably
            let softplus = if z > 0.0 {
                z + (-z).exp().ln_1p()
            } else {
                z.exp().ln_1p()
            };
            si * (softplus - yi * z)
        })
        .sum();
    penalty + c * loss
}

/// Newton-Raphson (IRLS) fit with an unpenalized intercept.
///
/// Classes are weighted by `n / (2 * n_class)` so missed and active days
/// contribute equally.
fn fit_logistic(
    x: &[Vec<f64>],
    y: &[f64],
    config: &AdherenceConfig,
) -> Result<(Vec<f64>, f64), EngineError> {
    let n = y.len();
    let positives = y.iter().filter(|v| **v > 0.5).count();
    let negatives = n - positives;
    if positives == 0 || negatives == 0 {
        return Err(EngineError::ModelFit(
            "training split contains a single class".to_string(),
        ));
    }

    let weight_pos = n as f64 / (2.0 * positives as f64);
    let weight_neg = n as f64 / (2.0 * negatives as f64);
    let sample_weights: Vec<f64> = y
        .iter()
        .map(|v| if *v > 0.5 { weight_pos } else { weight_neg })
        .collect();

    let d = x.first().map_or(0, |r| r.len());
    let dim = d + 1;
    let c = config.inverse_regularization;
    let mut params = vec![0.0; dim];
    let mut current = objective(x, y, &sample_weights, &params, c);

    for iteration in 0..config.max_iterations {
        let mut gradient = vec![0.0; dim];
        let mut hessian = vec![0.0; dim * dim];

        for i in 0..d {
            gradient[i] = params[i];
            hessian[i * dim + i] = 1.0;
        }
        // Keeps the intercept pivot positive when probabilities saturate
        hessian[d * dim + d] = 1e-10;

        for ((xi, yi), si) in x.iter().zip(y).zip(&sample_weights) {
            let p = sigmoid(dot(&params[..d], xi) + params[d]);
            let residual = c * si * (p - yi);
            let curvature = c * si * p * (1.0 - p);

            for a in 0..dim {
                let xa = if a < d { xi[a] } else { 1.0 };
                gradient[a] += residual * xa;
                for b in 0..dim {
                    let xb = if b < d { xi[b] } else { 1.0 };
                    hessian[a * dim + b] += curvature * xa * xb;
                }
            }
        }

        let step = cholesky_solve(&hessian, &gradient, dim)?;

        // Step halving keeps the objective non-increasing
        let mut scale = 1.0;
        let mut candidate: Vec<f64> = params.iter().zip(&step).map(|(p, s)| p - s).collect();
        let mut value = objective(x, y, &sample_weights, &candidate, c);
        while value > current && scale > 1e-6 {
            scale *= 0.5;
            candidate = params
                .iter()
                .zip(&step)
                .map(|(p, s)| p - scale * s)
                .collect();
            value = objective(x, y, &sample_weights, &candidate, c);
        }

        let change = max_abs(&step) * scale;
        params = candidate;
        current = value;

        if change < config.tolerance {
            debug!(iterations = iteration + 1, "logistic fit converged");
            break;
        }
    }

    let intercept = params.pop().unwrap_or(0.0);
    Ok((params, intercept))
}

/// Area under the ROC curve via the Mann-Whitney statistic.
///
/// `None` when only one class is present.
pub fn roc_auc(labels: &[f64], scores: &[f64]) -> Option<f64> {
    let positives: Vec<f64> = labels
        .iter()
        .zip(scores)
        .filter(|(y, _)| **y > 0.5)
        .map(|(_, s)| *s)
        .collect();
    let negatives: Vec<f64> = labels
        .iter()
        .zip(scores)
        .filter(|(y, _)| **y <= 0.5)
        .map(|(_, s)| *s)
        .collect();

    if positives.is_empty() || negatives.is_empty() {
        return None;
    }

    let mut wins = 0.0;
    for p in &positives {
        for n in &negatives {
            if p > n {
                wins += 1.0;
            } else if p == n {
                wins += 0.5;
            }
        }
    }
    Some(wins / (positives.len() * negatives.len()) as f64)
}
