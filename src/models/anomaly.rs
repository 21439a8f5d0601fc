//! Behavioral anomaly detection
//!
//! An isolation forest over daily steps, sleep and sleep variability. Points
//! that random axis-aligned cuts isolate quickly are unusual days.

use crate::config::AnomalyConfig;
use crate::error::EngineError;
use crate::models::scaler::StandardScaler;
use crate::models::ModelState;
use crate::types::{AnomalyCheck, AnomalyMetrics, FeatureRow, FeatureSource};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

const MODEL_NAME: &str = "anomaly";

/// Scored magnitudes, in order
pub const FEATURE_COLUMNS: [&str; 3] = ["total_steps", "sleep_duration_minutes", "sleep_variance_7d"];

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Expected path length of an unsuccessful search in a binary tree of `n` points
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum IsolationNode {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<IsolationNode>,
        right: Box<IsolationNode>,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct IsolationTree {
    root: IsolationNode,
}

impl IsolationTree {
    fn fit(rng: &mut ChaCha8Rng, data: &[Vec<f64>], indices: Vec<usize>, depth_limit: usize) -> Self {
        Self {
            root: grow(rng, data, indices, 0, depth_limit),
        }
    }

    fn path_length(&self, point: &[f64]) -> f64 {
        let mut node = &self.root;
        let mut depth = 0.0;
        loop {
            match node {
                IsolationNode::Leaf { size } => return depth + average_path_length(*size),
                IsolationNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if point[*feature] < *threshold { left } else { right };
                    depth += 1.0;
                }
            }
        }
    }
}

fn grow(
    rng: &mut ChaCha8Rng,
    data: &[Vec<f64>],
    indices: Vec<usize>,
    depth: usize,
    depth_limit: usize,
) -> IsolationNode {
    if depth >= depth_limit || indices.len() <= 1 {
        return IsolationNode::Leaf {
            size: indices.len(),
        };
    }

    // Only features that still vary inside this node can be cut
    let width = data[indices[0]].len();
    let candidates: Vec<(usize, f64, f64)> = (0..width)
        .filter_map(|f| {
            let (lo, hi) = indices.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                (lo.min(data[i][f]), hi.max(data[i][f]))
            });
            (hi > lo).then_some((f, lo, hi))
        })
        .collect();

    if candidates.is_empty() {
        return IsolationNode::Leaf {
            size: indices.len(),
        };
    }

    let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
    let threshold = rng.gen_range(lo..hi);
    let (left, right): (Vec<usize>, Vec<usize>) =
        indices.into_iter().partition(|&i| data[i][feature] < threshold);

    IsolationNode::Split {
        feature,
        threshold,
        left: Box::new(grow(rng, data, left, depth + 1, depth_limit)),
        right: Box::new(grow(rng, data, right, depth + 1, depth_limit)),
    }
}

/// Linear-interpolated percentile of unsorted values, `q` in [0, 100]
fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let position = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// Trained forest plus the decision offset
#[derive(Debug, Clone, PartialEq)]
pub struct ForestArtifact {
    scaler: StandardScaler,
    trees: Vec<IsolationTree>,
    subsample_size: usize,
    offset: f64,
}

impl ForestArtifact {
    /// Negated anomaly score `-2^(-E[h] / c(psi))`; lower is more abnormal
    fn score_samples(&self, scaled: &[f64]) -> f64 {
        let mean_depth = self.trees.iter().map(|t| t.path_length(scaled)).sum::<f64>()
            / self.trees.len().max(1) as f64;
        let normalizer = average_path_length(self.subsample_size).max(f64::EPSILON);
        -(2f64).powf(-mean_depth / normalizer)
    }

    fn decision(&self, raw: &[f64]) -> f64 {
        self.score_samples(&self.scaler.transform(raw)) - self.offset
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }
}

/// Unsupervised outlier scorer
#[derive(Debug, Clone, Default)]
pub struct AnomalyDetector {
    config: AnomalyConfig,
    state: ModelState<ForestArtifact>,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self {
            config,
            state: ModelState::Untrained,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.state.is_trained()
    }

    pub fn artifact(&self) -> Option<&ForestArtifact> {
        self.state.artifact()
    }

    pub fn train(&mut self, rows: &[FeatureRow]) -> Result<AnomalyMetrics, EngineError> {
        if rows.len() < self.config.min_rows {
            return Err(EngineError::InsufficientData {
                model: MODEL_NAME,
                required: self.config.min_rows,
                found: rows.len(),
                unit: "days",
            });
        }

        let raw = rows
            .iter()
            .map(extract_features)
            .collect::<Result<Vec<_>, _>>()?;
        let scaler = StandardScaler::fit(&raw);
        let data = scaler.transform_all(&raw);

        let n = data.len();
        let subsample_size = self.config.max_samples.clamp(1, n);
        let depth_limit = (subsample_size as f64).log2().ceil().max(1.0) as usize;
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);

        let trees: Vec<IsolationTree> = (0..self.config.n_estimators.max(1))
            .map(|_| {
                let indices = rand::seq::index::sample(&mut rng, n, subsample_size).into_vec();
                IsolationTree::fit(&mut rng, &data, indices, depth_limit)
            })
            .collect();

        let mut artifact = ForestArtifact {
            scaler,
            trees,
            subsample_size,
            offset: 0.0,
        };

        let scores: Vec<f64> = data.iter().map(|x| artifact.score_samples(x)).collect();
        artifact.offset = percentile(&scores, 100.0 * self.config.contamination);

        let anomalies_detected_history = scores.iter().filter(|s| **s < artifact.offset).count();

        debug!(
            trees = artifact.trees.len(),
            subsample_size,
            offset = artifact.offset,
            "isolation forest fitted"
        );
        self.state = ModelState::Trained(artifact);
        info!(rows = n, anomalies_detected_history, "anomaly detector trained");

        Ok(AnomalyMetrics {
            anomalies_detected_history,
        })
    }

    /// Score one day. An untrained detector reports a normal day.
    pub fn check_anomaly(&self, row: &impl FeatureSource) -> Result<AnomalyCheck, EngineError> {
        let Some(artifact) = self.state.artifact() else {
            debug!("anomaly detector untrained, reporting normal day");
            return Ok(AnomalyCheck {
                is_anomaly: false,
                severity_score: 0.0,
            });
        };

        let severity_score = artifact.decision(&extract_features(row)?);
        Ok(AnomalyCheck {
            is_anomaly: severity_score < 0.0,
            severity_score,
        })
    }
}

fn extract_features(row: &impl FeatureSource) -> Result<Vec<f64>, EngineError> {
    FEATURE_COLUMNS.iter().map(|name| row.require(name)).collect()
}
