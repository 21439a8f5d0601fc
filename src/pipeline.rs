//! Pipeline orchestration
//!
//! This module provides the public entry points of the engine. It wires the
//! stages together: daily records are engineered into feature rows, the three
//! models are trained on that table, and today's row is scored and turned into
//! a recommendation.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::features::FeatureEngineer;
use crate::models::{AdherenceModel, AnomalyDetector, BurnoutRiskModel, EpisodeCovariates};
use crate::recommender::RecommendationEngine;
use crate::types::{
    AdherenceMetrics, AnomalyMetrics, BurnoutMetrics, DailyRecord, FeatureRow, Recommendation,
    TrainingOutcome,
};
use crate::ENGINE_VERSION;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Adherence probability used when the classifier cannot score today
pub const FALLBACK_ADHERENCE: f64 = 0.5;

/// Rolling window (rows) whose zero exercise count marks a streak break
const STREAK_BREAK_WINDOW: usize = 3;
/// Leading streak days averaged into initial motivation
const MOTIVATION_DAYS: usize = 3;

const DEFAULT_SLEEP_CONSISTENCY: f64 = 0.5;
const DEFAULT_EFFORT_RATIO: f64 = 1.0;
const DEFAULT_SLEEP_VARIANCE: f64 = 50.0;
const DEFAULT_INITIAL_MOTIVATION: f64 = 30.0;

/// Per-model outcome of a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub engine_version: String,
    pub history_points: usize,
    pub adherence: TrainingOutcome<AdherenceMetrics>,
    pub burnout: TrainingOutcome<BurnoutMetrics>,
    pub anomaly: TrainingOutcome<AnomalyMetrics>,
}

/// Reject invalid magnitudes and duplicate dates
pub fn validate_history(records: &[DailyRecord]) -> Result<(), EngineError> {
    let mut seen = HashSet::with_capacity(records.len());
    for record in records {
        record.validate()?;
        if !seen.insert(record.date) {
            return Err(EngineError::InvalidRecord(format!(
                "duplicate date {}",
                record.date
            )));
        }
    }
    Ok(())
}

/// Covariates of the streak that is active on the last row.
///
/// The streak starts after the last 3-row window without any exercise; when no
/// such window ends before the last row the whole table is the streak. Current
/// sleep and load values come from the last row.
pub fn current_streak_covariates(rows: &[FeatureRow]) -> EpisodeCovariates {
    let Some(today) = rows.last() else {
        return EpisodeCovariates {
            avg_sleep_consistency: DEFAULT_SLEEP_CONSISTENCY,
            avg_effort_ratio: DEFAULT_EFFORT_RATIO,
            avg_sleep_var: DEFAULT_SLEEP_VARIANCE,
            initial_motivation: DEFAULT_INITIAL_MOTIVATION,
        };
    };

    let last_break = rows
        .windows(STREAK_BREAK_WINDOW)
        .rposition(|w| w.iter().all(|r| !r.record.exercise_done))
        .map(|start| start + STREAK_BREAK_WINDOW - 1);

    let streak = match last_break {
        Some(end) if end < rows.len() - 1 => &rows[end + 1..],
        _ => rows,
    };

    let leading = &streak[..streak.len().min(MOTIVATION_DAYS)];
    let initial_motivation = if leading.is_empty() {
        DEFAULT_INITIAL_MOTIVATION
    } else {
        leading.iter().map(|r| r.record.exercise_minutes).sum::<f64>() / leading.len() as f64
    };

    EpisodeCovariates {
        avg_sleep_consistency: today.sleep_consistency_score,
        avg_effort_ratio: today.effort_ratio,
        avg_sleep_var: today.sleep_variance_7d,
        initial_motivation,
    }
}

/// Owns the feature engineer, the three models and the recommender
#[derive(Debug, Clone, Default)]
pub struct HabitEngine {
    config: EngineConfig,
    adherence: AdherenceModel,
    burnout: BurnoutRiskModel,
    anomaly: AnomalyDetector,
    recommender: RecommendationEngine,
}

impl HabitEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            adherence: AdherenceModel::new(config.adherence.clone()),
            burnout: BurnoutRiskModel::new(config.burnout.clone()),
            anomaly: AnomalyDetector::new(config.anomaly.clone()),
            recommender: RecommendationEngine::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn adherence_model(&self) -> &AdherenceModel {
        &self.adherence
    }

    pub fn burnout_model(&self) -> &BurnoutRiskModel {
        &self.burnout
    }

    pub fn anomaly_detector(&self) -> &AnomalyDetector {
        &self.anomaly
    }

    /// Train every model on the history.
    ///
    /// Per-model failures are reported in the returned [`TrainingReport`];
    /// only invalid input fails the call.
    pub fn train(&mut self, history: &[DailyRecord]) -> Result<TrainingReport, EngineError> {
        validate_history(history)?;
        let rows = FeatureEngineer::enhance(history);

        let report = TrainingReport {
            engine_version: ENGINE_VERSION.to_string(),
            history_points: history.len(),
            adherence: TrainingOutcome::strict(self.adherence.train(&rows)),
            burnout: TrainingOutcome::lenient(self.burnout.train(&rows)),
            anomaly: TrainingOutcome::strict(self.anomaly.train(&rows)),
        };

        info!(
            history_points = report.history_points,
            adherence = report.adherence.is_success(),
            burnout = report.burnout.is_success(),
            anomaly = report.anomaly.is_success(),
            "engine training finished"
        );
        Ok(report)
    }

    /// Score `today` in the context of `history` and pick a recommendation.
    ///
    /// A history record on today's date is replaced by `today`. Model failures
    /// fall back to neutral values so a recommendation is always produced.
    pub fn recommend(
        &self,
        history: &[DailyRecord],
        today: DailyRecord,
        user_id: &str,
    ) -> Result<Recommendation, EngineError> {
        today.validate()?;
        let date = today.date;
        let mut records: Vec<DailyRecord> = history
            .iter()
            .filter(|r| r.date != date)
            .cloned()
            .collect();
        records.push(today);
        validate_history(&records)?;

        let rows = FeatureEngineer::enhance(&records);
        let cutoff = rows
            .iter()
            .position(|r| r.record.date == date)
            .map_or(rows.len(), |i| i + 1);
        let rows = &rows[..cutoff];
        let today_row = rows.last().ok_or_else(|| {
            EngineError::InvalidRecord(format!("no feature row for {date}"))
        })?;

        let adherence = self
            .adherence
            .predict_next_day_proba(today_row)
            .unwrap_or_else(|e| {
                warn!(error = %e, "adherence unavailable, using fallback");
                FALLBACK_ADHERENCE
            });

        let burnout_risk = self
            .burnout
            .predict_current_risk(&current_streak_covariates(rows));

        let is_anomaly = match self.anomaly.check_anomaly(today_row) {
            Ok(check) => check.is_anomaly,
            Err(e) => {
                warn!(error = %e, "anomaly check failed, assuming normal day");
                false
            }
        };

        Ok(self.recommender.generate_recommendation(
            user_id,
            &date.to_string(),
            adherence,
            burnout_risk,
            is_anomaly,
            today_row,
        ))
    }
}

/// Engine shared between readers with atomic retraining.
///
/// Readers clone an `Arc` of the current engine and never observe a partially
/// trained model; `retrain` fits a fresh engine outside the lock and swaps it in.
#[derive(Debug, Clone, Default)]
pub struct SharedEngine {
    current: Arc<RwLock<Arc<HabitEngine>>>,
}

impl SharedEngine {
    pub fn new(engine: HabitEngine) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(engine))),
        }
    }

    /// The engine in service right now
    pub fn snapshot(&self) -> Arc<HabitEngine> {
        Arc::clone(&self.current.read())
    }

    pub fn retrain(&self, history: &[DailyRecord]) -> Result<TrainingReport, EngineError> {
        let config = self.snapshot().config().clone();
        let mut fresh = HabitEngine::new(config);
        let report = fresh.train(history)?;
        *self.current.write() = Arc::new(fresh);
        Ok(report)
    }

    pub fn recommend(
        &self,
        history: &[DailyRecord],
        today: DailyRecord,
        user_id: &str,
    ) -> Result<Recommendation, EngineError> {
        self.snapshot().recommend(history, today, user_id)
    }
}
