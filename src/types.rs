//! Core types for the habit engine
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: daily records, engineered feature rows, model reports and the
//! final recommendation.

use crate::error::EngineError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One calendar day of behavior, as supplied by the daily aggregator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    /// Calendar date (unique key)
    pub date: NaiveDate,
    /// Total step count
    pub total_steps: u32,
    /// Exercise duration (minutes)
    pub exercise_minutes: f64,
    /// Whether any exercise happened (`exercise_minutes > 0`)
    pub exercise_done: bool,
    /// Main sleep duration (minutes)
    #[serde(default)]
    pub sleep_duration_minutes: f64,
    /// Set when the day carries no usable signal
    #[serde(default)]
    pub data_missing_flag: bool,
    /// First exercise session start, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exercise_start_time: Option<DateTime<Utc>>,
    /// Main sleep start, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_start_time: Option<DateTime<Utc>>,
    /// Main sleep end, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_end_time: Option<DateTime<Utc>>,
    /// Rough sedentary proxy (minutes)
    #[serde(default)]
    pub sedentary_minutes: f64,
}

impl DailyRecord {
    /// Build a record from the four core magnitudes
    pub fn new(
        date: NaiveDate,
        total_steps: u32,
        exercise_minutes: f64,
        sleep_duration_minutes: f64,
    ) -> Self {
        Self {
            date,
            total_steps,
            exercise_minutes,
            exercise_done: exercise_minutes > 0.0,
            sleep_duration_minutes,
            data_missing_flag: false,
            exercise_start_time: None,
            sleep_start_time: None,
            sleep_end_time: None,
            sedentary_minutes: 0.0,
        }
    }

    /// Check magnitudes are finite and non-negative
    pub fn validate(&self) -> Result<(), EngineError> {
        let checks = [
            ("exercise_minutes", self.exercise_minutes),
            ("sleep_duration_minutes", self.sleep_duration_minutes),
            ("sedentary_minutes", self.sedentary_minutes),
        ];
        for (name, value) in checks {
            if !value.is_finite() || value < 0.0 {
                return Err(EngineError::InvalidRecord(format!(
                    "{}: {name} must be a finite value >= 0, got {value}",
                    self.date
                )));
            }
        }
        Ok(())
    }
}

/// Named lookup of numeric features.
///
/// Inference operations take any source so callers can pass either a full
/// engineered row or a partial map of values.
pub trait FeatureSource {
    /// Value of the named feature, `None` if the source does not carry it
    fn feature(&self, name: &str) -> Option<f64>;

    /// Value of the named feature or a `MissingFeature` error
    fn require(&self, name: &str) -> Result<f64, EngineError> {
        self.feature(name)
            .ok_or_else(|| EngineError::MissingFeature(name.to_string()))
    }
}

impl FeatureSource for HashMap<String, f64> {
    fn feature(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

/// One engineered row per input record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    /// Source record
    #[serde(flatten)]
    pub record: DailyRecord,
    /// Previous row's steps
    pub prev_steps: f64,
    /// Previous row's sleep duration (minutes)
    pub prev_sleep_dur: f64,
    /// Previous row's exercise flag as 0/1
    pub prev_exercise_done: f64,
    /// 7-row rolling mean of steps
    pub steps_7d_avg: f64,
    /// 7-row rolling mean of sleep duration
    pub sleep_7d_avg: f64,
    /// 7-row rolling standard deviation of sleep duration
    pub sleep_variance_7d: f64,
    /// 7-row rolling standard deviation of steps
    pub steps_variance_7d: f64,
    /// Inverse coefficient of variation of sleep, in (0, 1]
    pub sleep_consistency_score: f64,
    /// Misses in the trailing 3 rows
    pub rolling_misses_3d: f64,
    /// Current run of days without exercise
    pub consecutive_misses: u32,
    /// Short lapse (1-2 missed days)
    pub is_recovery_period: bool,
    /// Long lapse (more than 4 missed days)
    pub is_streak_break: bool,
    /// Lapse length when the streak is broken, else 0
    pub days_since_workout: u32,
    /// 0 = Monday .. 6 = Sunday
    pub day_of_week: u32,
    /// Saturday or Sunday
    pub is_weekend: bool,
    /// 30-row rolling mean of steps
    pub steps_30d_avg: f64,
    /// Short-term steps relative to the 30-row baseline
    pub effort_ratio: f64,
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

impl FeatureSource for FeatureRow {
    fn feature(&self, name: &str) -> Option<f64> {
        let value = match name {
            "total_steps" => self.record.total_steps as f64,
            "exercise_minutes" => self.record.exercise_minutes,
            "exercise_done" => flag(self.record.exercise_done),
            "sleep_duration_minutes" => self.record.sleep_duration_minutes,
            "data_missing_flag" => flag(self.record.data_missing_flag),
            "sedentary_minutes" => self.record.sedentary_minutes,
            "prev_steps" => self.prev_steps,
            "prev_sleep_dur" => self.prev_sleep_dur,
            "prev_exercise_done" => self.prev_exercise_done,
            "steps_7d_avg" => self.steps_7d_avg,
            "sleep_7d_avg" => self.sleep_7d_avg,
            "sleep_variance_7d" => self.sleep_variance_7d,
            "steps_variance_7d" => self.steps_variance_7d,
            "sleep_consistency_score" => self.sleep_consistency_score,
            "rolling_misses_3d" => self.rolling_misses_3d,
            "consecutive_misses" => self.consecutive_misses as f64,
            "is_recovery_period" => flag(self.is_recovery_period),
            "is_streak_break" => flag(self.is_streak_break),
            "days_since_workout" => self.days_since_workout as f64,
            "day_of_week" => self.day_of_week as f64,
            "is_weekend" => flag(self.is_weekend),
            "steps_30d_avg" => self.steps_30d_avg,
            "effort_ratio" => self.effort_ratio,
            _ => return None,
        };
        Some(value)
    }
}

/// Categorical recommendation produced by the rule cascade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationType {
    /// Keep doing what you're doing
    Maintain,
    /// Reduce difficulty before burnout
    ScaleDown,
    /// Active recovery day
    Recovery,
    /// Re-establish timing, not intensity
    Anchoring,
    /// Milestone or identity reinforcement
    Celebration,
}

impl RecommendationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationType::Maintain => "maintain",
            RecommendationType::ScaleDown => "scale_down",
            RecommendationType::Recovery => "recovery",
            RecommendationType::Anchoring => "anchoring",
            RecommendationType::Celebration => "celebration",
        }
    }
}

/// Final engine output for one user and day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub user_id: String,
    pub date: String,
    pub adherence_probability: f64,
    pub burnout_risk_score: f64,
    pub is_anomaly: bool,
    pub recommendation_type: RecommendationType,
    pub message_title: String,
    pub message_body: String,
    pub suggested_action: String,
    /// Ordered explanation, most important first
    pub why_this_recommendation: Vec<String>,
}

/// Held-out metrics of the adherence classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdherenceMetrics {
    pub accuracy: f64,
    pub auc: f64,
    /// Fitted coefficients on standardized inputs, keyed by feature name
    pub feature_importance: HashMap<String, f64>,
}

/// Fit summary of the dropout hazard model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurnoutMetrics {
    pub concordance: f64,
    /// Log hazard ratios keyed by covariate name
    pub coefficients: HashMap<String, f64>,
    pub episodes: usize,
    pub events: usize,
}

/// Fit summary of the anomaly detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyMetrics {
    pub anomalies_detected_history: usize,
}

/// Single-day anomaly verdict
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyCheck {
    pub is_anomaly: bool,
    /// Lower (more negative) means more anomalous
    pub severity_score: f64,
}

/// Serializable training result, tagged by `status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrainingOutcome<T> {
    Success(T),
    Warning { message: String },
    Error { message: String },
}

impl<T> TrainingOutcome<T> {
    /// Map a training result, reporting insufficient data as `warning`
    pub fn lenient(result: Result<T, EngineError>) -> Self {
        match result {
            Ok(metrics) => TrainingOutcome::Success(metrics),
            Err(e) if e.is_insufficient_data() => TrainingOutcome::Warning {
                message: e.to_string(),
            },
            Err(e) => TrainingOutcome::Error {
                message: e.to_string(),
            },
        }
    }

    /// Map a training result, reporting every failure as `error`
    pub fn strict(result: Result<T, EngineError>) -> Self {
        match result {
            Ok(metrics) => TrainingOutcome::Success(metrics),
            Err(e) => TrainingOutcome::Error {
                message: e.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TrainingOutcome::Success(_))
    }

    pub fn metrics(&self) -> Option<&T> {
        match self {
            TrainingOutcome::Success(metrics) => Some(metrics),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_new_record_derives_exercise_flag() {
        assert!(DailyRecord::new(day(1), 8000, 30.0, 420.0).exercise_done);
        assert!(!DailyRecord::new(day(1), 8000, 0.0, 420.0).exercise_done);
    }

    #[test]
    fn test_validate_rejects_negative_sleep() {
        let record = DailyRecord::new(day(2), 100, 0.0, -5.0);
        let err = record.validate().unwrap_err();
        assert!(matches!(err, EngineError::InvalidRecord(_)));
    }

    #[test]
    fn test_record_deserializes_with_defaults() {
        let json = r#"{"date":"2024-01-03","total_steps":5000,"exercise_minutes":0,"exercise_done":false}"#;
        let record: DailyRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.sleep_duration_minutes, 0.0);
        assert!(!record.data_missing_flag);
        assert!(record.sleep_end_time.is_none());
    }

    #[test]
    fn test_map_feature_source() {
        let mut map = HashMap::new();
        map.insert("total_steps".to_string(), 1200.0);
        assert_eq!(map.require("total_steps").unwrap(), 1200.0);
        assert!(matches!(
            map.require("sleep_variance_7d"),
            Err(EngineError::MissingFeature(name)) if name == "sleep_variance_7d"
        ));
    }

    #[test]
    fn test_training_outcome_tagging() {
        let warn: TrainingOutcome<AnomalyMetrics> =
            TrainingOutcome::lenient(Err(EngineError::InsufficientData {
                model: "burnout",
                required: 2,
                found: 1,
                unit: "episodes",
            }));
        let json = serde_json::to_value(&warn).unwrap();
        assert_eq!(json["status"], "warning");

        let ok = TrainingOutcome::strict(Ok(AnomalyMetrics {
            anomalies_detected_history: 3,
        }));
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["anomalies_detected_history"], 3);
    }

    #[test]
    fn test_recommendation_type_serde() {
        let json = serde_json::to_string(&RecommendationType::ScaleDown).unwrap();
        assert_eq!(json, "\"scale_down\"");
        assert_eq!(RecommendationType::ScaleDown.as_str(), "scale_down");
    }
}
