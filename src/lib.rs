//! Habit Engine - behavioral modeling for daily habit data
//!
//! The engine turns a user's ordered daily records (steps, sleep, exercise)
//! into next-day adherence, dropout hazard and anomaly signals, then merges
//! them into one deterministic recommendation:
//! daily records → feature engineering → {adherence, burnout, anomaly} → recommendation.
//!
//! ## Modules
//!
//! - **Features**: lag, rolling, consistency, streak and load signals per day
//! - **Models**: logistic adherence classifier, Cox dropout hazard over
//!   segmented episodes, isolation-forest anomaly detector
//! - **Recommender**: priority-ordered rule table
//! - **Aggregator / Synthetic**: raw event bucketing and seeded simulators

pub mod aggregator;
pub mod config;
pub mod error;
pub mod features;
pub mod models;
pub mod pipeline;
pub mod recommender;
pub mod synthetic;
pub mod types;

pub use aggregator::{DailyAggregator, HealthDataProvider, RawHealthEvent};
pub use config::EngineConfig;
pub use error::EngineError;
pub use features::FeatureEngineer;
pub use models::{AdherenceModel, AnomalyDetector, BurnoutRiskModel, EpisodeSegmenter};
pub use pipeline::{HabitEngine, SharedEngine, TrainingReport};
pub use recommender::RecommendationEngine;
pub use types::{DailyRecord, FeatureRow, FeatureSource, Recommendation, RecommendationType};

/// Engine version reported by the CLI and training reports
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name attached to CLI output
pub const PRODUCER_NAME: &str = "habit-engine";
