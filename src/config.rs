//! Configuration for the habit engine models.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub adherence: AdherenceConfig,
    pub burnout: BurnoutConfig,
    pub anomaly: AnomalyConfig,
}

impl EngineConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_json(&content)
    }

    /// Parse configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration as pretty JSON
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
            }
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
    }
}

/// Next-day adherence classifier settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdherenceConfig {
    /// Minimum labelled rows required to train
    pub min_rows: usize,
    /// Leading fraction of rows used for fitting; the rest is held out
    pub train_fraction: f64,
    /// Inverse L2 regularization strength
    pub inverse_regularization: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for AdherenceConfig {
    fn default() -> Self {
        Self {
            min_rows: 10,
            train_fraction: 0.8,
            inverse_regularization: 1.0,
            max_iterations: 100,
            tolerance: 1e-8,
        }
    }
}

/// Dropout hazard model settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BurnoutConfig {
    /// Miss-run length that counts as a dropout
    pub dropout_threshold_days: usize,
    /// Minimum episodes required to fit
    pub min_episodes: usize,
    /// Shorter spans are discarded as inconclusive
    pub min_episode_rows: usize,
    /// Ridge penalty on standardized coefficients
    pub penalizer: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for BurnoutConfig {
    fn default() -> Self {
        Self {
            dropout_threshold_days: 5,
            min_episodes: 2,
            min_episode_rows: 3,
            penalizer: 0.01,
            max_iterations: 50,
            tolerance: 1e-9,
        }
    }
}

/// Isolation forest settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Minimum rows (days) required to train
    pub min_rows: usize,
    /// Expected share of outliers in the history
    pub contamination: f64,
    pub n_estimators: usize,
    pub max_samples: usize,
    pub seed: u64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            min_rows: 14,
            contamination: 0.05,
            n_estimators: 100,
            max_samples: 256,
            seed: 42,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Serialize error: {0}")]
    SerializeError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_model_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.adherence.min_rows, 10);
        assert_eq!(config.burnout.min_episodes, 2);
        assert_eq!(config.anomaly.min_rows, 14);
        assert!((config.anomaly.contamination - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{"burnout": {"dropout_threshold_days": 7}}"#)
            .unwrap();
        assert_eq!(config.burnout.dropout_threshold_days, 7);
        assert_eq!(config.burnout.min_episode_rows, 3);
        assert_eq!(config.adherence, AdherenceConfig::default());
    }

    #[test]
    fn test_adherence_has_no_seed_knob() {
        // The logistic fit draws no random numbers; older files carrying a seed still load
        let config = EngineConfig::from_json(r#"{"adherence": {"seed": 7, "min_rows": 12}}"#)
            .unwrap();
        assert_eq!(config.adherence.min_rows, 12);
        let json = serde_json::to_value(&config).unwrap();
        assert!(json["adherence"].get("seed").is_none());
        assert_eq!(json["anomaly"]["seed"], 42);
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = EngineConfig::from_json("not json").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("habit-engine-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.json");

        let mut config = EngineConfig::default();
        config.anomaly.n_estimators = 25;
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);

        std::fs::remove_dir_all(&dir).ok();
    }
}
