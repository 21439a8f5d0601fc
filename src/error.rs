//! Error types for the habit engine

use thiserror::Error;

/// Errors that can occur during feature engineering, training and inference
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{model}: insufficient data (need {required} {unit}, got {found})")]
    InsufficientData {
        model: &'static str,
        required: usize,
        found: usize,
        unit: &'static str,
    },

    #[error("{0}: model not trained yet")]
    NotTrained(&'static str),

    #[error("Missing required feature: {0}")]
    MissingFeature(String),

    #[error("Model fit failed: {0}")]
    ModelFit(String),

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid daily record: {0}")]
    InvalidRecord(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl EngineError {
    /// True when the error only signals a data-sufficiency precondition
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, EngineError::InsufficientData { .. })
    }
}
