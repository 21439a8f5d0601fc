//! Predictive models
//!
//! Each model owns its learned artifact behind a [`ModelState`]. Training is the
//! only mutation; inference reads the trained artifact or reports that none exists.

pub mod adherence;
pub mod anomaly;
pub mod burnout;
pub mod episodes;
pub mod linalg;
pub mod scaler;

pub use adherence::AdherenceModel;
pub use anomaly::AnomalyDetector;
pub use burnout::BurnoutRiskModel;
pub use episodes::{Episode, EpisodeCovariates, EpisodeSegmenter};

/// Lifecycle of a learned artifact
#[derive(Debug, Clone, PartialEq)]
pub enum ModelState<A> {
    Untrained,
    Trained(A),
}

impl<A> Default for ModelState<A> {
    fn default() -> Self {
        ModelState::Untrained
    }
}

impl<A> ModelState<A> {
    pub fn is_trained(&self) -> bool {
        matches!(self, ModelState::Trained(_))
    }

    /// Borrow the trained artifact, if any
    pub fn artifact(&self) -> Option<&A> {
        match self {
            ModelState::Trained(artifact) => Some(artifact),
            ModelState::Untrained => None,
        }
    }
}
