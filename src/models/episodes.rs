//! Episode segmentation
//!
//! Reframes one user's feature table as a population of "lives" for survival
//! analysis. A life starts on an active day and ends either in a dropout (the
//! first day of a long enough miss run) or, at the end of history, censored.

use crate::error::EngineError;
use crate::features::MissRun;
use crate::types::{FeatureRow, FeatureSource};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Number of leading episode days averaged into `initial_motivation`
const MOTIVATION_DAYS: usize = 3;

/// Per-episode covariates used by the hazard model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpisodeCovariates {
    pub avg_sleep_consistency: f64,
    pub avg_effort_ratio: f64,
    pub avg_sleep_var: f64,
    /// Mean exercise minutes of the first three days
    pub initial_motivation: f64,
}

impl EpisodeCovariates {
    pub const NAMES: [&'static str; 4] = [
        "avg_sleep_consistency",
        "avg_effort_ratio",
        "avg_sleep_var",
        "initial_motivation",
    ];

    pub fn to_array(&self) -> [f64; 4] {
        [
            self.avg_sleep_consistency,
            self.avg_effort_ratio,
            self.avg_sleep_var,
            self.initial_motivation,
        ]
    }

    /// Aggregate over a non-empty span of rows
    pub fn from_span(span: &[FeatureRow]) -> Self {
        let mean = |f: fn(&FeatureRow) -> f64, rows: &[FeatureRow]| -> f64 {
            if rows.is_empty() {
                0.0
            } else {
                rows.iter().map(f).sum::<f64>() / rows.len() as f64
            }
        };
        let leading = &span[..span.len().min(MOTIVATION_DAYS)];

        Self {
            avg_sleep_consistency: mean(|r| r.sleep_consistency_score, span),
            avg_effort_ratio: mean(|r| r.effort_ratio, span),
            avg_sleep_var: mean(|r| r.sleep_variance_7d, span),
            initial_motivation: mean(|r| r.record.exercise_minutes, leading),
        }
    }

    /// Read covariates by name from a map or row
    pub fn from_source(source: &impl FeatureSource) -> Result<Self, EngineError> {
        Ok(Self {
            avg_sleep_consistency: source.require("avg_sleep_consistency")?,
            avg_effort_ratio: source.require("avg_effort_ratio")?,
            avg_sleep_var: source.require("avg_sleep_var")?,
            initial_motivation: source.require("initial_motivation")?,
        })
    }
}

impl FeatureSource for EpisodeCovariates {
    fn feature(&self, name: &str) -> Option<f64> {
        Self::NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| self.to_array()[i])
    }
}

/// One life: a span of history ending in dropout or censoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Calendar days from start to end
    pub duration: i64,
    /// True when the episode ended in a dropout
    pub event: bool,
    pub covariates: EpisodeCovariates,
}

impl Episode {
    fn from_span(span: &[FeatureRow], event: bool) -> Option<Self> {
        let start = span.first()?.record.date;
        let end = span.last()?.record.date;
        Some(Self {
            start,
            end,
            duration: (end - start).num_days(),
            event,
            covariates: EpisodeCovariates::from_span(span),
        })
    }
}

/// Single left-to-right scan from feature rows to episodes
#[derive(Debug, Clone, Copy)]
pub struct EpisodeSegmenter {
    /// Miss-run length that counts as a dropout
    pub dropout_threshold_days: usize,
    /// Spans with fewer rows are discarded
    pub min_rows: usize,
}

impl Default for EpisodeSegmenter {
    fn default() -> Self {
        Self {
            dropout_threshold_days: 5,
            min_rows: 3,
        }
    }
}

impl EpisodeSegmenter {
    pub fn new(dropout_threshold_days: usize, min_rows: usize) -> Self {
        Self {
            dropout_threshold_days,
            min_rows,
        }
    }

    /// Row indices of dropout ("death") days, in order.
    ///
    /// A death is the first day of a run of days without exercise that reaches
    /// the threshold length.
    pub fn death_indices(&self, rows: &[FeatureRow]) -> Vec<usize> {
        let threshold = self.dropout_threshold_days.max(1) as u32;
        let mut run = MissRun::default();
        let mut deaths = Vec::new();

        for (i, row) in rows.iter().enumerate() {
            if run.step(!row.record.exercise_done) == threshold {
                deaths.push(i + 1 - threshold as usize);
            }
        }
        deaths
    }

    /// Segment a date-ordered feature table into episodes
    pub fn segment(&self, rows: &[FeatureRow]) -> Vec<Episode> {
        let deaths = self.death_indices(rows);
        let mut episodes = Vec::new();
        let mut start = if rows.is_empty() { None } else { Some(0) };

        for &death in &deaths {
            let Some(current) = start else {
                break;
            };

            // A dropout on the episode's first day neither ends nor restarts it
            if death <= current {
                continue;
            }

            let span = &rows[current..=death];
            if span.len() >= self.min_rows {
                episodes.extend(Episode::from_span(span, true));
            } else {
                debug!(start = %rows[current].record.date, "discarding short episode");
            }

            // Restart on the first active day after the dropout
            start = rows[death + 1..]
                .iter()
                .position(|r| r.record.exercise_done)
                .map(|offset| death + 1 + offset);
        }

        if let Some(current) = start {
            let span = &rows[current..];
            if span.len() >= self.min_rows {
                episodes.extend(Episode::from_span(span, false));
            }
        }

        debug!(
            deaths = deaths.len(),
            episodes = episodes.len(),
            "segmented history into episodes"
        );
        episodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureEngineer;
    use crate::types::DailyRecord;
    use std::collections::HashMap;

    fn make_rows(pattern: &str) -> Vec<FeatureRow> {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let records: Vec<DailyRecord> = pattern
            .chars()
            .enumerate()
            .map(|(i, c)| {
                let minutes = if c == 'x' { 30.0 + i as f64 } else { 0.0 };
                DailyRecord::new(start + chrono::Duration::days(i as i64), 7000, minutes, 420.0)
            })
            .collect();
        FeatureEngineer::enhance(&records)
    }

    fn assert_disjoint(episodes: &[Episode]) {
        for pair in episodes.windows(2) {
            assert!(pair[0].end < pair[1].start);
        }
    }

    #[test]
    fn test_no_dropout_is_one_censored_episode() {
        let rows = make_rows("xx.xx..xxx");
        let episodes = EpisodeSegmenter::default().segment(&rows);
        assert_eq!(episodes.len(), 1);
        assert!(!episodes[0].event);
        assert_eq!(episodes[0].duration, 9);
    }

    #[test]
    fn test_short_history_yields_nothing() {
        let rows = make_rows("xx");
        assert!(EpisodeSegmenter::default().segment(&rows).is_empty());
        assert!(EpisodeSegmenter::default().segment(&[]).is_empty());
    }

    #[test]
    fn test_dropout_then_restart() {
        // Active 4 days, 5-day miss run, active again for 4 days
        let rows = make_rows("xxxx.....xxxx");
        let segmenter = EpisodeSegmenter::default();
        assert_eq!(segmenter.death_indices(&rows), vec![4]);

        let episodes = segmenter.segment(&rows);
        assert_eq!(episodes.len(), 2);

        let died = &episodes[0];
        assert!(died.event);
        assert_eq!(died.start, rows[0].record.date);
        assert_eq!(died.end, rows[4].record.date);
        assert_eq!(died.duration, 4);
        // Mean of the first three days' minutes: 30, 31, 32
        assert!((died.covariates.initial_motivation - 31.0).abs() < 1e-9);

        let censored = &episodes[1];
        assert!(!censored.event);
        assert_eq!(censored.start, rows[9].record.date);
        assert_eq!(censored.duration, 3);
        assert_disjoint(&episodes);
    }

    #[test]
    fn test_dropout_without_restart_has_no_tail() {
        let rows = make_rows("xxxxx......");
        let episodes = EpisodeSegmenter::default().segment(&rows);
        assert_eq!(episodes.len(), 1);
        assert!(episodes[0].event);
    }

    #[test]
    fn test_opening_dropout_keeps_first_start() {
        let rows = make_rows(".....xxxx.....xxx");
        let episodes = EpisodeSegmenter::default().segment(&rows);
        assert_eq!(episodes.len(), 2);
        assert!(episodes[0].event);
        assert_eq!(episodes[0].start, rows[0].record.date);
        assert_eq!(episodes[0].end, rows[9].record.date);
        assert_eq!(episodes[0].duration, 9);
        assert!(!episodes[1].event);
        assert_eq!(episodes[1].start, rows[14].record.date);
        assert_disjoint(&episodes);
    }

    #[test]
    fn test_short_segment_is_discarded_but_scan_advances() {
        // Two rows before the first dropout are inconclusive
        let rows = make_rows("x.....xxxx.....xxx");
        let episodes = EpisodeSegmenter::default().segment(&rows);
        assert_eq!(episodes.len(), 2);
        assert_eq!(episodes[0].start, rows[6].record.date);
        assert_eq!(episodes[0].end, rows[10].record.date);
        assert!(episodes[0].event);
        assert_eq!(episodes[1].start, rows[15].record.date);
        assert_disjoint(&episodes);
    }

    #[test]
    fn test_durations_fit_inside_history() {
        let rows = make_rows("xx.xxx......xxxx.x.......xxxxx..xxx");
        let episodes = EpisodeSegmenter::default().segment(&rows);
        let span = (rows.last().unwrap().record.date - rows[0].record.date).num_days();
        let total: i64 = episodes.iter().map(|e| e.duration).sum();

        assert!(episodes.iter().all(|e| e.duration >= 0));
        assert!(total <= span);
        assert_disjoint(&episodes);
    }

    #[test]
    fn test_threshold_is_configurable() {
        let rows = make_rows("xxxx...xxxx");
        assert!(EpisodeSegmenter::new(5, 3).death_indices(&rows).is_empty());
        assert_eq!(EpisodeSegmenter::new(3, 3).death_indices(&rows), vec![4]);
    }

    #[test]
    fn test_covariates_from_map() {
        let mut map = HashMap::new();
        for (i, name) in EpisodeCovariates::NAMES.iter().enumerate() {
            map.insert(name.to_string(), i as f64);
        }
        let covariates = EpisodeCovariates::from_source(&map).unwrap();
        assert_eq!(covariates.to_array(), [0.0, 1.0, 2.0, 3.0]);
        assert_eq!(covariates.feature("avg_sleep_var"), Some(2.0));

        map.remove("initial_motivation");
        assert!(matches!(
            EpisodeCovariates::from_source(&map),
            Err(EngineError::MissingFeature(_))
        ));
    }
}
