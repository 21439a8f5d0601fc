//! Feature engineering
//!
//! This module turns ordered daily records into model-ready feature rows:
//! - Lag-1 values of steps, sleep and exercise
//! - Rolling trends and dispersion over trailing row windows
//! - Sleep consistency and load (effort) ratio
//! - Miss-run streak signals and temporal context
//!
//! Every derived value at row `i` depends only on rows `0..=i`. Windows count
//! rows, not calendar days; missing calendar days are not imputed.

use crate::types::{DailyRecord, FeatureRow};
use chrono::Datelike;
use tracing::debug;

/// Guard against division by zero in ratio features
pub const EPSILON: f64 = 1e-6;

/// Short trend window (rows)
const TREND_WINDOW: usize = 7;
/// Minimum rows for a dispersion estimate
const DISPERSION_MIN_ROWS: usize = 3;
/// Trailing window for the miss counter (rows)
const MISS_WINDOW: usize = 3;
/// Long baseline window (rows)
const BASELINE_WINDOW: usize = 30;
/// Minimum rows for the long baseline
const BASELINE_MIN_ROWS: usize = 7;

/// Miss runs shorter than this count as a recovery period
const RECOVERY_MAX_MISSES: u32 = 3;
/// Miss runs longer than this count as a broken streak
const STREAK_BREAK_MISSES: u32 = 4;

/// Stateless transform from daily records to feature rows
pub struct FeatureEngineer;

impl FeatureEngineer {
    /// Engineer features for every record. Input is sorted by date first.
    pub fn enhance(records: &[DailyRecord]) -> Vec<FeatureRow> {
        if records.is_empty() {
            return Vec::new();
        }

        let mut sorted = records.to_vec();
        sorted.sort_by_key(|r| r.date);

        let steps: Vec<f64> = sorted.iter().map(|r| r.total_steps as f64).collect();
        let sleep: Vec<f64> = sorted.iter().map(|r| r.sleep_duration_minutes).collect();
        let window_misses: Vec<f64> = sorted
            .iter()
            .map(|r| if r.data_missing_flag || !r.exercise_done { 1.0 } else { 0.0 })
            .collect();

        let mut run = MissRun::default();
        let mut rows: Vec<FeatureRow> = Vec::with_capacity(sorted.len());

        for (i, record) in sorted.into_iter().enumerate() {
            let previous = i.checked_sub(1).map(|p| &rows[p]);
            let prev_steps = previous.map_or(0.0, |p| p.record.total_steps as f64);
            let prev_sleep_dur = previous.map_or(0.0, |p| p.record.sleep_duration_minutes);
            let prev_exercise_done = previous.map_or(0.0, |p| {
                if p.record.exercise_done {
                    1.0
                } else {
                    0.0
                }
            });

            let steps_7d_avg = rolling_mean(&steps, i, TREND_WINDOW, 1);
            let sleep_7d_avg = rolling_mean(&sleep, i, TREND_WINDOW, 1);
            let sleep_std = rolling_std(&sleep, i, TREND_WINDOW, DISPERSION_MIN_ROWS);
            let steps_std = rolling_std(&steps, i, TREND_WINDOW, DISPERSION_MIN_ROWS);
            let sleep_consistency_score = match (sleep_std, sleep_7d_avg) {
                (Some(std), Some(mean)) => Some(consistency_score(std, mean)),
                _ => None,
            };

            let rolling_misses_3d = rolling_sum(&window_misses, i, MISS_WINDOW, MISS_WINDOW);

            let consecutive_misses = run.step(!record.exercise_done);
            let is_recovery_period =
                consecutive_misses > 0 && consecutive_misses < RECOVERY_MAX_MISSES;
            let is_streak_break = consecutive_misses > STREAK_BREAK_MISSES;
            let days_since_workout = if is_streak_break { consecutive_misses } else { 0 };

            let day_of_week = record.date.weekday().num_days_from_monday();
            let is_weekend = day_of_week >= 5;

            let steps_30d_avg = rolling_mean(&steps, i, BASELINE_WINDOW, BASELINE_MIN_ROWS);
            let effort_ratio = match (steps_7d_avg, steps_30d_avg) {
                (Some(short), Some(long)) => Some(short / (long + EPSILON)),
                _ => None,
            };

            rows.push(FeatureRow {
                record,
                prev_steps,
                prev_sleep_dur,
                prev_exercise_done,
                steps_7d_avg: steps_7d_avg.unwrap_or(0.0),
                sleep_7d_avg: sleep_7d_avg.unwrap_or(0.0),
                sleep_variance_7d: sleep_std.unwrap_or(0.0),
                steps_variance_7d: steps_std.unwrap_or(0.0),
                sleep_consistency_score: sleep_consistency_score.unwrap_or(0.0),
                rolling_misses_3d: rolling_misses_3d.unwrap_or(0.0),
                consecutive_misses,
                is_recovery_period,
                is_streak_break,
                days_since_workout,
                day_of_week,
                is_weekend,
                steps_30d_avg: steps_30d_avg.unwrap_or(0.0),
                effort_ratio: effort_ratio.unwrap_or(0.0),
            });
        }

        debug!(rows = rows.len(), "engineered feature table");
        rows
    }
}

/// Run-length counter over the miss indicator.
///
/// Grows by one per consecutive miss and resets on the first active day.
#[derive(Debug, Default, Clone, Copy)]
pub struct MissRun {
    length: u32,
}

impl MissRun {
    /// Feed the next day's miss indicator and return the current run length
    pub fn step(&mut self, is_miss: bool) -> u32 {
        self.length = if is_miss { self.length + 1 } else { 0 };
        self.length
    }
}

/// Inverse coefficient of variation bounded to (0, 1]
pub fn consistency_score(std_dev: f64, mean: f64) -> f64 {
    1.0 / (1.0 + std_dev / (mean + EPSILON))
}

/// Trailing window ending at `end` (inclusive), at most `window` rows long
fn trailing(values: &[f64], end: usize, window: usize) -> &[f64] {
    let start = (end + 1).saturating_sub(window);
    &values[start..=end]
}

/// Rolling mean; `None` until `min_rows` rows are available
pub fn rolling_mean(values: &[f64], end: usize, window: usize, min_rows: usize) -> Option<f64> {
    let slice = trailing(values, end, window);
    if slice.is_empty() || slice.len() < min_rows {
        return None;
    }
    Some(slice.iter().sum::<f64>() / slice.len() as f64)
}

/// Rolling sample standard deviation (n - 1 denominator)
pub fn rolling_std(values: &[f64], end: usize, window: usize, min_rows: usize) -> Option<f64> {
    let slice = trailing(values, end, window);
    if slice.len() < min_rows.max(2) {
        return None;
    }
    let n = slice.len() as f64;
    let mean = slice.iter().sum::<f64>() / n;
    let variance = slice.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(variance.sqrt())
}

/// Rolling sum; `None` until `min_rows` rows are available
pub fn rolling_sum(values: &[f64], end: usize, window: usize, min_rows: usize) -> Option<f64> {
    let slice = trailing(values, end, window);
    if slice.len() < min_rows {
        return None;
    }
    Some(slice.iter().sum())
}
