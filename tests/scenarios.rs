//! End-to-end behavior of the engine on generated histories

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use habit_engine::aggregator::{DailyAggregator, HealthDataProvider};
use habit_engine::config::{BurnoutConfig, EngineConfig};
use habit_engine::models::{AdherenceModel, BurnoutRiskModel, EpisodeSegmenter};
use habit_engine::pipeline::HabitEngine;
use habit_engine::recommender::RecommendationEngine;
use habit_engine::synthetic::{simulate_history, MockHealthProvider, SimulationParams};
use habit_engine::types::{DailyRecord, RecommendationType, TrainingOutcome};
use habit_engine::FeatureEngineer;
use pretty_assertions::assert_eq;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;

const HISTORY_DAYS: usize = 90;
const TAIL_DAYS: usize = 14;

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

/// Habit-forming user: activity today makes activity tomorrow likely, and each
/// extra missed day makes a comeback less likely. The last `TAIL_DAYS` days
/// are either all active or all idle with very low step counts.
fn make_history(seed: u64, tail_active: bool) -> Vec<DailyRecord> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut records = Vec::with_capacity(HISTORY_DAYS);
    let mut active = true;
    let mut misses = 0u32;
    let body = HISTORY_DAYS - TAIL_DAYS;

    for i in 0..HISTORY_DAYS {
        let date = start() + Duration::days(i as i64);
        let sleep = rng.gen_range(380.0..480.0);

        let record = if i >= body {
            if tail_active {
                DailyRecord::new(date, rng.gen_range(9000..11000), rng.gen_range(30.0..50.0), sleep)
            } else {
                DailyRecord::new(date, rng.gen_range(200..900), 0.0, sleep)
            }
        } else {
            // The day before the tail is always active
            if i == body - 1 {
                active = true;
            }
            if active {
                DailyRecord::new(date, rng.gen_range(9000..11000), rng.gen_range(30.0..50.0), sleep)
            } else {
                DailyRecord::new(date, rng.gen_range(3000..5000), 0.0, sleep)
            }
        };
        records.push(record);

        misses = if active { 0 } else { misses + 1 };
        let comeback = if active {
            0.85
        } else {
            (0.45 - 0.08 * misses as f64).max(0.05)
        };
        active = rng.gen::<f64>() < comeback;
    }

    records
}

#[test]
fn test_idle_tail_breaks_streak_and_lowers_adherence() {
    let idle = make_history(7, false);
    let busy = make_history(7, true);

    let idle_rows = FeatureEngineer::enhance(&idle);
    let busy_rows = FeatureEngineer::enhance(&busy);
    let last = idle_rows.last().unwrap();
    assert_eq!(last.consecutive_misses, 14);
    assert!(last.is_streak_break);
    assert_eq!(last.days_since_workout, 14);
    assert!(last.record.total_steps < 1000);

    let mut idle_model = AdherenceModel::default();
    let mut busy_model = AdherenceModel::default();
    idle_model.train(&idle_rows).unwrap();
    busy_model.train(&busy_rows).unwrap();

    let idle_p = idle_model.predict_next_day_proba(last).unwrap();
    let busy_p = busy_model
        .predict_next_day_proba(busy_rows.last().unwrap())
        .unwrap();
    assert!(idle_p < busy_p, "idle {idle_p} vs busy {busy_p}");
}

#[test]
fn test_adherence_training_is_reproducible() {
    let rows = FeatureEngineer::enhance(&make_history(21, false));
    let mut first = AdherenceModel::default();
    let mut second = AdherenceModel::default();
    assert_eq!(first.train(&rows).unwrap(), second.train(&rows).unwrap());
    assert_eq!(first.artifact(), second.artifact());
}

#[test]
fn test_no_dropouts_is_a_warning() {
    // Never more than two missed days in a row
    let history: Vec<DailyRecord> = (0..60)
        .map(|i| {
            let minutes = if i % 3 == 2 { 0.0 } else { 35.0 };
            DailyRecord::new(start() + Duration::days(i), 8000, minutes, 420.0)
        })
        .collect();

    let rows = FeatureEngineer::enhance(&history);
    let mut model = BurnoutRiskModel::default();
    assert!(model.train(&rows).unwrap_err().is_insufficient_data());

    let report = HabitEngine::default().train(&history).unwrap();
    assert!(matches!(report.burnout, TrainingOutcome::Warning { .. }));
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["burnout"]["status"], "warning");
}

#[test]
fn test_episodes_do_not_overlap() {
    let params = SimulationParams {
        exercise_freq: 2,
        history_days: 180,
        ..Default::default()
    };
    let history = simulate_history(&params, start(), 99).unwrap();
    let rows = FeatureEngineer::enhance(&history);

    let episodes = EpisodeSegmenter::new(3, 3).segment(&rows);
    assert!(!episodes.is_empty());

    let span = (rows.last().unwrap().record.date - rows[0].record.date).num_days();
    let total: i64 = episodes.iter().map(|e| e.duration).sum();
    assert!(total <= span);
    for pair in episodes.windows(2) {
        assert!(pair[0].end < pair[1].start);
    }
    assert!(episodes.iter().all(|e| e.duration >= 0 && e.start <= e.end));
}

#[test]
fn test_burnout_trains_with_short_threshold() {
    let config = EngineConfig {
        burnout: BurnoutConfig {
            dropout_threshold_days: 3,
            ..Default::default()
        },
        ..Default::default()
    };
    let history = simulate_history(
        &SimulationParams {
            exercise_freq: 2,
            history_days: 180,
            ..Default::default()
        },
        start(),
        99,
    )
    .unwrap();

    let report = HabitEngine::new(config).train(&history).unwrap();
    let metrics = report.burnout.metrics().unwrap();
    assert!(metrics.episodes >= 2);
    assert!((0.0..=1.0).contains(&metrics.concordance));
}

#[test]
fn test_features_never_look_ahead() {
    let history = simulate_history(&SimulationParams::default(), start(), 3).unwrap();
    let full = FeatureEngineer::enhance(&history);
    for cut in [1, 2, 7, 30, 60] {
        let prefix = FeatureEngineer::enhance(&history[..cut]);
        assert_eq!(prefix[..], full[..cut]);
    }
}

#[test]
fn test_sleep_deprivation_always_recovers() {
    let engine = RecommendationEngine::new();
    let mut row = HashMap::new();
    row.insert("sleep_duration_minutes".to_string(), 120.0);
    row.insert("consecutive_misses".to_string(), 10.0);

    for (p, risk, anomaly) in [(0.05, 0.2, false), (0.95, 3.0, true), (0.5, 1.5, false)] {
        let rec = engine.generate_recommendation("u1", "2024-04-01", p, risk, anomaly, &row);
        assert_eq!(rec.recommendation_type, RecommendationType::Recovery);
        assert_eq!(rec.message_title, "Sleep First, Train Later");
    }
}

#[test]
fn test_burnout_outranks_adherence() {
    let mut row = HashMap::new();
    row.insert("sleep_duration_minutes".to_string(), 450.0);
    let rec = RecommendationEngine::new().generate_recommendation(
        "u1",
        "2024-04-01",
        0.9,
        1.5,
        false,
        &row,
    );
    assert_eq!(rec.recommendation_type, RecommendationType::ScaleDown);
}

#[test]
fn test_raw_events_to_recommendation() {
    let from = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let to = from + Duration::days(40);
    let events = MockHealthProvider::new(17).fetch_all_events(from, to).unwrap();

    let ndjson: String = events
        .iter()
        .map(|e| serde_json::to_string(e).unwrap() + "\n")
        .collect();
    let parsed = DailyAggregator::parse_ndjson(&ndjson).unwrap();
    assert_eq!(parsed, events);

    let history = DailyAggregator::aggregate(&parsed).unwrap();
    assert!(history.len() >= 30);

    let mut engine = HabitEngine::default();
    let report = engine.train(&history).unwrap();
    assert!(report.anomaly.is_success());

    let today = DailyRecord::new(
        history.last().unwrap().date + Duration::days(1),
        6500,
        0.0,
        150.0,
    );
    let rec = engine.recommend(&history, today, "mock-user").unwrap();
    assert_eq!(rec.user_id, "mock-user");
    assert_eq!(rec.recommendation_type, RecommendationType::Recovery);
}
