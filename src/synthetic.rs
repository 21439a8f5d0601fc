//! Seeded synthetic data
//!
//! Two generators for demos and tests: one produces already-aggregated daily
//! records, the other produces raw provider events for the aggregator. Both
//! are deterministic for a given seed.

use crate::aggregator::{EventType, HealthDataProvider, HealthSource, RawHealthEvent};
use crate::error::EngineError;
use crate::types::DailyRecord;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Shape of a simulated user history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParams {
    pub history_days: usize,
    pub avg_steps: u32,
    /// Standard deviation of steps as a fraction of the mean
    pub steps_volatility: f64,
    /// Workouts per week
    pub exercise_freq: u32,
    pub avg_exercise_minutes: f64,
    pub avg_sleep_hours: f64,
    /// Standard deviation of sleep as a fraction of the mean
    pub sleep_volatility: f64,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            history_days: 90,
            avg_steps: 8000,
            steps_volatility: 0.3,
            exercise_freq: 3,
            avg_exercise_minutes: 45.0,
            avg_sleep_hours: 7.5,
            sleep_volatility: 0.2,
        }
    }
}

/// Workout duration spread as a fraction of the mean
const EXERCISE_VOLATILITY: f64 = 0.2;
/// Shortest simulated workout (minutes)
const MIN_EXERCISE_MINUTES: f64 = 10.0;

fn normal(mean: f64, std_dev: f64, what: &str) -> Result<Normal<f64>, EngineError> {
    if !std_dev.is_finite() || std_dev < 0.0 {
        return Err(EngineError::InvalidParameter(format!(
            "{what}: standard deviation must be finite and >= 0, got {std_dev}"
        )));
    }
    Normal::new(mean, std_dev)
        .map_err(|e| EngineError::InvalidParameter(format!("{what}: {e}")))
}

/// Simulate `params.history_days` consecutive days starting at `start`
pub fn simulate_history(
    params: &SimulationParams,
    start: NaiveDate,
    seed: u64,
) -> Result<Vec<DailyRecord>, EngineError> {
    let avg_steps = params.avg_steps as f64;
    let steps = normal(avg_steps, avg_steps * params.steps_volatility, "steps")?;
    let workout = normal(
        params.avg_exercise_minutes,
        params.avg_exercise_minutes * EXERCISE_VOLATILITY,
        "exercise",
    )?;
    let sleep_mean = params.avg_sleep_hours * 60.0;
    let sleep = normal(sleep_mean, sleep_mean * params.sleep_volatility, "sleep")?;
    let exercise_probability = (params.exercise_freq as f64 / 7.0).clamp(0.0, 1.0);

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let records = (0..params.history_days)
        .map(|i| {
            let total_steps = steps.sample(&mut rng).max(0.0).trunc() as u32;
            let exercise_minutes = if rng.gen::<f64>() < exercise_probability {
                workout.sample(&mut rng).trunc().max(MIN_EXERCISE_MINUTES)
            } else {
                0.0
            };
            let sleep_minutes = sleep.sample(&mut rng).max(0.0).trunc();

            DailyRecord::new(
                start + Duration::days(i as i64),
                total_steps,
                exercise_minutes,
                sleep_minutes,
            )
        })
        .collect();

    Ok(records)
}

/// Seeded provider of plausible raw events
pub struct MockHealthProvider {
    rng: ChaCha8Rng,
}

const WORKOUT_KINDS: [&str; 4] = ["running", "cycling", "weightlifting", "yoga"];

impl MockHealthProvider {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    fn event(
        &mut self,
        event_type: EventType,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        value: f64,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> RawHealthEvent {
        let event_id = uuid::Builder::from_random_bytes(self.rng.gen()).into_uuid();
        RawHealthEvent {
            event_id: event_id.to_string(),
            event_type,
            source: HealthSource::Mock,
            start_time,
            end_time,
            value,
            metadata,
        }
    }

    /// Walking bursts during waking hours (08:00 to 20:59)
    pub fn fetch_steps(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<RawHealthEvent> {
        let mut events = Vec::new();
        let mut current = start;

        while current < end {
            let waking = (8..=20).contains(&current.hour());
            if !waking || self.rng.gen::<f64>() <= 0.3 {
                current += Duration::hours(1);
                continue;
            }

            let seconds = self.rng.gen_range(60..=600);
            let cadence = self.rng.gen_range(1.0..2.0);
            let event_end = current + Duration::seconds(seconds);
            if event_end > end {
                break;
            }

            let steps = (seconds as f64 * cadence).trunc();
            let event = self.event(EventType::Steps, current, event_end, steps, Default::default());
            events.push(event);
            current = event_end + Duration::minutes(self.rng.gen_range(5..=60));
        }

        events
    }

    /// One night per calendar day, falling asleep between 22:00 and 02:59
    pub fn fetch_sleep(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<RawHealthEvent> {
        let mut events = Vec::new();

        for day in days_between(start, end) {
            let hour = self.rng.gen_range(22..=26);
            let minute = self.rng.gen_range(0..=59);
            let sleep_start = midnight(day) + Duration::hours(hour) + Duration::minutes(minute);
            let hours = self.rng.gen_range(5.0..9.0);
            let sleep_end = sleep_start + Duration::seconds((hours * 3600.0) as i64);

            if sleep_start >= start && sleep_end <= end {
                let mut metadata = serde_json::Map::new();
                metadata.insert(
                    "efficiency".to_string(),
                    serde_json::json!(self.rng.gen_range(0.8..0.99)),
                );
                let event = self.event(EventType::Sleep, sleep_start, sleep_end, hours * 60.0, metadata);
                events.push(event);
            }
        }

        events
    }

    /// A workout on roughly 40% of days, starting on the hour
    pub fn fetch_exercise(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<RawHealthEvent> {
        let mut events = Vec::new();

        for day in days_between(start, end) {
            if self.rng.gen::<f64>() >= 0.4 {
                continue;
            }
            let ex_start = midnight(day) + Duration::hours(self.rng.gen_range(7..=20));
            let minutes = self.rng.gen_range(20..=60);
            let ex_end = ex_start + Duration::minutes(minutes);

            if ex_start >= start && ex_end <= end {
                let kind = WORKOUT_KINDS.choose(&mut self.rng).copied().unwrap_or("running");
                let mut metadata = serde_json::Map::new();
                metadata.insert("type".to_string(), serde_json::json!(kind));
                let event = self.event(EventType::Exercise, ex_start, ex_end, minutes as f64, metadata);
                events.push(event);
            }
        }

        events
    }
}

impl HealthDataProvider for MockHealthProvider {
    fn fetch_all_events(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawHealthEvent>, EngineError> {
        if end < start {
            return Err(EngineError::InvalidParameter(
                "end precedes start".to_string(),
            ));
        }

        let mut events = self.fetch_steps(start, end);
        events.extend(self.fetch_sleep(start, end));
        events.extend(self.fetch_exercise(start, end));
        events.sort_by_key(|e| e.start_time);
        Ok(events)
    }
}

fn midnight(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_time(NaiveTime::default()))
}

fn days_between(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<NaiveDate> {
    let first = start.date_naive();
    let count = (end.date_naive() - first).num_days().max(0);
    (0..=count).map(|i| first + Duration::days(i)).collect()
}
