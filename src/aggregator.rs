//! Raw health events to daily records
//!
//! Providers deliver atomic timestamped events (step bursts, sleep sessions,
//! workouts). This module buckets them into one [`DailyRecord`] per calendar
//! date:
//! - Steps and exercise count toward the date of their start time
//! - Sleep counts toward the date it ended (the wake-up day)
//! - The longest sleep event of a day is its main sleep
//!
//! Dates without any event produce no record; gaps are left to the caller.

use crate::error::EngineError;
use crate::types::DailyRecord;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

const MINUTES_PER_DAY: f64 = 1440.0;

/// Kind of raw event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Steps,
    Sleep,
    Exercise,
    HeartRate,
}

/// Origin of a raw event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthSource {
    GoogleFit,
    HealthConnect,
    AppleHealth,
    SamsungHealth,
    Mock,
    #[serde(untagged)]
    Other(String),
}

impl HealthSource {
    pub fn as_str(&self) -> &str {
        match self {
            HealthSource::GoogleFit => "google_fit",
            HealthSource::HealthConnect => "health_connect",
            HealthSource::AppleHealth => "apple_health",
            HealthSource::SamsungHealth => "samsung_health",
            HealthSource::Mock => "mock",
            HealthSource::Other(name) => name.as_str(),
        }
    }
}

/// One atomic event as delivered by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawHealthEvent {
    pub event_id: String,
    pub event_type: EventType,
    pub source: HealthSource,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Step count, or minutes for sleep and exercise
    pub value: f64,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl RawHealthEvent {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.end_time < self.start_time {
            return Err(EngineError::ParseError(format!(
                "event {}: end_time precedes start_time",
                self.event_id
            )));
        }
        if !self.value.is_finite() || self.value < 0.0 {
            return Err(EngineError::ParseError(format!(
                "event {}: value must be a finite number >= 0, got {}",
                self.event_id, self.value
            )));
        }
        Ok(())
    }

    /// Calendar date the event is reported under
    pub fn bucket_date(&self) -> NaiveDate {
        match self.event_type {
            EventType::Sleep => self.end_time.date_naive(),
            _ => self.start_time.date_naive(),
        }
    }
}

/// A source of raw events over a time window
pub trait HealthDataProvider {
    /// Fetch all steps, sleep and exercise events in `[start, end]`
    fn fetch_all_events(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawHealthEvent>, EngineError>;
}

/// Converts raw event streams to daily records
pub struct DailyAggregator;

impl DailyAggregator {
    /// Parse a JSON array of events
    pub fn parse_array(json: &str) -> Result<Vec<RawHealthEvent>, EngineError> {
        let events: Vec<RawHealthEvent> = serde_json::from_str(json)?;
        Ok(events)
    }

    /// Parse newline-delimited JSON events, skipping blank lines
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<RawHealthEvent>, EngineError> {
        ndjson
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(line_num, line)| {
                serde_json::from_str::<RawHealthEvent>(line.trim()).map_err(|e| {
                    EngineError::ParseError(format!("Failed to parse line {}: {}", line_num + 1, e))
                })
            })
            .collect()
    }

    /// Bucket events by reporting date and summarize each day, sorted by date
    pub fn aggregate(events: &[RawHealthEvent]) -> Result<Vec<DailyRecord>, EngineError> {
        let mut by_date: BTreeMap<NaiveDate, DayAccumulator> = BTreeMap::new();

        for event in events {
            event.validate()?;
            by_date
                .entry(event.bucket_date())
                .or_default()
                .add_event(event);
        }

        let records: Vec<DailyRecord> = by_date
            .into_iter()
            .map(|(date, day)| day.into_record(date))
            .collect();

        debug!(
            events = events.len(),
            days = records.len(),
            "aggregated raw events"
        );
        Ok(records)
    }
}

/// Running totals for one reporting date
#[derive(Default)]
struct DayAccumulator {
    total_steps: f64,
    exercise_minutes: f64,
    first_exercise: Option<DateTime<Utc>>,
    main_sleep: Option<SleepSession>,
}

struct SleepSession {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    minutes: f64,
}

impl DayAccumulator {
    fn add_event(&mut self, event: &RawHealthEvent) {
        match event.event_type {
            EventType::Steps => self.total_steps += event.value.trunc(),
            EventType::Exercise => {
                self.exercise_minutes += event.value;
                if self.first_exercise.map_or(true, |t| event.start_time < t) {
                    self.first_exercise = Some(event.start_time);
                }
            }
            EventType::Sleep => {
                if self.main_sleep.as_ref().map_or(true, |s| event.value > s.minutes) {
                    self.main_sleep = Some(SleepSession {
                        start: event.start_time,
                        end: event.end_time,
                        minutes: event.value,
                    });
                }
            }
            // Heart rate is not part of the daily record
            EventType::HeartRate => {}
        }
    }

    fn into_record(self, date: NaiveDate) -> DailyRecord {
        let total_steps = self.total_steps.min(u32::MAX as f64) as u32;
        let sleep_minutes = self.main_sleep.as_ref().map_or(0.0, |s| s.minutes);

        DailyRecord {
            date,
            total_steps,
            exercise_minutes: self.exercise_minutes,
            exercise_done: self.exercise_minutes > 0.0,
            sleep_duration_minutes: sleep_minutes,
            data_missing_flag: total_steps == 0 && sleep_minutes == 0.0,
            exercise_start_time: self.first_exercise,
            sleep_start_time: self.main_sleep.as_ref().map(|s| s.start),
            sleep_end_time: self.main_sleep.as_ref().map(|s| s.end),
            sedentary_minutes: (MINUTES_PER_DAY - sleep_minutes - self.exercise_minutes).max(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, day, hour, minute, 0).unwrap()
    }

    fn make_event(
        event_type: EventType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        value: f64,
    ) -> RawHealthEvent {
        RawHealthEvent {
            event_id: format!("{:?}-{}", event_type, start.timestamp()),
            event_type,
            source: HealthSource::Mock,
            start_time: start,
            end_time: end,
            value,
            metadata: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_sleep_buckets_on_wake_day() {
        let events = vec![
            make_event(EventType::Sleep, at(1, 23, 0), at(2, 7, 0), 480.0),
            make_event(EventType::Steps, at(2, 9, 0), at(2, 9, 10), 900.0),
        ];
        let records = DailyAggregator::aggregate(&events).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].date, NaiveDate::from_ymd_opt(2024, 4, 2).unwrap());
        assert_eq!(records[0].sleep_duration_minutes, 480.0);
        assert_eq!(records[0].total_steps, 900);
    }

    #[test]
    fn test_longest_sleep_is_main_sleep() {
        let events = vec![
            make_event(EventType::Sleep, at(3, 1, 0), at(3, 7, 0), 360.0),
            make_event(EventType::Sleep, at(3, 14, 0), at(3, 14, 40), 40.0),
        ];
        let records = DailyAggregator::aggregate(&events).unwrap();
        assert_eq!(records[0].sleep_duration_minutes, 360.0);
        assert_eq!(records[0].sleep_start_time, Some(at(3, 1, 0)));
    }

    #[test]
    fn test_exercise_and_derived_fields() {
        let events = vec![
            make_event(EventType::Exercise, at(5, 18, 0), at(5, 18, 30), 30.0),
            make_event(EventType::Exercise, at(5, 7, 0), at(5, 7, 20), 20.0),
            make_event(EventType::Sleep, at(4, 23, 0), at(5, 6, 0), 420.0),
            make_event(EventType::HeartRate, at(5, 8, 0), at(5, 8, 0), 62.0),
        ];
        let records = DailyAggregator::aggregate(&events).unwrap();
        let day = &records[0];
        assert!(day.exercise_done);
        assert_eq!(day.exercise_minutes, 50.0);
        assert_eq!(day.exercise_start_time, Some(at(5, 7, 0)));
        assert_eq!(day.sedentary_minutes, 1440.0 - 420.0 - 50.0);
        assert!(!day.data_missing_flag);
    }

    #[test]
    fn test_empty_day_is_flagged_missing() {
        let events = vec![make_event(EventType::HeartRate, at(6, 8, 0), at(6, 8, 0), 70.0)];
        let records = DailyAggregator::aggregate(&events).unwrap();
        assert!(records[0].data_missing_flag);
        assert!(!records[0].exercise_done);
    }

    #[test]
    fn test_output_sorted_without_gap_fill() {
        let events = vec![
            make_event(EventType::Steps, at(9, 10, 0), at(9, 10, 5), 300.0),
            make_event(EventType::Steps, at(7, 10, 0), at(7, 10, 5), 200.0),
        ];
        let records = DailyAggregator::aggregate(&events).unwrap();
        let dates: Vec<u32> = records.iter().map(|r| chrono::Datelike::day(&r.date)).collect();
        assert_eq!(dates, vec![7, 9]);
    }

    #[test]
    fn test_rejects_inverted_interval() {
        let events = vec![make_event(EventType::Exercise, at(5, 9, 0), at(5, 8, 0), 10.0)];
        assert!(matches!(
            DailyAggregator::aggregate(&events),
            Err(EngineError::ParseError(_))
        ));
    }

    #[test]
    fn test_parse_ndjson() {
        let line = serde_json::to_string(&make_event(
            EventType::Steps,
            at(1, 9, 0),
            at(1, 9, 5),
            120.0,
        ))
        .unwrap();
        let input = format!("{line}\n\n{line}\n");
        assert_eq!(DailyAggregator::parse_ndjson(&input).unwrap().len(), 2);

        let err = DailyAggregator::parse_ndjson("{\"bad\": 1}").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_ndjson_keeps_exact_floats() {
        let mut event = make_event(EventType::Sleep, at(1, 23, 0), at(2, 7, 26), 506.65518510834363);
        event
            .metadata
            .insert("efficiency".to_string(), serde_json::json!(0.9254381910346321));
        let line = serde_json::to_string(&event).unwrap();

        let parsed = DailyAggregator::parse_ndjson(&line).unwrap();
        assert_eq!(parsed, vec![event]);
        assert_eq!(parsed[0].value.to_bits(), 506.65518510834363f64.to_bits());
    }

    #[test]
    fn test_parse_array_with_unknown_source() {
        let json = r#"[{"event_id":"e1","event_type":"steps","source":"fitbit",
            "start_time":"2024-04-01T09:00:00Z","end_time":"2024-04-01T09:05:00Z","value":50}]"#;
        let events = DailyAggregator::parse_array(json).unwrap();
        assert_eq!(events[0].source, HealthSource::Other("fitbit".to_string()));
        assert_eq!(events[0].source.as_str(), "fitbit");
    }
}
