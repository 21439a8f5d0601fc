//! Recommendation rule cascade
//!
//! Merges model outputs and the day's raw context into one recommendation.
//! Rules are evaluated in table order and the first match wins; the last rule
//! always matches, so every input produces a recommendation.

use crate::types::{FeatureSource, Recommendation, RecommendationType};

/// Sleep assumed when the row does not carry a value (minutes)
const DEFAULT_SLEEP_MINUTES: f64 = 480.0;

const SEVERE_SLEEP_MINUTES: f64 = 180.0;
const HIGH_BURNOUT_RISK: f64 = 1.2;
const LOW_ADHERENCE: f64 = 0.4;
const BORDERLINE_ADHERENCE: f64 = 0.5;
const STABLE_ADHERENCE: f64 = 0.7;
/// Miss runs longer than this get the re-engagement message
const LONG_ABSENCE_DAYS: f64 = 7.0;

/// Inputs visible to every rule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleContext {
    pub adherence_prob: f64,
    pub burnout_risk: f64,
    pub is_anomaly: bool,
    pub sleep_minutes: f64,
    pub consecutive_misses: f64,
}

impl RuleContext {
    pub fn new(
        adherence_prob: f64,
        burnout_risk: f64,
        is_anomaly: bool,
        row: &impl FeatureSource,
    ) -> Self {
        Self {
            adherence_prob,
            burnout_risk,
            is_anomaly,
            sleep_minutes: row
                .feature("sleep_duration_minutes")
                .unwrap_or(DEFAULT_SLEEP_MINUTES),
            consecutive_misses: row.feature("consecutive_misses").unwrap_or(0.0),
        }
    }
}

/// Rendered user-facing text of a rule
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub title: &'static str,
    pub body: &'static str,
    pub action: &'static str,
    pub reasons: Vec<String>,
}

/// One row of the decision table
pub struct Rule {
    pub name: &'static str,
    pub kind: RecommendationType,
    pub applies: fn(&RuleContext) -> bool,
    pub render: fn(&RuleContext) -> Message,
}

fn percent(p: f64) -> String {
    format!("{:.1}%", p * 100.0)
}

/// Priority-ordered decision table
pub const RULES: &[Rule] = &[
    Rule {
        name: "severe_sleep_deprivation",
        kind: RecommendationType::Recovery,
        applies: |ctx| ctx.sleep_minutes < SEVERE_SLEEP_MINUTES,
        render: |ctx| Message {
            title: "Sleep First, Train Later",
            body: "You got less than 3 hours of sleep. Training now is counter-productive and dangerous.",
            action: "Skip the workout. Go get a nap or go to bed early tonight.",
            reasons: vec![
                format!(
                    "Severe sleep deprivation detected ({:.1} hours).",
                    ctx.sleep_minutes / 60.0
                ),
                "Cognitive and physical recovery is severely compromised.".to_string(),
            ],
        },
    },
    Rule {
        name: "behavioral_anomaly",
        kind: RecommendationType::Recovery,
        applies: |ctx| ctx.is_anomaly,
        render: |_| Message {
            title: "Check-in time",
            body: "We noticed some unusual patterns today. Everything okay?",
            action: "Log a quick mood check-in instead of a workout.",
            reasons: vec!["Behavioral anomaly detected (isolation forest).".to_string()],
        },
    },
    Rule {
        name: "burnout_risk",
        kind: RecommendationType::ScaleDown,
        applies: |ctx| ctx.burnout_risk > HIGH_BURNOUT_RISK,
        render: |ctx| Message {
            title: "Protect your energy",
            body: "Your stats suggest you're pushing hard. Let's avoid burnout.",
            action: "Do 50% of your planned duration today.",
            reasons: vec![
                format!("High burnout risk score ({:.2}).", ctx.burnout_risk),
                "Recent effort ratio is unsustainable.".to_string(),
            ],
        },
    },
    Rule {
        name: "low_adherence",
        kind: RecommendationType::Anchoring,
        applies: |ctx| ctx.adherence_prob < LOW_ADHERENCE,
        render: |ctx| {
            let (title, body) = if ctx.consecutive_misses > LONG_ABSENCE_DAYS {
                (
                    "Everything okay?",
                    "We noticed you've been away for a bit. Don't worry—failures are just data points on the road to success. We can get back on the wagon today.",
                )
            } else {
                (
                    "Don't break the chain",
                    "You missed a few days, but it happens. The key is to get back to it immediately to keep your habit strong.",
                )
            };
            Message {
                title,
                body,
                action: "Start small: Just do 5 minutes of movement to break the seal.",
                reasons: vec![
                    format!("Low adherence probability ({}).", percent(ctx.adherence_prob)),
                    "Focus is on re-establishing the habit loop, not intensity.".to_string(),
                ],
            }
        },
    },
    Rule {
        name: "borderline_adherence",
        kind: RecommendationType::Maintain,
        applies: |ctx| ctx.adherence_prob < BORDERLINE_ADHERENCE,
        render: |ctx| Message {
            title: "Time to Shift Gears",
            body: "You've missed a few days, but momentum is waiting for you. Try pushing a little harder today to get back on track.",
            action: "Commit to your standard session today—you can do this.",
            reasons: vec![
                format!(
                    "Adherence probability is borderline ({}).",
                    percent(ctx.adherence_prob)
                ),
                "A strong session today will reverse the negative trend.".to_string(),
            ],
        },
    },
    Rule {
        name: "stable_adherence",
        kind: RecommendationType::Maintain,
        applies: |ctx| ctx.adherence_prob <= STABLE_ADHERENCE,
        render: |ctx| Message {
            title: "Good Work",
            body: "You are doing well! Hang in there and keep the momentum building.",
            action: "Stick to the plan. Consistency is compounding.",
            reasons: vec![format!(
                "Stable adherence probability ({}).",
                percent(ctx.adherence_prob)
            )],
        },
    },
    Rule {
        name: "high_adherence",
        kind: RecommendationType::Maintain,
        applies: |_| true,
        render: |ctx| Message {
            title: "Keep It Up!",
            body: "Excellent dedication. You're consistently showing up and the results show.",
            action: "Use this momentum to your advantage—great day for a PR or just enjoying the flow.",
            reasons: vec![format!(
                "High adherence probability ({}).",
                percent(ctx.adherence_prob)
            )],
        },
    },
];

/// Deterministic recommendation generator
#[derive(Debug, Clone, Copy, Default)]
pub struct RecommendationEngine;

impl RecommendationEngine {
    pub fn new() -> Self {
        Self
    }

    /// First rule whose predicate holds
    pub fn select(&self, ctx: &RuleContext) -> &'static Rule {
        RULES
            .iter()
            .find(|rule| (rule.applies)(ctx))
            .unwrap_or(&RULES[RULES.len() - 1])
    }

    pub fn generate_recommendation(
        &self,
        user_id: &str,
        date: &str,
        adherence_prob: f64,
        burnout_risk: f64,
        is_anomaly: bool,
        row: &impl FeatureSource,
    ) -> Recommendation {
        let ctx = RuleContext::new(adherence_prob, burnout_risk, is_anomaly, row);
        let rule = self.select(&ctx);
        let message = (rule.render)(&ctx);

        Recommendation {
            user_id: user_id.to_string(),
            date: date.to_string(),
            adherence_probability: adherence_prob,
            burnout_risk_score: burnout_risk,
            is_anomaly,
            recommendation_type: rule.kind,
            message_title: message.title.to_string(),
            message_body: message.body.to_string(),
            suggested_action: message.action.to_string(),
            why_this_recommendation: message.reasons,
        }
    }
}
