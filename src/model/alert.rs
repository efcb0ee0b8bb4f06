use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

use super::user::UserId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct AlertRuleId(Uuid);

impl AlertRuleId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn new(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for AlertRuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct TriggeredAlertId(Uuid);

impl TriggeredAlertId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TriggeredAlertId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Temperature,
    Humidity,
    WindSpeed,
    AirQuality,
}

impl AlertKind {
    /// The kind-specific plausibility range a threshold must fall within.
    pub fn plausible_range(&self) -> std::ops::RangeInclusive<f64> {
        match self {
            AlertKind::Temperature => -100.0..=100.0,
            AlertKind::Humidity => 0.0..=100.0,
            AlertKind::WindSpeed => 0.0..=500.0,
            AlertKind::AirQuality => 0.0..=500.0,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AlertOperator {
    #[strum(serialize = ">")]
    #[serde(rename = ">")]
    GreaterThan,
    #[strum(serialize = "<")]
    #[serde(rename = "<")]
    LessThan,
    #[strum(serialize = ">=")]
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[strum(serialize = "<=")]
    #[serde(rename = "<=")]
    LessOrEqual,
    #[strum(serialize = "=")]
    #[serde(rename = "=")]
    Equal,
}

impl AlertOperator {
    /// Applies the operator to an observed scalar against the rule's threshold.
    pub fn matches(&self, observed: f64, threshold: f64) -> bool {
        match self {
            AlertOperator::GreaterThan => observed > threshold,
            AlertOperator::LessThan => observed < threshold,
            AlertOperator::GreaterOrEqual => observed >= threshold,
            AlertOperator::LessOrEqual => observed <= threshold,
            AlertOperator::Equal => (observed - threshold).abs() < f64::EPSILON,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCondition {
    pub operator: AlertOperator,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: AlertRuleId,
    pub user_id: UserId,
    pub kind: AlertKind,
    pub condition: AlertCondition,
    pub active: bool,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl AlertRule {
    /// True when the rule's cooldown window has not yet elapsed since its last trigger.
    pub fn is_in_cooldown(&self, now: DateTime<Utc>, cooldown: chrono::Duration) -> bool {
        match self.last_triggered_at {
            Some(last) => now - last < cooldown,
            None => false,
        }
    }
}

/// A partial update to an [`AlertRule`]; only `condition` and `active` are mutable -- kind
/// and ownership never change after creation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertRulePatch {
    pub condition: Option<AlertCondition>,
    pub active: Option<bool>,
}

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// `d > 15 => critical; > 10 => high; > 5 => medium; else low`. Band boundaries are
    /// exclusive: a deviation exactly on a boundary belongs to the lower band.
    pub fn from_temperature_deviation(deviation: f64) -> Self {
        if deviation > 15.0 {
            Severity::Critical
        } else if deviation > 10.0 {
            Severity::High
        } else if deviation > 5.0 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    /// Classifies on the raw observed AQI, not its deviation from the rule's threshold.
    pub fn from_air_quality_index(observed: f64) -> Self {
        if observed > 300.0 {
            Severity::Critical
        } else if observed > 200.0 {
            Severity::High
        } else if observed > 150.0 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn classify(kind: AlertKind, observed: f64, threshold: f64) -> Self {
        match kind {
            AlertKind::Temperature => Self::from_temperature_deviation((observed - threshold).abs()),
            AlertKind::AirQuality => Self::from_air_quality_index(observed),
            AlertKind::Humidity | AlertKind::WindSpeed => Severity::Medium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggeredAlert {
    pub id: TriggeredAlertId,
    pub user_id: UserId,
    pub rule_id: AlertRuleId,
    pub kind: AlertKind,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub observed_value: f64,
    pub threshold: f64,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temperature_severity_bands_use_strict_greater_than() {
        assert_eq!(Severity::from_temperature_deviation(15.0), Severity::High);
        assert_eq!(Severity::from_temperature_deviation(15.01), Severity::Critical);
        assert_eq!(Severity::from_temperature_deviation(10.0), Severity::Medium);
        assert_eq!(Severity::from_temperature_deviation(5.0), Severity::Low);
    }

    #[test]
    fn air_quality_boundary_150_is_not_yet_medium() {
        assert_eq!(Severity::from_air_quality_index(150.0), Severity::Low);
        assert_eq!(Severity::from_air_quality_index(150.01), Severity::Medium);
    }

    #[test]
    fn air_quality_critical_boundary() {
        assert_eq!(Severity::from_air_quality_index(300.0), Severity::High);
        assert_eq!(Severity::from_air_quality_index(300.01), Severity::Critical);
    }

    #[test]
    fn humidity_and_wind_speed_are_always_medium() {
        assert_eq!(Severity::classify(AlertKind::Humidity, 95.0, 90.0), Severity::Medium);
        assert_eq!(Severity::classify(AlertKind::WindSpeed, 120.0, 40.0), Severity::Medium);
    }

    #[test]
    fn operator_equal_uses_float_epsilon() {
        assert!(AlertOperator::Equal.matches(10.0, 10.0));
        assert!(!AlertOperator::Equal.matches(10.1, 10.0));
    }

    #[test]
    fn rule_cooldown_gate() {
        let now = Utc::now();
        let mut rule = sample_rule();
        rule.last_triggered_at = Some(now - chrono::Duration::minutes(30));
        assert!(rule.is_in_cooldown(now, chrono::Duration::hours(1)));

        rule.last_triggered_at = Some(now - chrono::Duration::hours(2));
        assert!(!rule.is_in_cooldown(now, chrono::Duration::hours(1)));

        rule.last_triggered_at = None;
        assert!(!rule.is_in_cooldown(now, chrono::Duration::hours(1)));
    }

    fn sample_rule() -> AlertRule {
        AlertRule {
            id: AlertRuleId::generate(),
            user_id: UserId::generate(),
            kind: AlertKind::Temperature,
            condition: AlertCondition { operator: AlertOperator::GreaterThan, threshold: 10.0 },
            active: true,
            last_triggered_at: None,
        }
    }
}
