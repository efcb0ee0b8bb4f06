mod store;

pub use store::{
    InMemoryRuleStore, InMemoryTriggeredAlertStore, PostgresRuleStore, PostgresTriggeredAlertStore,
    RuleStore, StoreError, TriggeredAlertStore,
};

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;

use crate::model::{
    AlertCondition, AlertKind, AlertRule, AlertRuleId, AlertRulePatch, Observation, Severity,
    TriggeredAlert, TriggeredAlertId, UserId,
};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EvaluatorError {
    #[error("`{0}` is not a recognized alert kind")]
    InvalidAlertKind(String),

    #[error("threshold {threshold} is outside the plausible range for {kind}")]
    InvalidThreshold { kind: AlertKind, threshold: f64 },

    #[error("no rule matches the given id for this user")]
    NotFound,

    #[error("alert persistence failed: {0}")]
    Internal(#[from] StoreError),
}

/// Evaluates a user's active alert rules against a fresh [`Observation`], enforcing the
/// per-rule cooldown and persisting any rule it trips.
pub struct AlertEvaluator {
    rules: Arc<dyn RuleStore>,
    triggered: Arc<dyn TriggeredAlertStore>,
    cooldown: chrono::Duration,
}

impl AlertEvaluator {
    /// Parses a kind name from the command surface (a human or chat command), which hands
    /// this core a raw string rather than a typed `AlertKind`.
    pub fn parse_kind(kind: &str) -> Result<AlertKind, EvaluatorError> {
        kind.parse().map_err(|_| EvaluatorError::InvalidAlertKind(kind.to_string()))
    }

    pub fn new(
        rules: Arc<dyn RuleStore>, triggered: Arc<dyn TriggeredAlertStore>,
        cooldown: chrono::Duration,
    ) -> Self {
        Self { rules, triggered, cooldown }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn create_rule(
        &self, user: UserId, kind: AlertKind, condition: AlertCondition,
    ) -> Result<AlertRule, EvaluatorError> {
        if !kind.plausible_range().contains(&condition.threshold) {
            return Err(EvaluatorError::InvalidThreshold { kind, threshold: condition.threshold });
        }

        let rule = AlertRule {
            id: AlertRuleId::generate(),
            user_id: user,
            kind,
            condition,
            active: true,
            last_triggered_at: None,
        };
        self.rules.insert(rule.clone()).await?;
        Ok(rule)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn list_rules(
        &self, user: UserId, active_only: bool,
    ) -> Result<Vec<AlertRule>, EvaluatorError> {
        Ok(self.rules.list_for_user(user, active_only).await?)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn update_rule(
        &self, user: UserId, rule_id: AlertRuleId, patch: AlertRulePatch,
    ) -> Result<(), EvaluatorError> {
        if let Some(condition) = patch.condition {
            let rule = self.rules.find(rule_id, user).await?.ok_or(EvaluatorError::NotFound)?;
            if !rule.kind.plausible_range().contains(&condition.threshold) {
                return Err(EvaluatorError::InvalidThreshold {
                    kind: rule.kind,
                    threshold: condition.threshold,
                });
            }
        }

        let updated = self.rules.apply_patch(rule_id, user, patch.condition, patch.active).await?;
        updated.map(|_| ()).ok_or(EvaluatorError::NotFound)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn delete_rule(&self, user: UserId, rule_id: AlertRuleId) -> Result<(), EvaluatorError> {
        if self.rules.soft_delete(rule_id, user).await? {
            Ok(())
        } else {
            Err(EvaluatorError::NotFound)
        }
    }

    /// Evaluates every active rule the user owns against `observation`, persisting and
    /// returning every rule it trips. A rule whose kind has no corresponding scalar in the
    /// observation (e.g. air quality absent) is silently skipped, not treated as an error.
    #[tracing::instrument(level = "debug", skip(self, observation))]
    pub async fn evaluate(
        &self, user: UserId, observation: &Observation,
    ) -> Result<Vec<TriggeredAlert>, EvaluatorError> {
        let now = Utc::now();
        let rules = self.rules.list_for_user(user, true).await?;
        let mut triggered = Vec::new();

        for rule in rules {
            let Some(observed) = observation.scalar_for(rule.kind) else { continue };
            if !rule.condition.operator.matches(observed, rule.condition.threshold) {
                continue;
            }
            if rule.is_in_cooldown(now, self.cooldown) {
                continue;
            }

            let severity = Severity::classify(rule.kind, observed, rule.condition.threshold);
            let alert = TriggeredAlert {
                id: TriggeredAlertId::generate(),
                user_id: user,
                rule_id: rule.id,
                kind: rule.kind,
                severity,
                title: format!("{} alert", rule.kind),
                description: format!(
                    "observed {observed} {op} threshold {threshold}",
                    op = rule.condition.operator,
                    threshold = rule.condition.threshold
                ),
                observed_value: observed,
                threshold: rule.condition.threshold,
                resolved: false,
                created_at: now,
            };

            self.triggered.insert(alert.clone()).await?;
            self.rules.mark_triggered(rule.id, now).await?;
            triggered.push(alert);
        }

        Ok(triggered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlertOperator, Coordinates};

    fn evaluator() -> AlertEvaluator {
        AlertEvaluator::new(
            Arc::new(InMemoryRuleStore::new()),
            Arc::new(InMemoryTriggeredAlertStore::new()),
            chrono::Duration::hours(1),
        )
    }

    fn observation_with_temperature(celsius: f64) -> Observation {
        Observation {
            temperature_celsius: celsius,
            feels_like_celsius: celsius,
            humidity_percent: 50,
            pressure_hpa: 1013.0,
            wind_speed_kph: 10.0,
            wind_bearing_degrees: 180.0,
            visibility_km: 10.0,
            uv_index: 3.0,
            description: "clear".to_string(),
            icon_code: "01d".to_string(),
            location_label: format!("Test {}", Coordinates::new(50.0, 30.0).unwrap().label_suffix()),
            air_quality: None,
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_rule_rejects_implausible_threshold() {
        let evaluator = evaluator();
        let user = UserId::generate();
        let result = evaluator
            .create_rule(
                user,
                AlertKind::Temperature,
                AlertCondition { operator: AlertOperator::GreaterThan, threshold: 999.0 },
            )
            .await;
        assert!(matches!(result, Err(EvaluatorError::InvalidThreshold { .. })));
    }

    #[tokio::test]
    async fn evaluate_trips_rule_and_sets_cooldown() {
        let evaluator = evaluator();
        let user = UserId::generate();
        evaluator
            .create_rule(
                user,
                AlertKind::Temperature,
                AlertCondition { operator: AlertOperator::GreaterThan, threshold: 10.0 },
            )
            .await
            .unwrap();

        let triggered = evaluator.evaluate(user, &observation_with_temperature(30.0)).await.unwrap();
        assert_eq!(triggered.len(), 1);
        assert_eq!(triggered[0].severity, Severity::Critical);

        // Within cooldown: a second breach must not trigger again.
        let triggered_again =
            evaluator.evaluate(user, &observation_with_temperature(40.0)).await.unwrap();
        assert!(triggered_again.is_empty());
    }

    #[tokio::test]
    async fn evaluate_skips_non_matching_condition() {
        let evaluator = evaluator();
        let user = UserId::generate();
        evaluator
            .create_rule(
                user,
                AlertKind::Temperature,
                AlertCondition { operator: AlertOperator::GreaterThan, threshold: 10.0 },
            )
            .await
            .unwrap();

        let triggered = evaluator.evaluate(user, &observation_with_temperature(5.0)).await.unwrap();
        assert!(triggered.is_empty());
    }

    #[tokio::test]
    async fn delete_rule_is_soft_and_excludes_from_active_listing() {
        let evaluator = evaluator();
        let user = UserId::generate();
        let rule = evaluator
            .create_rule(
                user,
                AlertKind::Humidity,
                AlertCondition { operator: AlertOperator::GreaterThan, threshold: 80.0 },
            )
            .await
            .unwrap();

        evaluator.delete_rule(user, rule.id).await.unwrap();

        assert!(evaluator.list_rules(user, true).await.unwrap().is_empty());
        assert_eq!(evaluator.list_rules(user, false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_rule_against_unknown_id_is_not_found() {
        let evaluator = evaluator();
        let user = UserId::generate();
        let result = evaluator
            .update_rule(
                user,
                AlertRuleId::generate(),
                AlertRulePatch { condition: None, active: Some(false) },
            )
            .await;
        assert!(matches!(result, Err(EvaluatorError::NotFound)));
    }

    #[test]
    fn parse_kind_rejects_unknown_names() {
        assert!(AlertEvaluator::parse_kind("temperature").is_ok());
        assert!(matches!(
            AlertEvaluator::parse_kind("pollen"),
            Err(EvaluatorError::InvalidAlertKind(_))
        ));
    }

    #[tokio::test]
    async fn air_quality_boundary_150_is_low_severity() {
        let evaluator = evaluator();
        let user = UserId::generate();
        evaluator
            .create_rule(
                user,
                AlertKind::AirQuality,
                AlertCondition { operator: AlertOperator::GreaterThan, threshold: 100.0 },
            )
            .await
            .unwrap();

        let mut observation = observation_with_temperature(20.0);
        observation.air_quality = Some(crate::model::AirQuality {
            index: 150,
            co: 0.3,
            no2: 10.0,
            o3: 30.0,
            pm2_5: 8.0,
            pm10: 12.0,
        });

        let triggered = evaluator.evaluate(user, &observation).await.unwrap();
        assert_eq!(triggered.len(), 1);
        assert_eq!(triggered[0].severity, Severity::Low);
    }
}
