pub mod channels;
pub mod formatting;

pub use channels::{Channel, ChannelError, PushChannel, TeamChatChannel};
pub use formatting::MessagePayload;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::model::{ForecastDay, Observation, TriggeredAlert, User, WeatherForecast};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NotifierError {
    #[error("every configured channel failed: {0:?}")]
    ChannelFailed(HashMap<&'static str, ChannelError>),

    #[error("no channel is configured for this recipient")]
    NoChannelConfigured,
}

const CHANNEL_TIMEOUT: Duration = Duration::from_secs(10);

/// Fans a message out to every configured channel independently. Succeeds if at least one
/// channel accepts the message; only reports failure when the whole set is exhausted.
pub struct Notifier {
    channels: Vec<Arc<dyn Channel>>,
}

impl Notifier {
    pub fn new(channels: Vec<Arc<dyn Channel>>) -> Self {
        Self { channels }
    }

    #[tracing::instrument(level = "debug", skip(self, user))]
    pub async fn notify_alert(&self, event: &TriggeredAlert, user: &User) -> Result<(), NotifierError> {
        let payload = MessagePayload {
            title: event.title.clone(),
            body: event.description.clone(),
            severity: Some(event.severity),
        };
        self.fan_out(&payload, user).await
    }

    #[tracing::instrument(level = "debug", skip(self, observation, user))]
    pub async fn notify_daily_digest(
        &self, observation: &Observation, user: &User,
    ) -> Result<(), NotifierError> {
        let payload = MessagePayload {
            title: format!("Daily digest for {}", user.location_label),
            body: format!(
                "{}, {:.1}\u{b0}, feels like {:.1}\u{b0}",
                observation.description, observation.temperature_celsius, observation.feels_like_celsius
            ),
            severity: None,
        };
        self.fan_out(&payload, user).await
    }

    #[tracing::instrument(level = "debug", skip(self, summary, user))]
    pub async fn notify_weekly_digest(
        &self, summary: &WeatherForecast, user: &User,
    ) -> Result<(), NotifierError> {
        let body = summary
            .days
            .iter()
            .map(render_forecast_day)
            .collect::<Vec<_>>()
            .join("\n");

        let payload = MessagePayload {
            title: format!("Weekly outlook for {}", user.location_label),
            body,
            severity: None,
        };
        self.fan_out(&payload, user).await
    }

    async fn fan_out(&self, payload: &MessagePayload, user: &User) -> Result<(), NotifierError> {
        if self.channels.is_empty() {
            return Err(NotifierError::NoChannelConfigured);
        }

        let recipient_handle = user.id.to_string();
        let mut failures = HashMap::new();

        for channel in &self.channels {
            let outcome =
                tokio::time::timeout(CHANNEL_TIMEOUT, channel.send(payload, &recipient_handle)).await;

            match outcome {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(err)) => {
                    tracing::warn!(channel = channel.name(), error = %err, "channel send failed");
                    failures.insert(channel.name(), err);
                },
                Err(_) => {
                    tracing::warn!(channel = channel.name(), "channel send timed out");
                    failures.insert(channel.name(), ChannelError::Transport("timed out".to_string()));
                },
            }
        }

        Err(NotifierError::ChannelFailed(failures))
    }
}

fn render_forecast_day(day: &ForecastDay) -> String {
    format!(
        "{}: {} {:.1}\u{b0}-{:.1}\u{b0}",
        day.date, day.description, day.min_celsius, day.max_celsius
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Coordinates, LanguageTag, Role, Severity, UnitSystem, UserId};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedChannel {
        name: &'static str,
        outcome: Result<(), ChannelError>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Channel for FixedChannel {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn send(&self, _payload: &MessagePayload, _recipient: &str) -> Result<(), ChannelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn sample_user() -> User {
        User {
            id: UserId::generate(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            language: LanguageTag::parse("en-US").unwrap(),
            coordinates: Coordinates::new(50.4501, 30.5234).unwrap(),
            location_label: "Kyiv".to_string(),
            timezone: "Europe/Kyiv".to_string(),
            units: UnitSystem::Metric,
            active: true,
            role: Role::User,
        }
    }

    fn sample_alert() -> TriggeredAlert {
        TriggeredAlert {
            id: crate::model::TriggeredAlertId::generate(),
            user_id: UserId::generate(),
            rule_id: crate::model::AlertRuleId::generate(),
            kind: crate::model::AlertKind::Temperature,
            severity: Severity::Critical,
            title: "Temperature alert".to_string(),
            description: "observed 30 > 10".to_string(),
            observed_value: 30.0,
            threshold: 10.0,
            resolved: false,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn succeeds_when_at_least_one_channel_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let notifier = Notifier::new(vec![
            Arc::new(FixedChannel {
                name: "push",
                outcome: Err(ChannelError::Transport("down".to_string())),
                calls: calls.clone(),
            }),
            Arc::new(FixedChannel { name: "team_chat", outcome: Ok(()), calls: calls.clone() }),
        ]);

        let result = notifier.notify_alert(&sample_alert(), &sample_user()).await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fails_only_when_every_channel_fails() {
        let calls = Arc::new(AtomicUsize::new(0));
        let notifier = Notifier::new(vec![
            Arc::new(FixedChannel {
                name: "push",
                outcome: Err(ChannelError::Transport("down".to_string())),
                calls: calls.clone(),
            }),
            Arc::new(FixedChannel {
                name: "team_chat",
                outcome: Err(ChannelError::RecipientUnreachable),
                calls: calls.clone(),
            }),
        ]);

        let result = notifier.notify_alert(&sample_alert(), &sample_user()).await;
        assert!(matches!(result, Err(NotifierError::ChannelFailed(failures)) if failures.len() == 2));
    }

    #[tokio::test]
    async fn no_channels_configured_is_its_own_error() {
        let notifier = Notifier::new(vec![]);
        let result = notifier.notify_alert(&sample_alert(), &sample_user()).await;
        assert!(matches!(result, Err(NotifierError::NoChannelConfigured)));
    }
}
