mod tz;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::evaluator::AlertEvaluator;
use crate::model::{Coordinates, DigestKind, Subscription, User};
use crate::notifier::Notifier;
use crate::services::reader::WeatherReader;
use crate::subscriptions::SubscriptionStore;
use crate::users::UserStore;

const OBSERVATION_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SchedulerError {
    #[error("scheduler has already stopped and cannot be restarted")]
    AlreadyStopped,

    #[error("scheduler is already running")]
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub alert_sweep_period: Duration,
    pub digest_tick_period: Duration,
    pub digest_window_minutes: u32,
    pub sweep_concurrency: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            alert_sweep_period: Duration::from_secs(10 * 60),
            digest_tick_period: Duration::from_secs(60 * 60),
            digest_window_minutes: 5,
            sweep_concurrency: 16,
        }
    }
}

#[repr(u8)]
enum State {
    Idle = 0,
    Running = 1,
    Stopped = 2,
}

/// Runs the two background ticks SPEC_FULL's scheduler owns: a periodic alert sweep over
/// every schedulable user, and a digest tick that dispatches daily/weekly digests once per
/// subscription per local day. Neither tick blocks the other; a slow sweep and an overdue
/// digest simply interleave on the next `select!` iteration.
pub struct Scheduler {
    weather: Arc<WeatherReader>,
    evaluator: Arc<AlertEvaluator>,
    notifier: Arc<Notifier>,
    users: Arc<dyn UserStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    settings: SchedulerSettings,
    state: AtomicU8,
    stop_token: CancellationToken,
    digest_sent: Mutex<HashMap<crate::model::SubscriptionId, NaiveDate>>,
}

impl Scheduler {
    pub fn new(
        weather: Arc<WeatherReader>, evaluator: Arc<AlertEvaluator>, notifier: Arc<Notifier>,
        users: Arc<dyn UserStore>, subscriptions: Arc<dyn SubscriptionStore>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            weather,
            evaluator,
            notifier,
            users,
            subscriptions,
            settings,
            state: AtomicU8::new(State::Idle as u8),
            stop_token: CancellationToken::new(),
            digest_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Transitions `idle -> running` and spawns the supervised loop, which runs until either
    /// `ctx` is cancelled by the caller or [`Scheduler::stop`] is called. A scheduler that has
    /// already stopped cannot be restarted.
    pub fn start(self: Arc<Self>, ctx: CancellationToken) -> Result<JoinHandle<()>, SchedulerError> {
        match self.state.compare_exchange(
            State::Idle as u8,
            State::Running as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {},
            Err(observed) if observed == State::Stopped as u8 => {
                return Err(SchedulerError::AlreadyStopped)
            },
            Err(_) => return Err(SchedulerError::AlreadyRunning),
        }

        Ok(tokio::spawn(async move { self.do_run(ctx).await }))
    }

    /// Requests the supervised loop stop at its next `select!` iteration. A no-op if the
    /// scheduler is not currently running.
    pub fn stop(&self) {
        if self.state.load(Ordering::SeqCst) == State::Running as u8 {
            self.stop_token.cancel();
        }
    }

    async fn do_run(self: Arc<Self>, ctx: CancellationToken) {
        let mut sweep_interval = tokio::time::interval(self.settings.alert_sweep_period);
        sweep_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut digest_interval = tokio::time::interval(self.settings.digest_tick_period);
        digest_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // The first tick of a `tokio::time::interval` fires immediately; consume it so the
        // loop's first real sweep/digest happens a full period after `start`.
        sweep_interval.tick().await;
        digest_interval.tick().await;

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    tracing::info!("scheduler stopping: ambient context cancelled");
                    break;
                },
                _ = self.stop_token.cancelled() => {
                    tracing::info!("scheduler stopping: stop() called");
                    break;
                },
                _ = sweep_interval.tick() => {
                    self.run_alert_sweep().await;
                },
                _ = digest_interval.tick() => {
                    self.run_digest_tick().await;
                },
            }
        }

        self.state.store(State::Stopped as u8, Ordering::SeqCst);
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn run_alert_sweep(&self) {
        let users = match self.users.list_schedulable().await {
            Ok(users) => users,
            Err(error) => {
                tracing::error!(%error, "alert sweep aborted: could not list schedulable users");
                return;
            },
        };

        let semaphore = Arc::new(Semaphore::new(self.settings.sweep_concurrency.max(1)));
        let mut handles = Vec::with_capacity(users.len());

        for user in users {
            let semaphore = semaphore.clone();
            let weather = self.weather.clone();
            let evaluator = self.evaluator.clone();
            let notifier = self.notifier.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("sweep semaphore never closes");
                sweep_one_user(weather, evaluator, notifier, user).await
            }));
        }

        let mut failures = 0usize;
        let total = handles.len();
        for handle in handles {
            match handle.await {
                Ok(()) => {},
                Err(join_error) => {
                    failures += 1;
                    tracing::error!(error = %join_error, "alert sweep task panicked");
                },
            }
        }

        tracing::info!(total, failures, "alert sweep complete");
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn run_digest_tick(&self) {
        let subscriptions = match self.subscriptions.list_active_with_users().await {
            Ok(subscriptions) => subscriptions,
            Err(error) => {
                tracing::error!(%error, "digest tick aborted: could not list active subscriptions");
                return;
            },
        };

        let now = Utc::now();
        for (subscription, user) in subscriptions {
            self.dispatch_digest_if_due(&subscription, &user, now).await;
        }
    }

    async fn dispatch_digest_if_due(
        &self, subscription: &Subscription, user: &User, now: chrono::DateTime<Utc>,
    ) {
        let Some((target_hour, target_minute)) = subscription.target_hour_minute() else { return };
        let tz = user.resolve_timezone();

        if !tz::digest_is_due(
            now,
            tz,
            subscription.kind,
            target_hour,
            target_minute,
            self.settings.digest_window_minutes,
        ) {
            return;
        }

        let local_day = now.with_timezone(&tz).date_naive();
        {
            let mut sent = self.digest_sent.lock().unwrap();
            if sent.get(&subscription.id) == Some(&local_day) {
                return;
            }
        }

        let outcome = match subscription.kind {
            DigestKind::Daily => self.send_daily_digest(user.coordinates, user).await,
            DigestKind::Weekly => self.send_weekly_digest(user.coordinates, user).await,
            DigestKind::Alerts | DigestKind::Extreme => return,
        };

        if let Err(error) = outcome {
            tracing::warn!(
                subscription_id = %subscription.id,
                user_id = %user.id,
                %error,
                "digest dispatch failed; will retry on the next eligible tick"
            );
            return;
        }

        self.digest_sent.lock().unwrap().insert(subscription.id, local_day);
    }

    async fn send_daily_digest(&self, coordinates: Coordinates, user: &User) -> anyhow::Result<()> {
        let observation = self.weather.current(coordinates).await?;
        self.notifier.notify_daily_digest(&observation, user).await?;
        Ok(())
    }

    async fn send_weekly_digest(&self, coordinates: Coordinates, user: &User) -> anyhow::Result<()> {
        let forecast = self.weather.forecast(coordinates, 7).await?;
        self.notifier.notify_weekly_digest(&forecast, user).await?;
        Ok(())
    }
}

async fn sweep_one_user(
    weather: Arc<WeatherReader>, evaluator: Arc<AlertEvaluator>, notifier: Arc<Notifier>, user: User,
) {
    let observation =
        match tokio::time::timeout(OBSERVATION_FETCH_TIMEOUT, weather.current(user.coordinates)).await
        {
            Ok(Ok(observation)) => observation,
            Ok(Err(error)) => {
                tracing::warn!(user_id = %user.id, %error, "sweep: failed to fetch observation");
                return;
            },
            Err(_) => {
                tracing::warn!(user_id = %user.id, "sweep: observation fetch timed out");
                return;
            },
        };

    let triggered = match evaluator.evaluate(user.id, &observation).await {
        Ok(triggered) => triggered,
        Err(error) => {
            tracing::warn!(user_id = %user.id, %error, "sweep: rule evaluation failed");
            return;
        },
    };

    for alert in &triggered {
        if let Err(error) = notifier.notify_alert(alert, &user).await {
            tracing::warn!(user_id = %user.id, alert_id = %alert.id, %error, "sweep: notification failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::evaluator::{InMemoryRuleStore, InMemoryTriggeredAlertStore};
    use crate::model::{Coordinates, Frequency, LanguageTag, Role, SubscriptionId, UnitSystem, UserId};
    use crate::services::provider::HappyPathProvider;
    use crate::subscriptions::InMemorySubscriptionStore;
    use crate::users::InMemoryUserStore;
    use std::time::Duration as StdDuration;

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

    fn test_scheduler() -> Arc<Scheduler> {
        let provider = Arc::new(HappyPathProvider::default());
        let weather = Arc::new(WeatherReader::new(
            provider.clone(),
            provider.clone(),
            None,
            Arc::new(InMemoryCache::new()),
            Default::default(),
        ));
        let evaluator = Arc::new(AlertEvaluator::new(
            Arc::new(InMemoryRuleStore::new()),
            Arc::new(InMemoryTriggeredAlertStore::new()),
            chrono::Duration::hours(1),
        ));
        let notifier = Arc::new(Notifier::new(vec![]));
        let users: Arc<dyn UserStore> = Arc::new(InMemoryUserStore::new());
        let subscriptions: Arc<dyn SubscriptionStore> =
            Arc::new(InMemorySubscriptionStore::new(users.clone()));

        Arc::new(Scheduler::new(
            weather,
            evaluator,
            notifier,
            users,
            subscriptions,
            SchedulerSettings {
                alert_sweep_period: StdDuration::from_millis(20),
                digest_tick_period: StdDuration::from_millis(20),
                digest_window_minutes: 5,
                sweep_concurrency: 4,
            },
        ))
    }

    #[tokio::test]
    async fn cannot_restart_a_stopped_scheduler() {
        let scheduler = test_scheduler();
        let ctx = CancellationToken::new();
        let handle = scheduler.clone().start(ctx.clone()).unwrap();
        scheduler.stop();
        handle.await.unwrap();

        let restart = scheduler.start(CancellationToken::new());
        assert!(matches!(restart, Err(SchedulerError::AlreadyStopped)));
    }

    #[tokio::test]
    async fn starting_a_running_scheduler_twice_fails() {
        let scheduler = test_scheduler();
        let ctx = CancellationToken::new();
        let _handle = scheduler.clone().start(ctx.clone()).unwrap();

        let second = scheduler.clone().start(ctx.clone());
        assert!(matches!(second, Err(SchedulerError::AlreadyRunning)));

        scheduler.stop();
    }

    #[tokio::test]
    async fn ambient_context_cancellation_stops_the_loop() {
        let scheduler = test_scheduler();
        let ctx = CancellationToken::new();
        let handle = scheduler.clone().start(ctx.clone()).unwrap();
        ctx.cancel();
        tokio::time::timeout(StdDuration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn alert_sweep_notifies_without_aborting_on_a_single_user_failure() {
        let scheduler = test_scheduler();
        scheduler.users.upsert(sample_user()).await.unwrap();
        scheduler.run_alert_sweep().await;
    }

    #[tokio::test]
    async fn digest_not_yet_due_is_skipped_without_marking_sent() {
        let scheduler = test_scheduler();
        let user = sample_user();
        scheduler.users.upsert(user.clone()).await.unwrap();
        scheduler
            .subscriptions
            .create(Subscription {
                id: SubscriptionId::generate(),
                user_id: user.id,
                kind: DigestKind::Daily,
                frequency: Frequency::Daily,
                time_of_day: "23:59".to_string(),
                active: true,
            })
            .await
            .unwrap();

        scheduler.run_digest_tick().await;
        assert!(scheduler.digest_sent.lock().unwrap().is_empty());
    }
}
