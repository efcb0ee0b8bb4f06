use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio_util::sync::CancellationToken;

use weatherguard::cache::InMemoryCache;
use weatherguard::evaluator::{AlertEvaluator, InMemoryRuleStore, InMemoryTriggeredAlertStore};
use weatherguard::model::{
    AlertCondition, AlertKind, AlertOperator, Coordinates, DigestKind, Frequency, LanguageTag, Role,
    Subscription, SubscriptionId, UnitSystem, User, UserId,
};
use weatherguard::notifier::Notifier;
use weatherguard::scheduler::{Scheduler, SchedulerSettings};
use weatherguard::services::provider::HappyPathProvider;
use weatherguard::services::reader::WeatherReader;
use weatherguard::subscriptions::{InMemorySubscriptionStore, SubscriptionStore};
use weatherguard::users::{InMemoryUserStore, UserStore};

/// Exercises construction and graceful shutdown end to end against the in-memory stores and a
/// happy-path weather provider. Not the host process the core assumes -- a stand-in for it.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = weatherguard::tracing::get_tracing_subscriber("info");
    weatherguard::tracing::init_subscriber(subscriber);

    let provider = Arc::new(HappyPathProvider::default());
    let weather = Arc::new(WeatherReader::new(
        provider.clone(),
        provider.clone(),
        None,
        Arc::new(InMemoryCache::new()),
        Default::default(),
    ));

    let rules = Arc::new(InMemoryRuleStore::new());
    let triggered = Arc::new(InMemoryTriggeredAlertStore::new());
    let evaluator = Arc::new(AlertEvaluator::new(rules, triggered, chrono::Duration::hours(1)));

    let notifier = Arc::new(Notifier::new(Vec::new()));

    let users: Arc<dyn UserStore> = Arc::new(InMemoryUserStore::new());
    let subscriptions: Arc<dyn SubscriptionStore> =
        Arc::new(InMemorySubscriptionStore::new(users.clone()));

    let demo_user = User {
        id: UserId::generate(),
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        language: LanguageTag::parse("en-US").expect("well-formed demo language tag"),
        coordinates: Coordinates::new(50.4501, 30.5234).expect("well-formed demo coordinates"),
        location_label: "Kyiv".to_string(),
        timezone: "Europe/Kyiv".to_string(),
        units: UnitSystem::Metric,
        active: true,
        role: Role::User,
    };
    users.upsert(demo_user.clone()).await?;

    evaluator
        .create_rule(
            demo_user.id,
            AlertKind::Temperature,
            AlertCondition { operator: AlertOperator::GreaterThan, threshold: 15.0 },
        )
        .await?;

    subscriptions
        .create(Subscription {
            id: SubscriptionId::generate(),
            user_id: demo_user.id,
            kind: DigestKind::Daily,
            frequency: Frequency::Daily,
            time_of_day: "08:00".to_string(),
            active: true,
        })
        .await?;

    let scheduler = Arc::new(Scheduler::new(
        weather,
        evaluator,
        notifier,
        users,
        subscriptions,
        SchedulerSettings {
            alert_sweep_period: Duration::from_secs(5),
            digest_tick_period: Duration::from_secs(30),
            ..Default::default()
        },
    ));

    let ctx = CancellationToken::new();
    let handle = scheduler.clone().start(ctx.clone())?;
    tracing::info!("scheduler started; press Ctrl+C to stop");

    shutdown_signal().await;
    scheduler.stop();
    handle.await?;

    tracing::info!("scheduler stopped cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("signal received, stopping scheduler");
}
