use once_cell::sync::Lazy;
use tracing::Subscriber;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

pub static TEST_TRACING: Lazy<()> = Lazy::new(|| {
    let default_filter_level = "info";
    if std::env::var("TEST_LOG").is_ok() {
        init_subscriber(get_compact_subscriber(default_filter_level));
    } else {
        init_subscriber(get_subscriber("test", default_filter_level, std::io::sink));
    }
});

/// Bunyan-JSON subscriber for production: one structured record per span event, named after
/// the running executable.
pub fn get_tracing_subscriber(log_directives: impl AsRef<str>) -> impl Subscriber + Sync + Send {
    get_subscriber(
        std::env::current_exe()
            .map(|path| path.to_string_lossy().to_string())
            .unwrap_or_else(|_| "weatherguard".to_string()),
        log_directives,
        std::io::stdout,
    )
}

pub fn get_subscriber<S0, S1, W>(name: S0, env_filter: S1, sink: W) -> impl Subscriber + Sync + Send
where
    S0: Into<String>,
    S1: AsRef<str>,
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));
    let formatting_layer = BunyanFormattingLayer::new(name.into(), sink);

    Registry::default().with(env_filter).with(JsonStorageLayer).with(formatting_layer)
}

/// Compact human-readable subscriber for local runs, gated by the same `RUST_LOG`/`EnvFilter`.
pub fn get_compact_subscriber(log_directives: impl AsRef<str>) -> impl Subscriber + Sync + Send {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_directives));

    Registry::default().with(env_filter).with(tracing_subscriber::fmt::layer().compact())
}

/// Registers a subscriber as the process-global default. Call exactly once.
pub fn init_subscriber(subscriber: impl Subscriber + Sync + Send) {
    LogTracer::init().expect("failed to install log tracer bridge");
    tracing::subscriber::set_global_default(subscriber).expect("failed to set tracing subscriber");
}
