use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use config::{Config, ConfigError, Environment as ConfigEnvironmentSource, File};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use url::Url;

use crate::scheduler::SchedulerSettings as RuntimeSchedulerSettings;
use crate::services::reader::CacheTtls;

pub const APP_ENVIRONMENT_ENV_VAR: &str = "APP_ENVIRONMENT";
const DEFAULT_SEARCH_PATH: &str = "./config";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RunEnvironment {
    Local,
    Production,
}

impl RunEnvironment {
    fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Production => "production",
        }
    }
}

/// Process-level options. The core itself has no CLI -- this is the harness binary's surface.
#[derive(Debug, Clone, Parser)]
#[clap(author, version, about)]
pub struct CliOptions {
    /// Explicit configuration file, bypassing the inferred base + environment layering.
    #[clap(short, long, value_name = "PATH_TO_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Overrides the environment inferred from `APP_ENVIRONMENT`.
    #[clap(short = 'e', long = "env")]
    pub environment: Option<RunEnvironment>,

    #[clap(
        short = 's',
        long = "search-path",
        value_name = "SETTINGS_SEARCH_PATH",
        default_value = DEFAULT_SEARCH_PATH
    )]
    pub settings_search_path: PathBuf,
}

/// A duration spelled as a digit run plus a unit suffix (`s`, `m`, `h`, `d`) -- `"10m"`,
/// `"1h"`. Parsed via `serde_with::DisplayFromStr` rather than `serde_with`'s numeric-seconds
/// adapters, since the configuration surface wants human-readable values.
#[derive(Debug, Clone, Copy)]
struct HumanDuration(Duration);

impl FromStr for HumanDuration {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let split_at = raw
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("duration '{raw}' is missing a unit suffix (s/m/h/d)"))?;
        let (digits, suffix) = raw.split_at(split_at);
        let value: u64 =
            digits.parse().map_err(|_| format!("'{raw}' does not start with a whole number"))?;

        let seconds = match suffix {
            "s" => value,
            "m" => value * 60,
            "h" => value * 60 * 60,
            "d" => value * 60 * 60 * 24,
            other => return Err(format!("unrecognized duration unit '{other}' in '{raw}'")),
        };
        Ok(HumanDuration(Duration::from_secs(seconds)))
    }
}

impl std::fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}s", self.0.as_secs())
    }
}

impl From<HumanDuration> for Duration {
    fn from(value: HumanDuration) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub host: String,
    #[serde(default = "DatabaseSettings::default_port")]
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub database_name: String,
    #[serde(default)]
    pub require_ssl: bool,
    #[serde(default = "DatabaseSettings::default_max_connections")]
    pub max_connections: u32,
}

impl DatabaseSettings {
    fn default_port() -> u16 {
        5432
    }

    fn default_max_connections() -> u32 {
        10
    }

    pub fn connect_options_with_db(&self) -> PgConnectOptions {
        let ssl_mode = if self.require_ssl { PgSslMode::Require } else { PgSslMode::Prefer };
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(self.password.expose_secret())
            .ssl_mode(ssl_mode)
            .database(&self.database_name)
    }

    pub fn pg_pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new().max_connections(self.max_connections)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherSettings {
    pub api_key: SecretString,
    pub user_agent: String,
    #[serde(default = "WeatherSettings::default_requests_per_second")]
    pub requests_per_second: u32,
}

impl WeatherSettings {
    fn default_requests_per_second() -> u32 {
        5
    }
}

/// Missing `webhook_url`/`bot_token` is valid and simply disables that notification channel.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntegrationSettings {
    pub webhook_url: Option<Url>,
    pub bot_token: Option<SecretString>,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettingsSection {
    #[serde(alias = "alert_period")]
    #[serde_as(as = "DisplayFromStr")]
    alert_period: HumanDuration,

    #[serde(alias = "digest_period")]
    #[serde_as(as = "DisplayFromStr")]
    digest_period: HumanDuration,

    #[serde(alias = "cooldown")]
    #[serde_as(as = "DisplayFromStr")]
    cooldown: HumanDuration,

    #[serde(default = "SchedulerSettingsSection::default_digest_window_minutes")]
    pub digest_window_minutes: u32,

    #[serde(default = "SchedulerSettingsSection::default_sweep_concurrency")]
    pub sweep_concurrency: usize,
}

impl SchedulerSettingsSection {
    fn default_digest_window_minutes() -> u32 {
        5
    }

    fn default_sweep_concurrency() -> usize {
        8
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.cooldown.into()).unwrap_or_else(|_| chrono::Duration::hours(1))
    }

    pub fn to_runtime(&self) -> RuntimeSchedulerSettings {
        RuntimeSchedulerSettings {
            alert_sweep_period: self.alert_period.into(),
            digest_tick_period: self.digest_period.into(),
            digest_window_minutes: self.digest_window_minutes,
            sweep_concurrency: self.sweep_concurrency,
        }
    }
}

impl Default for SchedulerSettingsSection {
    fn default() -> Self {
        Self {
            alert_period: HumanDuration(Duration::from_secs(10 * 60)),
            digest_period: HumanDuration(Duration::from_secs(60 * 60)),
            cooldown: HumanDuration(Duration::from_secs(60 * 60)),
            digest_window_minutes: Self::default_digest_window_minutes(),
            sweep_concurrency: Self::default_sweep_concurrency(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct CacheTtlSettings {
    #[serde_as(as = "DisplayFromStr")]
    current_ttl: HumanDuration,
    #[serde_as(as = "DisplayFromStr")]
    forecast_ttl: HumanDuration,
    #[serde_as(as = "DisplayFromStr")]
    air_quality_ttl: HumanDuration,
    #[serde_as(as = "DisplayFromStr")]
    geocode_ttl: HumanDuration,
    #[serde_as(as = "DisplayFromStr")]
    reverse_geocode_ttl: HumanDuration,
}

impl Default for CacheTtlSettings {
    fn default() -> Self {
        let default = CacheTtls::default();
        Self {
            current_ttl: HumanDuration(default.current),
            forecast_ttl: HumanDuration(default.forecast),
            air_quality_ttl: HumanDuration(default.air_quality),
            geocode_ttl: HumanDuration(default.geocode),
            reverse_geocode_ttl: HumanDuration(default.reverse_geocode),
        }
    }
}

impl From<CacheTtlSettings> for CacheTtls {
    fn from(settings: CacheTtlSettings) -> Self {
        Self {
            current: settings.current_ttl.into(),
            forecast: settings.forecast_ttl.into(),
            air_quality: settings.air_quality_ttl.into(),
            geocode: settings.geocode_ttl.into(),
            reverse_geocode: settings.reverse_geocode_ttl.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub cache_address: String,
    pub weather: WeatherSettings,
    #[serde(default)]
    pub integrations: IntegrationSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettingsSection,
    #[serde(default)]
    pub cache: CacheTtlSettings,
}

impl Settings {
    #[tracing::instrument(level = "debug", skip(options))]
    pub fn load(options: &CliOptions) -> Result<Self, ConfigError> {
        if let Some(path) = &options.config {
            tracing::info!(path = %path.display(), "loading configuration from explicit file");
            return Config::builder()
                .add_source(File::from(path.clone()))
                .add_source(ConfigEnvironmentSource::with_prefix("APP").separator("__"))
                .build()?
                .try_deserialize();
        }

        let environment = options.environment.unwrap_or_else(Self::inferred_environment);
        tracing::info!(environment = environment.as_str(), "loading layered configuration");

        Config::builder()
            .add_source(File::from(options.settings_search_path.join("base")).required(false))
            .add_source(
                File::from(options.settings_search_path.join(environment.as_str())).required(false),
            )
            .add_source(ConfigEnvironmentSource::with_prefix("APP").separator("__"))
            .build()?
            .try_deserialize()
    }

    fn inferred_environment() -> RunEnvironment {
        match std::env::var(APP_ENVIRONMENT_ENV_VAR) {
            Ok(value) if value.eq_ignore_ascii_case("production") => RunEnvironment::Production,
            Ok(_) => RunEnvironment::Local,
            Err(_) => {
                tracing::info!("no {APP_ENVIRONMENT_ENV_VAR} override provided, defaulting to local");
                RunEnvironment::Local
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_duration_parses_unit_suffixes() {
        assert_eq!(Duration::from(HumanDuration::from_str("10m").unwrap()), Duration::from_secs(600));
        assert_eq!(Duration::from(HumanDuration::from_str("1h").unwrap()), Duration::from_secs(3600));
        assert_eq!(Duration::from(HumanDuration::from_str("30s").unwrap()), Duration::from_secs(30));
    }

    #[test]
    fn human_duration_rejects_missing_suffix() {
        assert!(HumanDuration::from_str("10").is_err());
    }

    #[test]
    fn scheduler_settings_default_matches_spec_defaults() {
        let settings = SchedulerSettingsSection::default();
        let runtime = settings.to_runtime();
        assert_eq!(runtime.alert_sweep_period, Duration::from_secs(10 * 60));
        assert_eq!(runtime.digest_tick_period, Duration::from_secs(60 * 60));
        assert_eq!(runtime.sweep_concurrency, 8);
        assert_eq!(settings.cooldown(), chrono::Duration::hours(1));
    }
}
