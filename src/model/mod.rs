mod alert;
mod subscription;
mod user;
mod weather;

pub use alert::{
    AlertCondition, AlertKind, AlertOperator, AlertRule, AlertRuleId, AlertRulePatch, Severity,
    TriggeredAlert, TriggeredAlertId,
};
pub use subscription::{DigestKind, Frequency, Subscription, SubscriptionId};
pub use user::{Coordinates, LanguageTag, Role, UnitSystem, User, UserId};
pub use weather::{AirQuality, ForecastDay, Observation, WeatherForecast};
