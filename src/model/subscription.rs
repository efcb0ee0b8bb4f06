use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

use super::user::UserId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn new(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum DigestKind {
    Daily,
    Weekly,
    Alerts,
    Extreme,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum Frequency {
    Hourly,
    #[strum(serialize = "every-3h")]
    #[serde(rename = "every-3h")]
    Every3h,
    #[strum(serialize = "every-6h")]
    #[serde(rename = "every-6h")]
    Every6h,
    Daily,
    Weekly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub kind: DigestKind,
    pub frequency: Frequency,
    /// `HH:MM` in the user's local timezone; empty for `alerts`/`extreme`.
    pub time_of_day: String,
    pub active: bool,
}

impl Subscription {
    /// Parses `time_of_day` as `HH:MM`, returning `None` for an empty or malformed value
    /// (expected for `alerts`/`extreme` subscriptions, which never dispatch on a timer).
    pub fn target_hour_minute(&self) -> Option<(u32, u32)> {
        let (hour, minute) = self.time_of_day.split_once(':')?;
        let hour: u32 = hour.trim().parse().ok()?;
        let minute: u32 = minute.trim().parse().ok()?;
        if hour > 23 || minute > 59 {
            return None;
        }
        Some((hour, minute))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kind: DigestKind, time_of_day: &str) -> Subscription {
        Subscription {
            id: SubscriptionId::generate(),
            user_id: UserId::generate(),
            kind,
            frequency: Frequency::Daily,
            time_of_day: time_of_day.to_string(),
            active: true,
        }
    }

    #[test]
    fn parses_well_formed_time_of_day() {
        assert_eq!(sample(DigestKind::Daily, "08:00").target_hour_minute(), Some((8, 0)));
    }

    #[test]
    fn empty_time_of_day_is_none() {
        assert_eq!(sample(DigestKind::Alerts, "").target_hour_minute(), None);
    }

    #[test]
    fn malformed_time_of_day_is_none() {
        assert_eq!(sample(DigestKind::Daily, "25:99").target_hour_minute(), None);
        assert_eq!(sample(DigestKind::Daily, "not-a-time").target_hour_minute(), None);
    }
}
