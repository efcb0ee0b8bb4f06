use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::{Display, EnumString};
use thiserror::Error;
use uuid::Uuid;

/// Stable numeric identity for a [`User`]. A thin `Uuid` wrapper, not a re-export of a
/// chat-platform id -- that mapping belongs to the command-surface adapter, not this core.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated latitude/longitude pair.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum CoordinateError {
    #[error("latitude {0} is outside [-90, 90]")]
    LatitudeOutOfRange(f64),

    #[error("longitude {0} is outside [-180, 180]")]
    LongitudeOutOfRange(f64),
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, CoordinateError> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(CoordinateError::LatitudeOutOfRange(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(CoordinateError::LongitudeOutOfRange(longitude));
        }
        Ok(Self { latitude, longitude })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Renders the coordinate suffix used throughout reverse-geocode labels: `(lat, lon)`
    /// rounded to four decimal places.
    pub fn label_suffix(&self) -> String {
        format!("({:.4}, {:.4})", self.latitude, self.longitude)
    }

    /// Renders the cache-key shaped fragment `{lat:.4f}:{lon:.4f}`.
    pub fn cache_key_fragment(&self) -> String {
        format!("{:.4}:{:.4}", self.latitude, self.longitude)
    }
}

/// An IETF BCP-47 language tag (e.g. `en-US`). Stored and typed as the full tag; acceptance
/// of short codes from the command surface is that external collaborator's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct LanguageTag(String);

#[derive(Debug, Error, PartialEq)]
#[error("language tag `{0}` is not a well-formed IETF BCP-47 tag")]
pub struct InvalidLanguageTag(String);

impl LanguageTag {
    pub fn parse(tag: impl Into<String>) -> Result<Self, InvalidLanguageTag> {
        let tag = tag.into();
        let well_formed = tag
            .split('-')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric()))
            && tag.contains('-')
            && !tag.is_empty();

        if well_formed {
            Ok(Self(tag))
        } else {
            Err(InvalidLanguageTag(tag))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LanguageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UnitSystem {
    Metric,
    Imperial,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Moderator,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub language: LanguageTag,
    pub coordinates: Coordinates,
    pub location_label: String,
    pub timezone: String,
    pub units: UnitSystem,
    pub active: bool,
    pub role: Role,
}

impl User {
    /// A user with an empty location label is excluded from all scheduled sweeps.
    pub fn is_schedulable(&self) -> bool {
        self.active && !self.location_label.trim().is_empty()
    }

    /// Resolves the user's timezone, falling back to UTC when the stored name is not a
    /// valid IANA zone.
    pub fn resolve_timezone(&self) -> chrono_tz::Tz {
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_reject_out_of_range_latitude() {
        assert_eq!(
            Coordinates::new(91.0, 0.0),
            Err(CoordinateError::LatitudeOutOfRange(91.0))
        );
    }

    #[test]
    fn coordinates_reject_out_of_range_longitude() {
        assert_eq!(
            Coordinates::new(0.0, 181.0),
            Err(CoordinateError::LongitudeOutOfRange(181.0))
        );
    }

    #[test]
    fn coordinates_label_suffix_rounds_to_four_decimals() {
        let coords = Coordinates::new(49.839_712, 24.029_651).unwrap();
        assert_eq!(coords.label_suffix(), "(49.8397, 24.0297)");
    }

    #[test]
    fn language_tag_requires_region_subtag() {
        assert!(LanguageTag::parse("en-US").is_ok());
        assert!(LanguageTag::parse("en").is_err());
        assert!(LanguageTag::parse("").is_err());
    }

    #[test]
    fn user_with_empty_location_label_is_not_schedulable() {
        let mut user = sample_user();
        user.location_label = "   ".to_string();
        assert!(!user.is_schedulable());
    }

    #[test]
    fn user_timezone_falls_back_to_utc_on_invalid_name() {
        let mut user = sample_user();
        user.timezone = "Not/AZone".to_string();
        assert_eq!(user.resolve_timezone(), chrono_tz::UTC);
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
}
