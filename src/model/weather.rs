use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::user::UnitSystem;

/// A recent weather observation for a single coordinate. All fields are carried internally
/// in metric units; [`Observation::display_temperature`] and friends convert for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub temperature_celsius: f64,
    pub feels_like_celsius: f64,
    pub humidity_percent: u8,
    pub pressure_hpa: f64,
    pub wind_speed_kph: f64,
    pub wind_bearing_degrees: f64,
    pub visibility_km: f64,
    pub uv_index: f64,
    pub description: String,
    pub icon_code: String,
    pub location_label: String,
    pub air_quality: Option<AirQuality>,
    pub observed_at: DateTime<Utc>,
}

impl Observation {
    /// Converts the stored metric temperature into the unit system a user has configured,
    /// using `uom`'s quantity/unit-conversion types rather than hand-rolled arithmetic.
    pub fn display_temperature(&self, units: UnitSystem) -> f64 {
        use uom::si::f64::ThermodynamicTemperature;
        use uom::si::thermodynamic_temperature::{degree_celsius, degree_fahrenheit};

        let celsius = ThermodynamicTemperature::new::<degree_celsius>(self.temperature_celsius);
        match units {
            UnitSystem::Metric => celsius.get::<degree_celsius>(),
            UnitSystem::Imperial => celsius.get::<degree_fahrenheit>(),
        }
    }

    pub fn display_wind_speed(&self, units: UnitSystem) -> f64 {
        use uom::si::f64::Velocity;
        use uom::si::velocity::{kilometer_per_hour, mile_per_hour};

        let kph = Velocity::new::<kilometer_per_hour>(self.wind_speed_kph);
        match units {
            UnitSystem::Metric => kph.get::<kilometer_per_hour>(),
            UnitSystem::Imperial => kph.get::<mile_per_hour>(),
        }
    }

    /// The scalar the evaluator compares against a rule's threshold, by alert kind. `None`
    /// when the observation has no coverage for that kind (e.g. air quality absent).
    pub fn scalar_for(&self, kind: super::alert::AlertKind) -> Option<f64> {
        use super::alert::AlertKind::*;

        match kind {
            Temperature => Some(self.temperature_celsius),
            Humidity => Some(self.humidity_percent as f64),
            WindSpeed => Some(self.wind_speed_kph),
            AirQuality => self.air_quality.as_ref().map(|aq| aq.index as f64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AirQuality {
    pub index: u32,
    pub co: f64,
    pub no2: f64,
    pub o3: f64,
    pub pm2_5: f64,
    pub pm10: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastDay {
    pub date: chrono::NaiveDate,
    pub min_celsius: f64,
    pub max_celsius: f64,
    pub description: String,
    pub wind_speed_kph: f64,
    pub humidity_percent: u8,
}

/// A finite, non-restartable sequence of daily forecast entries for a single coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherForecast {
    pub days: Vec<ForecastDay>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Observation {
        Observation {
            temperature_celsius: 0.0,
            feels_like_celsius: -2.0,
            humidity_percent: 80,
            pressure_hpa: 1013.0,
            wind_speed_kph: 10.0,
            wind_bearing_degrees: 180.0,
            visibility_km: 10.0,
            uv_index: 1.0,
            description: "Clear".to_string(),
            icon_code: "01d".to_string(),
            location_label: "Kyiv".to_string(),
            air_quality: None,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn freezing_celsius_converts_to_thirty_two_fahrenheit() {
        let obs = sample();
        let fahrenheit = obs.display_temperature(UnitSystem::Imperial);
        assert!((fahrenheit - 32.0).abs() < 1e-9);
    }

    #[test]
    fn scalar_for_air_quality_is_none_when_absent() {
        let obs = sample();
        assert_eq!(obs.scalar_for(super::super::alert::AlertKind::AirQuality), None);
    }
}
