use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::RetryTransientMiddleware;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time;
use thiserror::Error;
use url::Url;

use crate::model::{AirQuality, Coordinates, ForecastDay, Observation, WeatherForecast};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProviderError {
    #[error("weather provider call failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("error occurred in HTTP middleware calling weather provider: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    #[error("failed to parse weather provider response: {0}")]
    InvalidResponse(String),

    #[error("weather provider returned a non-success status: {0}")]
    UpstreamStatus(reqwest::StatusCode),

    #[error("supplied base url is not a base url to query: {0}")]
    NotABaseUrl(Url),
}

/// Address components an open-data reverse-geocoder returns. Label formatting (which field
/// wins, the "near " prefix, the coordinate suffix) is the reader's job, not the
/// provider's -- the provider only hands back what it was told.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReverseGeocodeAddress {
    pub city: Option<String>,
    pub town: Option<String>,
    pub village: Option<String>,
    pub suburb: Option<String>,
    pub neighbourhood: Option<String>,
    pub county: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
}

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn current(&self, coordinates: Coordinates) -> Result<Observation, ProviderError>;

    async fn forecast(
        &self, coordinates: Coordinates, days: u8,
    ) -> Result<WeatherForecast, ProviderError>;

    /// `Ok(None)` when the provider has no air-quality coverage for this location --
    /// absence is not an error.
    async fn air_quality(
        &self, coordinates: Coordinates,
    ) -> Result<Option<AirQuality>, ProviderError>;
}

#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    /// `Ok(None)` when the query matched nothing.
    async fn geocode(&self, query: &str) -> Result<Option<Coordinates>, ProviderError>;

    /// `Ok(None)` when the provider has no address on file for these coordinates.
    async fn reverse_geocode(
        &self, coordinates: Coordinates,
    ) -> Result<Option<ReverseGeocodeAddress>, ProviderError>;
}

fn build_http_client(user_agent: HeaderValue) -> Result<ClientWithMiddleware, ProviderError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, user_agent);

    let client = reqwest::Client::builder()
        .pool_idle_timeout(time::Duration::from_secs(60))
        .default_headers(headers)
        .pool_max_idle_per_host(5)
        .timeout(time::Duration::from_secs(10))
        .build()?;

    let retry_policy = ExponentialBackoff::builder()
        .retry_bounds(time::Duration::from_millis(250), time::Duration::from_secs(10))
        .build_with_max_retries(3);

    Ok(reqwest_middleware::ClientBuilder::new(client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build())
}

type Limiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// The primary upstream weather provider: current observations, forecast, air quality, and
/// geocoding, rate-limited client-side so a slow sweep never outruns the upstream's quota.
pub struct HttpWeatherProvider {
    client: ClientWithMiddleware,
    base_url: Url,
    api_key: SecretString,
    limiter: Limiter,
}

impl HttpWeatherProvider {
    pub fn new(
        base_url: Url, api_key: SecretString, user_agent: HeaderValue, requests_per_second: u32,
    ) -> Result<Self, ProviderError> {
        if base_url.cannot_be_a_base() {
            return Err(ProviderError::NotABaseUrl(base_url));
        }

        let client = build_http_client(user_agent)?;
        let quota = Quota::per_second(
            NonZeroU32::new(requests_per_second.max(1)).expect("clamped to at least 1"),
        );

        Ok(Self { client, base_url, api_key, limiter: RateLimiter::direct(quota) })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self, path: &[&str], query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        self.limiter.until_ready().await;

        let mut url = self.base_url.clone();
        {
            let mut segments =
                url.path_segments_mut().map_err(|_| ProviderError::NotABaseUrl(self.base_url.clone()))?;
            segments.extend(path);
        }
        url.query_pairs_mut().append_pair("appid", self.api_key.expose_secret());
        for (key, value) in query {
            url.query_pairs_mut().append_pair(key, value);
        }

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%url, %status, "weather provider responded with a non-success status");
            return Err(ProviderError::UpstreamStatus(status));
        }

        response
            .json::<T>()
            .await
            .map_err(|err| ProviderError::InvalidResponse(err.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct CurrentResponse {
    temperature_c: f64,
    feels_like_c: f64,
    humidity_pct: u8,
    pressure_hpa: f64,
    wind_speed_kph: f64,
    wind_bearing_deg: f64,
    visibility_km: f64,
    uv_index: f64,
    description: String,
    icon: String,
    location_label: String,
    observed_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    days: Vec<ForecastDayResponse>,
}

#[derive(Debug, Deserialize)]
struct ForecastDayResponse {
    date: chrono::NaiveDate,
    min_c: f64,
    max_c: f64,
    description: String,
    wind_speed_kph: f64,
    humidity_pct: u8,
}

#[derive(Debug, Deserialize)]
struct AirQualityResponse {
    aqi: Option<u32>,
    co: f64,
    no2: f64,
    o3: f64,
    pm2_5: f64,
    pm10: f64,
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    latitude: f64,
    longitude: f64,
}

#[async_trait]
impl WeatherProvider for HttpWeatherProvider {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn current(&self, coordinates: Coordinates) -> Result<Observation, ProviderError> {
        let body: CurrentResponse = self
            .get_json(
                &["v1", "current"],
                &[
                    ("lat", coordinates.latitude().to_string()),
                    ("lon", coordinates.longitude().to_string()),
                ],
            )
            .await?;

        Ok(Observation {
            temperature_celsius: body.temperature_c,
            feels_like_celsius: body.feels_like_c,
            humidity_percent: body.humidity_pct,
            pressure_hpa: body.pressure_hpa,
            wind_speed_kph: body.wind_speed_kph,
            wind_bearing_degrees: body.wind_bearing_deg,
            visibility_km: body.visibility_km,
            uv_index: body.uv_index,
            description: body.description,
            icon_code: body.icon,
            location_label: body.location_label,
            air_quality: None,
            observed_at: body.observed_at,
        })
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn forecast(
        &self, coordinates: Coordinates, days: u8,
    ) -> Result<WeatherForecast, ProviderError> {
        let body: ForecastResponse = self
            .get_json(
                &["v1", "forecast"],
                &[
                    ("lat", coordinates.latitude().to_string()),
                    ("lon", coordinates.longitude().to_string()),
                    ("days", days.to_string()),
                ],
            )
            .await?;

        Ok(WeatherForecast {
            days: body
                .days
                .into_iter()
                .map(|day| ForecastDay {
                    date: day.date,
                    min_celsius: day.min_c,
                    max_celsius: day.max_c,
                    description: day.description,
                    wind_speed_kph: day.wind_speed_kph,
                    humidity_percent: day.humidity_pct,
                })
                .collect(),
        })
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn air_quality(
        &self, coordinates: Coordinates,
    ) -> Result<Option<AirQuality>, ProviderError> {
        let body: AirQualityResponse = self
            .get_json(
                &["v1", "air-quality"],
                &[
                    ("lat", coordinates.latitude().to_string()),
                    ("lon", coordinates.longitude().to_string()),
                ],
            )
            .await?;

        Ok(body.aqi.map(|index| AirQuality {
            index,
            co: body.co,
            no2: body.no2,
            o3: body.o3,
            pm2_5: body.pm2_5,
            pm10: body.pm10,
        }))
    }
}

#[async_trait]
impl GeocodeProvider for HttpWeatherProvider {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn geocode(&self, query: &str) -> Result<Option<Coordinates>, ProviderError> {
        let body: GeocodeResponse =
            self.get_json(&["v1", "geocode"], &[("q", query.to_string())]).await?;

        Ok(body
            .results
            .into_iter()
            .next()
            .and_then(|r| Coordinates::new(r.latitude, r.longitude).ok()))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn reverse_geocode(
        &self, coordinates: Coordinates,
    ) -> Result<Option<ReverseGeocodeAddress>, ProviderError> {
        let body: Option<ReverseGeocodeAddress> = self
            .get_json(
                &["v1", "reverse"],
                &[
                    ("lat", coordinates.latitude().to_string()),
                    ("lon", coordinates.longitude().to_string()),
                ],
            )
            .await?;

        Ok(body)
    }
}

/// Secondary, open-data geocoder used only as a geocode/reverse-geocode fallback. Rejects
/// construction without a User-Agent, matching the upstream's own policy.
pub struct OpenDataGeocodeProvider {
    client: ClientWithMiddleware,
    base_url: Url,
}

impl OpenDataGeocodeProvider {
    pub fn new(base_url: Url, user_agent: HeaderValue) -> Result<Self, ProviderError> {
        if user_agent.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "open-data geocoder requires a non-empty User-Agent".to_string(),
            ));
        }
        let client = build_http_client(user_agent)?;
        Ok(Self { client, base_url })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self, path: &[&str], query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let mut url = self.base_url.clone();
        {
            let mut segments =
                url.path_segments_mut().map_err(|_| ProviderError::NotABaseUrl(self.base_url.clone()))?;
            segments.extend(path);
        }
        for (key, value) in query {
            url.query_pairs_mut().append_pair(key, value);
        }

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::UpstreamStatus(status));
        }

        response
            .json::<T>()
            .await
            .map_err(|err| ProviderError::InvalidResponse(err.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct OpenDataGeocodeResult {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct OpenDataReverseResult {
    address: ReverseGeocodeAddress,
}

#[async_trait]
impl GeocodeProvider for OpenDataGeocodeProvider {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn geocode(&self, query: &str) -> Result<Option<Coordinates>, ProviderError> {
        let results: Vec<OpenDataGeocodeResult> =
            self.get_json(&["search"], &[("q", query.to_string())]).await?;

        Ok(results.into_iter().next().and_then(|r| Coordinates::new(r.lat, r.lon).ok()))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn reverse_geocode(
        &self, coordinates: Coordinates,
    ) -> Result<Option<ReverseGeocodeAddress>, ProviderError> {
        let result: Option<OpenDataReverseResult> = self
            .get_json(
                &["reverse"],
                &[
                    ("lat", coordinates.latitude().to_string()),
                    ("lon", coordinates.longitude().to_string()),
                ],
            )
            .await?;

        Ok(result.map(|r| r.address))
    }
}

/// A fixed, non-networked provider used by tests and the demo binary, mirroring the
/// teacher's `HappyPathWeatherServices` stub.
#[derive(Debug, Clone, Copy, Default)]
pub struct HappyPathProvider;

#[async_trait]
impl WeatherProvider for HappyPathProvider {
    async fn current(&self, coordinates: Coordinates) -> Result<Observation, ProviderError> {
        Ok(Observation {
            temperature_celsius: 22.0,
            feels_like_celsius: 21.0,
            humidity_percent: 55,
            pressure_hpa: 1013.0,
            wind_speed_kph: 12.0,
            wind_bearing_degrees: 200.0,
            visibility_km: 10.0,
            uv_index: 4.0,
            description: "Partly cloudy".to_string(),
            icon_code: "02d".to_string(),
            location_label: format!("Happy Path {}", coordinates.label_suffix()),
            air_quality: Some(AirQuality { index: 42, co: 0.3, no2: 10.0, o3: 30.0, pm2_5: 8.0, pm10: 12.0 }),
            observed_at: chrono::Utc::now(),
        })
    }

    async fn forecast(
        &self, _coordinates: Coordinates, days: u8,
    ) -> Result<WeatherForecast, ProviderError> {
        let today = chrono::Utc::now().date_naive();
        let days = (0..days)
            .map(|offset| ForecastDay {
                date: today + chrono::Duration::days(offset as i64),
                min_celsius: 15.0,
                max_celsius: 24.0,
                description: "Mostly sunny".to_string(),
                wind_speed_kph: 10.0,
                humidity_percent: 50,
            })
            .collect();
        Ok(WeatherForecast { days })
    }

    async fn air_quality(
        &self, _coordinates: Coordinates,
    ) -> Result<Option<AirQuality>, ProviderError> {
        Ok(Some(AirQuality { index: 42, co: 0.3, no2: 10.0, o3: 30.0, pm2_5: 8.0, pm10: 12.0 }))
    }
}

#[async_trait]
impl GeocodeProvider for HappyPathProvider {
    async fn geocode(&self, query: &str) -> Result<Option<Coordinates>, ProviderError> {
        if query.trim().is_empty() {
            return Ok(None);
        }
        Coordinates::new(50.4501, 30.5234).map(Some).map_err(|err| {
            ProviderError::InvalidResponse(err.to_string())
        })
    }

    async fn reverse_geocode(
        &self, _coordinates: Coordinates,
    ) -> Result<Option<ReverseGeocodeAddress>, ProviderError> {
        Ok(Some(ReverseGeocodeAddress {
            city: Some("Kyiv".to_string()),
            country: Some("Ukraine".to_string()),
            ..Default::default()
        }))
    }
}
