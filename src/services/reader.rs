use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::cache::{CacheStore, TypedCache};
use crate::model::{AirQuality, Coordinates, Observation, WeatherForecast};

use super::provider::{GeocodeProvider, ProviderError, ReverseGeocodeAddress, WeatherProvider};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReaderError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no match found")]
    NotFound,

    #[error("weather provider is unavailable: {0}")]
    UpstreamUnavailable(#[from] ProviderError),
}

#[derive(Debug, Clone, Copy)]
pub struct CacheTtls {
    pub current: Duration,
    pub forecast: Duration,
    pub air_quality: Duration,
    pub geocode: Duration,
    pub reverse_geocode: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            current: Duration::from_secs(10 * 60),
            forecast: Duration::from_secs(60 * 60),
            air_quality: Duration::from_secs(30 * 60),
            geocode: Duration::from_secs(24 * 60 * 60),
            reverse_geocode: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Cache-first retrieval of current conditions, forecast, and air quality; geocode and
/// reverse-geocode with a secondary-provider fallback. Every operation is safe for
/// concurrent callers -- the cache serializes writes internally.
pub struct WeatherReader {
    primary: Arc<dyn WeatherProvider>,
    primary_geocoder: Arc<dyn GeocodeProvider>,
    secondary_geocoder: Option<Arc<dyn GeocodeProvider>>,
    cache: Arc<dyn CacheStore>,
    ttls: CacheTtls,
}

impl WeatherReader {
    pub fn new(
        primary: Arc<dyn WeatherProvider>, primary_geocoder: Arc<dyn GeocodeProvider>,
        secondary_geocoder: Option<Arc<dyn GeocodeProvider>>, cache: Arc<dyn CacheStore>,
        ttls: CacheTtls,
    ) -> Self {
        Self { primary, primary_geocoder, secondary_geocoder, cache, ttls }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn current(&self, coordinates: Coordinates) -> Result<Observation, ReaderError> {
        let key = format!("weather:current:{}", coordinates.cache_key_fragment());
        let typed = TypedCache::new(self.cache.as_ref());

        if let Some(cached) = typed.get::<Observation>(&key).await.unwrap_or(None) {
            tracing::debug!(%key, "current observation served from cache");
            return Ok(cached);
        }

        let observation = self.primary.current(coordinates).await?;
        self.write_back(&key, &observation, self.ttls.current).await;
        Ok(observation)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn forecast(
        &self, coordinates: Coordinates, days: u8,
    ) -> Result<WeatherForecast, ReaderError> {
        if !(1..=7).contains(&days) {
            return Err(ReaderError::InvalidArgument(format!(
                "days must be in [1, 7], got {days}"
            )));
        }

        let key = format!(
            "weather:forecast:{}:{days}",
            coordinates.cache_key_fragment()
        );
        let typed = TypedCache::new(self.cache.as_ref());

        if let Some(cached) = typed.get::<WeatherForecast>(&key).await.unwrap_or(None) {
            tracing::debug!(%key, "forecast served from cache");
            return Ok(cached);
        }

        let forecast = self.primary.forecast(coordinates, days).await?;
        self.write_back(&key, &forecast, self.ttls.forecast).await;
        Ok(forecast)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn air_quality(
        &self, coordinates: Coordinates,
    ) -> Result<Option<AirQuality>, ReaderError> {
        let key = format!("weather:air:{}", coordinates.cache_key_fragment());
        let typed = TypedCache::new(self.cache.as_ref());

        if let Some(cached) = typed.get::<Option<AirQuality>>(&key).await.unwrap_or(None) {
            tracing::debug!(%key, "air quality served from cache");
            return Ok(cached);
        }

        let air_quality = self.primary.air_quality(coordinates).await?;
        self.write_back(&key, &air_quality, self.ttls.air_quality).await;
        Ok(air_quality)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn geocode(&self, query: &str) -> Result<Coordinates, ReaderError> {
        let normalized = query.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(ReaderError::InvalidArgument("query must not be empty".to_string()));
        }

        let key = format!("geocode:{normalized}");
        let typed = TypedCache::new(self.cache.as_ref());

        if let Some(cached) = typed.get::<Coordinates>(&key).await.unwrap_or(None) {
            tracing::debug!(%key, "geocode served from cache");
            return Ok(cached);
        }

        let found = match self.primary_geocoder.geocode(&normalized).await {
            Ok(Some(coordinates)) => Some(coordinates),
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, "primary geocoder failed, trying fallback");
                None
            },
        };

        let resolved = match found {
            Some(coordinates) => Some(coordinates),
            None => match &self.secondary_geocoder {
                Some(secondary) => secondary.geocode(&normalized).await.unwrap_or(None),
                None => None,
            },
        };

        match resolved {
            Some(coordinates) => {
                self.write_back(&key, &coordinates, self.ttls.geocode).await;
                Ok(coordinates)
            },
            None => Err(ReaderError::NotFound),
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn reverse_geocode(&self, coordinates: Coordinates) -> String {
        let key = format!("reverse_geocode:{}", coordinates.cache_key_fragment());
        let typed = TypedCache::new(self.cache.as_ref());

        if let Some(cached) = typed.get::<String>(&key).await.unwrap_or(None) {
            tracing::debug!(%key, "reverse geocode served from cache");
            return cached;
        }

        let address = match self.primary_geocoder.reverse_geocode(coordinates).await {
            Ok(Some(address)) => Some(address),
            _ => match &self.secondary_geocoder {
                Some(secondary) => secondary.reverse_geocode(coordinates).await.unwrap_or(None),
                None => None,
            },
        };

        let label = format_reverse_geocode_label(address.as_ref(), coordinates);
        self.write_back(&key, &label, self.ttls.reverse_geocode).await;
        label
    }

    async fn write_back<T: serde::Serialize + Sync>(&self, key: &str, value: &T, ttl: Duration) {
        let typed = TypedCache::new(self.cache.as_ref());
        if let Err(err) = typed.set(key, value, ttl).await {
            tracing::warn!(%key, error = %err, "failed to write cache entry back");
        }
    }
}

/// Implements the preference order: city, town, village, suburb/neighbourhood (prefixed
/// "near "), county/state (prefixed "near "), else the coordinate fallback. Always suffixes
/// the rounded `(lat, lon)`.
fn format_reverse_geocode_label(
    address: Option<&ReverseGeocodeAddress>, coordinates: Coordinates,
) -> String {
    let suffix = coordinates.label_suffix();

    let primary_name = address.and_then(|addr| {
        addr.city
            .clone()
            .or_else(|| addr.town.clone())
            .or_else(|| addr.village.clone())
    });

    if let Some(name) = primary_name {
        return format!("{name} {suffix}");
    }

    let nearby_name = address.and_then(|addr| {
        addr.suburb
            .clone()
            .or_else(|| addr.neighbourhood.clone())
            .or_else(|| addr.county.clone())
            .or_else(|| addr.state.clone())
    });

    if let Some(name) = nearby_name {
        return format!("near {name} {suffix}");
    }

    format!("Location {suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::services::provider::HappyPathProvider;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGeocoder {
        calls: AtomicUsize,
        coordinates: Option<Coordinates>,
    }

    #[async_trait]
    impl GeocodeProvider for CountingGeocoder {
        async fn geocode(&self, _query: &str) -> Result<Option<Coordinates>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.coordinates)
        }

        async fn reverse_geocode(
            &self, _coordinates: Coordinates,
        ) -> Result<Option<ReverseGeocodeAddress>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    fn reader_with(geocoder: Arc<CountingGeocoder>) -> WeatherReader {
        WeatherReader::new(
            Arc::new(HappyPathProvider),
            geocoder,
            None,
            Arc::new(InMemoryCache::new()),
            CacheTtls::default(),
        )
    }

    #[tokio::test]
    async fn geocode_rejects_empty_query() {
        let geocoder = Arc::new(CountingGeocoder { calls: AtomicUsize::new(0), coordinates: None });
        let reader = reader_with(geocoder.clone());

        let err = reader.geocode("   ").await.unwrap_err();
        assert!(matches!(err, ReaderError::InvalidArgument(_)));
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn geocode_cache_hit_skips_provider() {
        let geocoder = Arc::new(CountingGeocoder {
            calls: AtomicUsize::new(0),
            coordinates: Coordinates::new(50.4501, 30.5234).ok(),
        });
        let reader = reader_with(geocoder.clone());

        let first = reader.geocode("Kyiv").await.unwrap();
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 1);

        let second = reader.geocode("  KYIV ").await.unwrap();
        assert_eq!(second, first);
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 1, "second call must be a cache hit");
    }

    #[tokio::test]
    async fn forecast_rejects_out_of_range_days() {
        let geocoder = Arc::new(CountingGeocoder { calls: AtomicUsize::new(0), coordinates: None });
        let reader = reader_with(geocoder);
        let coords = Coordinates::new(50.0, 30.0).unwrap();

        assert!(matches!(
            reader.forecast(coords, 0).await,
            Err(ReaderError::InvalidArgument(_))
        ));
        assert!(matches!(
            reader.forecast(coords, 8).await,
            Err(ReaderError::InvalidArgument(_))
        ));
    }

    #[test]
    fn reverse_geocode_label_prefers_city() {
        let address = ReverseGeocodeAddress {
            city: Some("Lviv".to_string()),
            country: Some("Ukraine".to_string()),
            ..Default::default()
        };
        let coords = Coordinates::new(49.8397, 24.0297).unwrap();
        assert_eq!(
            format_reverse_geocode_label(Some(&address), coords),
            "Lviv (49.8397, 24.0297)"
        );
    }

    #[test]
    fn reverse_geocode_label_falls_back_to_near_suburb() {
        let address =
            ReverseGeocodeAddress { suburb: Some("Podil".to_string()), ..Default::default() };
        let coords = Coordinates::new(50.4501, 30.5234).unwrap();
        assert_eq!(
            format_reverse_geocode_label(Some(&address), coords),
            "near Podil (50.4501, 30.5234)"
        );
    }

    #[test]
    fn reverse_geocode_label_falls_back_to_coordinates_when_no_address() {
        let coords = Coordinates::new(0.0, 0.0).unwrap();
        assert_eq!(format_reverse_geocode_label(None, coords), "Location (0.0000, 0.0000)");
    }
}
