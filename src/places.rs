use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, Instant};
use tracing::{trace, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::geo::is_valid_coordinate;
use crate::model::GeocodeResult;

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 250;
const SEARCH_FIELD_MASK: &str = "places.id,places.displayName,places.formattedAddress,places.location,places.rating,places.userRatingCount,places.priceLevel,places.googleMapsUri";

/// The two lookup primitives the resolution cascade is built from.
///
/// Both return `Ok(None)` when nothing matches; `Err` is reserved for
/// transport or service failures.
#[async_trait]
pub trait GeocodingProvider: Send + Sync {
    /// Free-text point-of-interest search, best match only.
    async fn search_text(&self, query: &str) -> AppResult<Option<GeocodeResult>>;

    /// Free-form address to coordinates.
    async fn geocode_address(&self, address: &str) -> AppResult<Option<GeocodeResult>>;
}

pub fn provider_from_config(config: &AppConfig) -> AppResult<Arc<dyn GeocodingProvider>> {
    let key = config
        .google_places_api_key
        .clone()
        .ok_or_else(|| AppError::Config("GOOGLE_PLACES_API_KEY is not configured".into()))?;
    let client = GooglePlacesClient::new(
        key,
        &config.places_api_base,
        &config.geocoding_api_base,
        config.places_language.clone(),
        Duration::from_secs(config.http_timeout_secs),
    )?;
    Ok(Arc::new(ThrottledGeocoder::new(
        client,
        config.places_rate_limit_qps,
    )))
}

pub struct GooglePlacesClient {
    http: reqwest::Client,
    api_key: SecretString,
    places_base: String,
    geocoding_base: String,
    language: Option<String>,
}

impl GooglePlacesClient {
    pub fn new(
        api_key: SecretString,
        places_base: &str,
        geocoding_base: &str,
        language: Option<String>,
        timeout: Duration,
    ) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("travel-place-pipeline/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            api_key,
            places_base: places_base.trim_end_matches('/').to_string(),
            geocoding_base: geocoding_base.trim_end_matches('/').to_string(),
            language,
        })
    }
}

#[async_trait]
impl GeocodingProvider for GooglePlacesClient {
    async fn search_text(&self, query: &str) -> AppResult<Option<GeocodeResult>> {
        #[derive(serde::Serialize)]
        struct RequestBody<'a> {
            #[serde(rename = "textQuery")]
            text_query: &'a str,
            #[serde(rename = "maxResultCount")]
            max_result_count: u8,
            #[serde(rename = "languageCode", skip_serializing_if = "Option::is_none")]
            language_code: Option<&'a str>,
        }

        #[derive(Deserialize)]
        struct Response {
            places: Option<Vec<ResponsePlace>>,
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ResponsePlace {
            id: Option<String>,
            formatted_address: Option<String>,
            display_name: Option<ResponseText>,
            location: Option<ResponseLocation>,
            rating: Option<f64>,
            user_rating_count: Option<i64>,
            price_level: Option<String>,
            google_maps_uri: Option<String>,
        }

        #[derive(Deserialize)]
        struct ResponseText {
            text: Option<String>,
        }

        #[derive(Deserialize)]
        struct ResponseLocation {
            latitude: Option<f64>,
            longitude: Option<f64>,
        }

        let body = RequestBody {
            text_query: query,
            max_result_count: 1,
            language_code: self.language.as_deref(),
        };

        let response = self
            .http
            .post(format!("{}/v1/places:searchText", self.places_base))
            .header("X-Goog-Api-Key", self.api_key.expose_secret())
            .header("X-Goog-FieldMask", SEARCH_FIELD_MASK)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let parsed: Response = response.json().await?;
        let Some(place) = parsed.places.and_then(|list| list.into_iter().next()) else {
            trace!(query, "places search returned no candidates");
            return Ok(None);
        };
        let Some((latitude, longitude)) = place
            .location
            .and_then(|loc| Some((loc.latitude?, loc.longitude?)))
        else {
            return Ok(None);
        };

        let formatted_address = place
            .formatted_address
            .or_else(|| place.display_name.and_then(|text| text.text))
            .unwrap_or_else(|| query.to_string());

        Ok(Some(GeocodeResult {
            latitude,
            longitude,
            formatted_address,
            external_place_id: place.id,
            maps_url: place.google_maps_uri,
            rating: place.rating,
            rating_count: place.user_rating_count,
            price_level: place.price_level.as_deref().and_then(price_level_rank),
        }))
    }

    async fn geocode_address(&self, address: &str) -> AppResult<Option<GeocodeResult>> {
        #[derive(Deserialize)]
        struct Response {
            status: String,
            #[serde(default)]
            results: Vec<ResponseResult>,
            error_message: Option<String>,
        }

        #[derive(Deserialize)]
        struct ResponseResult {
            formatted_address: Option<String>,
            place_id: Option<String>,
            geometry: ResponseGeometry,
        }

        #[derive(Deserialize)]
        struct ResponseGeometry {
            location: ResponseLocation,
        }

        #[derive(Deserialize)]
        struct ResponseLocation {
            lat: f64,
            lng: f64,
        }

        let mut query = vec![
            ("address", address.to_string()),
            ("key", self.api_key.expose_secret().to_string()),
        ];
        if let Some(language) = &self.language {
            query.push(("language", language.clone()));
        }

        let response = self
            .http
            .get(format!("{}/maps/api/geocode/json", self.geocoding_base))
            .query(&query)
            .send()
            .await?
            .error_for_status()?;

        let parsed: Response = response.json().await?;
        match parsed.status.as_str() {
            "OK" => {}
            "ZERO_RESULTS" => return Ok(None),
            other => {
                return Err(AppError::Geocoding(format!(
                    "geocoding status {other}: {}",
                    parsed.error_message.unwrap_or_default()
                )))
            }
        }

        let Some(result) = parsed.results.into_iter().next() else {
            return Ok(None);
        };
        let location = result.geometry.location;
        let maps_url = result
            .place_id
            .as_ref()
            .map(|id| format!("https://www.google.com/maps/place/?q=place_id:{id}"));

        Ok(Some(GeocodeResult {
            latitude: location.lat,
            longitude: location.lng,
            formatted_address: result
                .formatted_address
                .unwrap_or_else(|| address.to_string()),
            external_place_id: result.place_id,
            maps_url,
            rating: None,
            rating_count: None,
            price_level: None,
        }))
    }
}

fn price_level_rank(level: &str) -> Option<i64> {
    match level {
        "PRICE_LEVEL_FREE" => Some(0),
        "PRICE_LEVEL_INEXPENSIVE" => Some(1),
        "PRICE_LEVEL_MODERATE" => Some(2),
        "PRICE_LEVEL_EXPENSIVE" => Some(3),
        "PRICE_LEVEL_VERY_EXPENSIVE" => Some(4),
        _ => None,
    }
}

/// Rate limits calls into the wrapped provider and retries transient
/// transport failures with exponential backoff plus jitter.
pub struct ThrottledGeocoder<P> {
    inner: P,
    rate_limiter: RateLimiter,
    max_attempts: u32,
    base_backoff_ms: u64,
    jitter_rng: Mutex<StdRng>,
}

impl<P: GeocodingProvider> ThrottledGeocoder<P> {
    pub fn new(inner: P, qps: u32) -> Self {
        Self::with_policy(
            inner,
            qps,
            MAX_ATTEMPTS,
            BASE_BACKOFF_MS,
            StdRng::from_entropy(),
        )
    }

    pub fn with_policy(
        inner: P,
        qps: u32,
        max_attempts: u32,
        base_backoff_ms: u64,
        rng: StdRng,
    ) -> Self {
        Self {
            inner,
            rate_limiter: RateLimiter::new(qps.max(1)),
            max_attempts: max_attempts.max(1),
            base_backoff_ms: base_backoff_ms.max(1),
            jitter_rng: Mutex::new(rng),
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = (attempt - 1).min(6);
        let base = Duration::from_millis(self.base_backoff_ms * (1 << exponent));
        let jitter = {
            let mut rng = self.jitter_rng.lock();
            Duration::from_millis(rng.gen_range(0..self.base_backoff_ms))
        };
        base + jitter
    }
}

#[async_trait]
impl<P: GeocodingProvider> GeocodingProvider for ThrottledGeocoder<P> {
    async fn search_text(&self, query: &str) -> AppResult<Option<GeocodeResult>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.rate_limiter.wait().await;
            match self.inner.search_text(query).await {
                Ok(result) => return Ok(result.filter(has_valid_coordinates)),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff_delay(attempt);
                    warn!(?err, attempt, query, "places search failed; retrying after {:?}", delay);
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn geocode_address(&self, address: &str) -> AppResult<Option<GeocodeResult>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.rate_limiter.wait().await;
            match self.inner.geocode_address(address).await {
                Ok(result) => return Ok(result.filter(has_valid_coordinates)),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff_delay(attempt);
                    warn!(?err, attempt, address, "geocode failed; retrying after {:?}", delay);
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn has_valid_coordinates(result: &GeocodeResult) -> bool {
    is_valid_coordinate(result.latitude, result.longitude)
}

struct RateLimiter {
    min_interval: Duration,
    last_tick: AsyncMutex<Option<Instant>>,
}

impl RateLimiter {
    fn new(qps: u32) -> Self {
        let safe_qps = qps.max(1);
        Self {
            min_interval: Duration::from_millis((1000_f64 / safe_qps as f64).ceil() as u64),
            last_tick: AsyncMutex::new(None),
        }
    }

    async fn wait(&self) {
        let interval = self.min_interval;
        let mut guard = self.last_tick.lock().await;
        if let Some(prev) = *guard {
            let elapsed = prev.elapsed();
            if elapsed < interval {
                sleep(interval - elapsed).await;
            }
        }
        *guard = Some(Instant::now());
    }
}
