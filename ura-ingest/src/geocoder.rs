//! Geocoder contract and HTTP implementation
//!
//! Maps an address string to coordinates and a district, or reports
//! NotFound. NotFound is always non-fatal to ingestion: objects persist
//! without coordinates and can be re-geocoded by a later import.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use ura_common::{Error, Result};

const CLIENT_TIMEOUT_SECS: u64 = 15;
const USER_AGENT: &str = concat!("ura-ingest/", env!("CARGO_PKG_VERSION"));

/// A geocoding hit
#[derive(Debug, Clone, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub district: Option<String>,
}

/// Geocoding capability
///
/// `Ok(None)` means the address could not be resolved; callers must treat
/// it as non-fatal.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, address: &str) -> Result<Option<GeoPoint>>;
}

/// Geocoder used when no API key is configured: resolves nothing
pub struct NullGeocoder;

#[async_trait]
impl Geocoder for NullGeocoder {
    async fn geocode(&self, _address: &str) -> Result<Option<GeoPoint>> {
        Ok(None)
    }
}

/// Rate limiter enforcing a minimum interval between requests
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval_ms: u64) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    /// Wait if necessary to comply with the rate limit
    async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                debug!("Geocoder rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

/// HTTP geocoder against a Yandex-style geocode API
///
/// Responses are cached per address for the life of the process; the
/// upstream service is rate-limited, so repeated addresses within one
/// import must not produce repeated requests.
pub struct HttpGeocoder {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    rate_limiter: RateLimiter,
    cache: Mutex<HashMap<String, Option<GeoPoint>>>,
}

impl HttpGeocoder {
    pub const DEFAULT_BASE_URL: &'static str = "https://geocode-maps.yandex.ru/1.x/";

    pub fn new(base_url: impl Into<String>, api_key: String, rate_limit_ms: u64) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(CLIENT_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Config(format!("geocoder HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.into(),
            api_key,
            rate_limiter: RateLimiter::new(rate_limit_ms),
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Pull coordinates and district out of a geocode API response
    fn parse_response(body: &Value) -> Option<GeoPoint> {
        let feature = body
            .pointer("/response/GeoObjectCollection/featureMember")?
            .as_array()?
            .first()?;

        let pos = feature.pointer("/GeoObject/Point/pos")?.as_str()?;
        let mut parts = pos.split_whitespace();
        let longitude: f64 = parts.next()?.parse().ok()?;
        let latitude: f64 = parts.next()?.parse().ok()?;

        let components = feature
            .pointer("/GeoObject/metaDataProperty/GeocoderMetaData/Address/Components")
            .and_then(|v| v.as_array());

        // Prefer the district component, fall back to the administrative area
        let district = components.and_then(|components| {
            for wanted in ["district", "area"] {
                for component in components {
                    if component.get("kind").and_then(|k| k.as_str()) == Some(wanted) {
                        if let Some(name) = component.get("name").and_then(|n| n.as_str()) {
                            return Some(name.to_string());
                        }
                    }
                }
            }
            None
        });

        Some(GeoPoint {
            latitude,
            longitude,
            district,
        })
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<GeoPoint>> {
        {
            let cache = self.cache.lock().await;
            if let Some(cached) = cache.get(address) {
                return Ok(cached.clone());
            }
        }

        self.rate_limiter.wait().await;

        let response = self
            .http_client
            .get(&self.base_url)
            .query(&[
                ("apikey", self.api_key.as_str()),
                ("format", "json"),
                ("geocode", address),
                ("results", "1"),
                ("lang", "ru_RU"),
            ])
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                // Network trouble is treated like NotFound: the object
                // persists without coordinates
                warn!(address = %address, error = %e, "Geocoder request failed");
                return Ok(None);
            }
        };

        if !response.status().is_success() {
            warn!(address = %address, status = %response.status(), "Geocoder returned error status");
            return Ok(None);
        }

        let body: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(address = %address, error = %e, "Geocoder response unparseable");
                return Ok(None);
            }
        };

        let point = Self::parse_response(&body);
        if point.is_none() {
            debug!(address = %address, "Geocoder found nothing");
        }

        let mut cache = self.cache.lock().await;
        cache.insert(address.to_string(), point.clone());
        Ok(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_response() -> Value {
        json!({
            "response": {
                "GeoObjectCollection": {
                    "featureMember": [{
                        "GeoObject": {
                            "Point": { "pos": "37.617635 55.755814" },
                            "metaDataProperty": {
                                "GeocoderMetaData": {
                                    "Address": {
                                        "Components": [
                                            { "kind": "locality", "name": "Москва" },
                                            { "kind": "district", "name": "Тверской район" },
                                            { "kind": "street", "name": "ул. Ленина" }
                                        ]
                                    }
                                }
                            }
                        }
                    }]
                }
            }
        })
    }

    #[test]
    fn parses_coordinates_and_district() {
        let point = HttpGeocoder::parse_response(&sample_response()).unwrap();
        assert!((point.latitude - 55.755814).abs() < 1e-9);
        assert!((point.longitude - 37.617635).abs() < 1e-9);
        assert_eq!(point.district.as_deref(), Some("Тверской район"));
    }

    #[test]
    fn empty_feature_list_is_not_found() {
        let body = json!({
            "response": { "GeoObjectCollection": { "featureMember": [] } }
        });
        assert!(HttpGeocoder::parse_response(&body).is_none());
    }

    #[test]
    fn falls_back_to_area_component() {
        let mut body = sample_response();
        let components = body
            .pointer_mut("/response/GeoObjectCollection/featureMember/0/GeoObject/metaDataProperty/GeocoderMetaData/Address/Components")
            .unwrap();
        *components = json!([
            { "kind": "locality", "name": "Москва" },
            { "kind": "area", "name": "Центральный округ" }
        ]);
        let point = HttpGeocoder::parse_response(&body).unwrap();
        assert_eq!(point.district.as_deref(), Some("Центральный округ"));
    }

    #[tokio::test]
    async fn null_geocoder_finds_nothing() {
        let result = NullGeocoder.geocode("ул. Ленина, 10").await.unwrap();
        assert_eq!(result, None);
    }
}
