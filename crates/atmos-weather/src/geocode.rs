//! Forward geocoding: place names to coordinates.
//! Uses Nominatim (OpenStreetMap) search by default - free, no API key required.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::cache::TtlCache;
use crate::provider::GeocodingProvider;
use crate::retry::{RetryError, RetryExecutor};
use crate::types::{Coordinate, GeocodeMatch, LocationQuery, ResolveError, WeatherError};

const RESULT_LIMIT: &str = "5";

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    display_name: String,
}

impl NominatimPlace {
    fn into_match(self) -> Result<GeocodeMatch, WeatherError> {
        let latitude: f64 = self
            .lat
            .parse()
            .map_err(|_| WeatherError::Parse(format!("bad latitude '{}'", self.lat)))?;
        let longitude: f64 = self
            .lon
            .parse()
            .map_err(|_| WeatherError::Parse(format!("bad longitude '{}'", self.lon)))?;

        Ok(GeocodeMatch {
            coordinate: Coordinate::new(latitude, longitude)?,
            display_name: self.display_name,
        })
    }
}

/// Nominatim search client
#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    client: Arc<Client>,
    search_url: Url,
}

impl NominatimGeocoder {
    pub fn new(search_url: &str, user_agent: &str, timeout: Duration) -> Result<Self, WeatherError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;

        Ok(Self {
            client: Arc::new(client),
            search_url: Url::parse(search_url)?,
        })
    }
}

#[async_trait]
impl GeocodingProvider for NominatimGeocoder {
    async fn search(&self, query: &LocationQuery) -> Result<Vec<GeocodeMatch>, WeatherError> {
        let q = query.provider_query();
        tracing::debug!("Geocoding '{}'", q);

        let response = self
            .client
            .get(self.search_url.clone())
            .query(&[("q", q.as_str()), ("format", "json"), ("limit", RESULT_LIMIT)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WeatherError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let places: Vec<NominatimPlace> = response
            .json()
            .await
            .map_err(|e| WeatherError::Parse(e.to_string()))?;

        // Unusable rows are skipped; only a response with no usable row fails
        let mut matches = Vec::with_capacity(places.len());
        let mut first_error = None;
        for place in places {
            match place.into_match() {
                Ok(found) => matches.push(found),
                Err(e) => {
                    tracing::warn!("Skipping unusable geocoding result: {}", e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) if matches.is_empty() => Err(e),
            _ => Ok(matches),
        }
    }
}

/// Location text to coordinates, through a cache and the retry executor.
pub struct GeocodeResolver {
    provider: Arc<dyn GeocodingProvider>,
    cache: TtlCache<String, GeocodeMatch>,
    retry: RetryExecutor,
}

impl GeocodeResolver {
    pub fn new(provider: Arc<dyn GeocodingProvider>, retry: RetryExecutor, ttl: Duration) -> Self {
        Self {
            provider,
            cache: TtlCache::new(ttl),
            retry,
        }
    }

    /// Resolve `query` to the provider's first-ranked match.
    ///
    /// Multiple matches are never re-ranked; the provider's order is the tie-break.
    ///
    /// # Errors
    /// `LocationNotFound` when the provider has no match (not retried),
    /// `ProviderUnavailable` once retries are spent, `Timeout` past the deadline.
    pub async fn resolve(&self, query: &LocationQuery) -> Result<GeocodeMatch, ResolveError> {
        let key = query.cache_key();
        if key.is_empty() {
            return Err(ResolveError::LocationNotFound(query.text.clone()));
        }

        if let Some(hit) = self.cache.get(&key) {
            tracing::debug!("Geocode cache hit for '{}'", key);
            return Ok(hit);
        }
        tracing::debug!("Geocode cache miss for '{}'", key);

        let matches = self
            .retry
            .execute(|| self.provider.search(query))
            .await
            .map_err(|e| match e {
                RetryError::Permanent { attempts, source }
                | RetryError::Exhausted { attempts, source } => {
                    ResolveError::ProviderUnavailable { attempts, source }
                }
                RetryError::DeadlineExceeded { attempts, .. } => ResolveError::Timeout {
                    stage: "geocoding",
                    attempts,
                },
            })?;

        let Some(first) = matches.into_iter().next() else {
            tracing::info!("No geocoding match for '{}'", query.provider_query());
            return Err(ResolveError::LocationNotFound(query.text.trim().to_string()));
        };

        tracing::info!(
            "Resolved '{}' to {} ({})",
            query.provider_query(),
            first.coordinate,
            first.display_name
        );
        self.cache.insert(key, first.clone());
        Ok(first)
    }

    /// Drop the cached answer for `query`.
    pub fn invalidate(&self, query: &LocationQuery) -> bool {
        self.cache.invalidate(&query.cache_key())
    }
}
