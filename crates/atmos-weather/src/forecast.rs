//! Hourly forecasts from Open-Meteo, cached per rounded coordinate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::cache::TtlCache;
use crate::provider::{ForecastProvider, ForecastRequest};
use crate::retry::{RetryError, RetryExecutor};
use crate::types::{
    Coordinate, ForecastRecord, HourlySample, ResolveError, TimezoneInfo, WeatherCondition,
    WeatherError,
};

const OPEN_METEO_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    hourly: OpenMeteoHourly,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoHourly {
    time: Vec<String>,
    temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    weather_code: Vec<Option<i32>>,
}

impl OpenMeteoHourly {
    fn into_samples(self) -> Result<Vec<HourlySample>, WeatherError> {
        if self.temperature_2m.len() != self.time.len() {
            return Err(WeatherError::Parse(format!(
                "{} timestamps but {} temperatures",
                self.time.len(),
                self.temperature_2m.len()
            )));
        }

        let mut samples = Vec::with_capacity(self.time.len());
        for (i, (stamp, temperature)) in self.time.iter().zip(self.temperature_2m).enumerate() {
            // Hours the model has no value for are skipped
            let Some(temperature) = temperature else {
                continue;
            };
            let time = NaiveDateTime::parse_from_str(stamp, OPEN_METEO_TIME_FORMAT)
                .map_err(|e| WeatherError::Parse(format!("bad timestamp '{}': {}", stamp, e)))?;
            let code = self.weather_code.get(i).copied().flatten().unwrap_or(0);

            samples.push(HourlySample {
                time,
                temperature,
                condition: WeatherCondition::from_wmo_code(code),
            });
        }
        Ok(samples)
    }
}

/// Open-Meteo forecast client
#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    client: Arc<Client>,
    forecast_url: Url,
}

impl OpenMeteoClient {
    pub fn new(forecast_url: &str, user_agent: &str, timeout: Duration) -> Result<Self, WeatherError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;

        Ok(Self {
            client: Arc::new(client),
            forecast_url: Url::parse(forecast_url)?,
        })
    }
}

#[async_trait]
impl ForecastProvider for OpenMeteoClient {
    async fn hourly(&self, request: &ForecastRequest) -> Result<Vec<HourlySample>, WeatherError> {
        tracing::debug!(
            "Fetching forecast for {} in {}",
            request.coordinate,
            request.timezone
        );

        let response = self
            .client
            .get(self.forecast_url.clone())
            .query(&[
                ("latitude", request.coordinate.latitude.to_string()),
                ("longitude", request.coordinate.longitude.to_string()),
                ("hourly", "temperature_2m,weather_code".to_string()),
                ("timezone", request.timezone.clone()),
                ("forecast_days", request.days.to_string()),
            ])
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

        let body: OpenMeteoResponse = response
            .json()
            .await
            .map_err(|e| WeatherError::Parse(e.to_string()))?;

        body.hourly.into_samples()
    }
}

/// Forecast cache key: coordinate rounded to the configured precision
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ForecastKey {
    latitude: i64,
    longitude: i64,
    zone: String,
    days: u8,
}

/// Coordinate and zone to forecast, through a cache and the retry executor.
pub struct ForecastFetcher {
    provider: Arc<dyn ForecastProvider>,
    cache: TtlCache<ForecastKey, ForecastRecord>,
    retry: RetryExecutor,
    precision: u32,
    days: u8,
}

impl ForecastFetcher {
    pub fn new(
        provider: Arc<dyn ForecastProvider>,
        retry: RetryExecutor,
        ttl: Duration,
        precision: u32,
        days: u8,
    ) -> Self {
        Self {
            provider,
            cache: TtlCache::new(ttl),
            retry,
            precision,
            days: days.max(1),
        }
    }

    /// Forecast for `coordinate` in `timezone`.
    ///
    /// Nearby coordinates that round to the same key share one cached record.
    ///
    /// # Errors
    /// `ForecastUnavailable` once retries are spent, `Timeout` past the deadline.
    pub async fn fetch(
        &self,
        coordinate: Coordinate,
        timezone: &TimezoneInfo,
    ) -> Result<ForecastRecord, ResolveError> {
        if !coordinate.is_valid() {
            return Err(ResolveError::ForecastUnavailable {
                attempts: 0,
                source: WeatherError::InvalidCoordinate {
                    latitude: coordinate.latitude,
                    longitude: coordinate.longitude,
                },
            });
        }

        let (latitude, longitude) = coordinate.rounded(self.precision);
        let key = ForecastKey {
            latitude,
            longitude,
            zone: timezone.zone.clone(),
            days: self.days,
        };

        if let Some(hit) = self.cache.get(&key) {
            tracing::debug!("Forecast cache hit for {}", coordinate);
            return Ok(hit);
        }
        tracing::debug!("Forecast cache miss for {}", coordinate);

        let request = ForecastRequest {
            coordinate,
            timezone: timezone.zone.clone(),
            days: self.days,
        };

        let hourly = self
            .retry
            .execute(|| self.provider.hourly(&request))
            .await
            .map_err(|e| match e {
                RetryError::Permanent { attempts, source }
                | RetryError::Exhausted { attempts, source } => {
                    ResolveError::ForecastUnavailable { attempts, source }
                }
                RetryError::DeadlineExceeded { attempts, .. } => ResolveError::Timeout {
                    stage: "forecast",
                    attempts,
                },
            })?;

        let record = ForecastRecord {
            coordinate,
            timezone: timezone.clone(),
            hourly,
            fetched_at: Utc::now(),
        };

        tracing::info!(
            "Fetched {} hourly samples for {} ({})",
            record.hourly.len(),
            coordinate,
            timezone.zone
        );
        self.cache.insert(key, record.clone());
        Ok(record)
    }
}
