//! Query pipeline: session, geocode, timezone, forecast, reply.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use atmos_core::{Config, QueryError, RetryConfig};
use atmos_weather::{
    ForecastFetcher, ForecastProvider, GeocodeResolver, GeocodingProvider, NominatimGeocoder,
    OpenMeteoClient, PolygonLookup, ResolveError, RetryExecutor, RetryPolicy, TimezoneInfo,
    TimezoneLookup, TimezoneResolver,
};
use chrono::Utc;

use crate::intent::{IntentExtractor, KeywordIntentExtractor};
use crate::response::compose_response;
use crate::session::{KnownLocation, Session, SessionHandle, SessionStore};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);
pub const DEFAULT_PIPELINE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_COORDINATE_PRECISION: u32 = 2;
pub const DEFAULT_HOURS_IN_RESPONSE: usize = 6;

/// Build the backoff policy described by the `[retry]` config section.
pub fn retry_policy(config: &RetryConfig) -> RetryPolicy {
    RetryPolicy::new(
        config.max_attempts,
        Duration::from_millis(config.base_delay_ms),
        config.multiplier,
    )
    .with_jitter(Duration::from_millis(config.jitter_ms))
    .with_max_delay(Duration::from_millis(config.max_delay_ms))
    .with_deadline(Some(Duration::from_secs(config.deadline_secs)))
}

/// Map a stage failure to the caller-facing taxonomy.
fn to_query_error(err: ResolveError) -> QueryError {
    match err {
        ResolveError::LocationNotFound(text) => QueryError::LocationNotFound(text),
        ResolveError::ProviderUnavailable { attempts, source } => QueryError::ProviderUnavailable {
            attempts,
            detail: source.to_string(),
        },
        ResolveError::ForecastUnavailable { attempts, source } => QueryError::ForecastUnavailable {
            attempts,
            detail: source.to_string(),
        },
        ResolveError::Timeout { stage, attempts } => {
            QueryError::Timeout(format!("{} call after {} attempt(s)", stage, attempts))
        }
        // Handled by the UTC fallback before it can get here
        ResolveError::TimezoneUnresolved(coordinate) => QueryError::ForecastUnavailable {
            attempts: 0,
            detail: format!("no timezone for {}", coordinate),
        },
    }
}

pub struct OrchestratorBuilder {
    geocoding: Arc<dyn GeocodingProvider>,
    forecast: Arc<dyn ForecastProvider>,
    timezones: Option<Arc<dyn TimezoneLookup>>,
    intents: Arc<dyn IntentExtractor>,
    retry: RetryPolicy,
    cache_ttl: Duration,
    precision: u32,
    forecast_days: u8,
    pipeline_timeout: Duration,
    hours_in_response: usize,
}

impl OrchestratorBuilder {
    pub fn timezone_lookup(mut self, lookup: Arc<dyn TimezoneLookup>) -> Self {
        self.timezones = Some(lookup);
        self
    }

    pub fn intent_extractor(mut self, extractor: Arc<dyn IntentExtractor>) -> Self {
        self.intents = extractor;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn coordinate_precision(mut self, precision: u32) -> Self {
        self.precision = precision;
        self
    }

    pub fn forecast_days(mut self, days: u8) -> Self {
        self.forecast_days = days;
        self
    }

    pub fn pipeline_timeout(mut self, timeout: Duration) -> Self {
        self.pipeline_timeout = timeout;
        self
    }

    pub fn hours_in_response(mut self, hours: usize) -> Self {
        self.hours_in_response = hours;
        self
    }

    pub fn build(self) -> Orchestrator {
        let executor = RetryExecutor::new(self.retry);
        let timezones = self
            .timezones
            .unwrap_or_else(|| Arc::new(PolygonLookup::new()));

        Orchestrator {
            sessions: SessionStore::new(),
            intents: self.intents,
            geocoder: GeocodeResolver::new(self.geocoding, executor.clone(), self.cache_ttl),
            timezones: TimezoneResolver::new(timezones),
            forecasts: ForecastFetcher::new(
                self.forecast,
                executor,
                self.cache_ttl,
                self.precision,
                self.forecast_days,
            ),
            pipeline_timeout: self.pipeline_timeout,
            hours_in_response: self.hours_in_response,
        }
    }
}

/// Answers weather questions for many concurrent users.
///
/// Owns the session store and both caches for its whole lifetime; nothing
/// outside it can change a session.
pub struct Orchestrator {
    sessions: SessionStore,
    intents: Arc<dyn IntentExtractor>,
    geocoder: GeocodeResolver,
    timezones: TimezoneResolver,
    forecasts: ForecastFetcher,
    pipeline_timeout: Duration,
    hours_in_response: usize,
}

impl Orchestrator {
    pub fn builder(
        geocoding: Arc<dyn GeocodingProvider>,
        forecast: Arc<dyn ForecastProvider>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            geocoding,
            forecast,
            timezones: None,
            intents: Arc::new(KeywordIntentExtractor),
            retry: RetryPolicy::default(),
            cache_ttl: DEFAULT_CACHE_TTL,
            precision: DEFAULT_COORDINATE_PRECISION,
            forecast_days: 1,
            pipeline_timeout: DEFAULT_PIPELINE_TIMEOUT,
            hours_in_response: DEFAULT_HOURS_IN_RESPONSE,
        }
    }

    /// Wire the real Nominatim, Open-Meteo and polygon-lookup providers.
    pub fn from_config(config: &Config) -> Result<Self> {
        let request_timeout = Duration::from_secs(config.providers.request_timeout_secs);

        let geocoding = NominatimGeocoder::new(
            &config.providers.geocoding_url,
            &config.providers.user_agent,
            request_timeout,
        )
        .context("Failed to create geocoding client")?;

        let forecast = OpenMeteoClient::new(
            &config.providers.forecast_url,
            &config.providers.user_agent,
            request_timeout,
        )
        .context("Failed to create forecast client")?;

        Ok(Self::builder(Arc::new(geocoding), Arc::new(forecast))
            .retry_policy(retry_policy(&config.retry))
            .cache_ttl(Duration::from_secs(config.cache.ttl_secs))
            .coordinate_precision(config.cache.coordinate_precision)
            .forecast_days(config.forecast.days)
            .pipeline_timeout(Duration::from_secs(config.pipeline.timeout_secs))
            .hours_in_response(config.forecast.hours_in_response)
            .build())
    }

    /// Answer `query` within the (user, session) conversation.
    ///
    /// # Errors
    /// One of the [`QueryError`] kinds; raw provider errors never escape.
    #[tracing::instrument(skip_all, fields(user_id = %user_id, session_id = %session_id))]
    pub async fn answer(
        &self,
        user_id: &str,
        session_id: &str,
        query: &str,
    ) -> Result<String, QueryError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(QueryError::EmptyQuery);
        }

        let session = self.sessions.get_or_create(user_id, session_id);

        let result = match tokio::time::timeout(self.pipeline_timeout, self.run(&session, query)).await
        {
            Ok(result) => result,
            Err(_) => Err(QueryError::Timeout(format!(
                "pipeline exceeded {:?}",
                self.pipeline_timeout
            ))),
        };

        match &result {
            Err(e) if e.is_transient() => tracing::warn!(kind = e.kind(), "Query failed: {}", e),
            Err(e) => tracing::info!(kind = e.kind(), "Query not answerable: {}", e),
            Ok(_) => {}
        }
        result
    }

    async fn run(&self, session: &SessionHandle, query: &str) -> Result<String, QueryError> {
        let intent = self.intents.extract(query);

        let target = match intent.location {
            Some(location) => {
                let found = self
                    .geocoder
                    .resolve(&location)
                    .await
                    .map_err(to_query_error)?;
                KnownLocation {
                    label: location.label(),
                    coordinate: found.coordinate,
                }
            }
            None => {
                let known = self
                    .sessions
                    .last_known(session)
                    .ok_or(QueryError::NoLocationContext)?;
                tracing::debug!("Reusing session location {}", known.label);
                known
            }
        };

        let timezone = match self.timezones.resolve(target.coordinate) {
            Ok(tz) => tz,
            Err(e) => {
                tracing::warn!("{}; falling back to UTC", e);
                TimezoneInfo::utc(Utc::now())
            }
        };

        let record = self
            .forecasts
            .fetch(target.coordinate, &timezone)
            .await
            .map_err(to_query_error)?;

        let response = compose_response(&target.label, &record, &timezone, self.hours_in_response);
        self.sessions
            .append_turn(session, query, Some(target), &response);

        Ok(response)
    }

    /// Copy of a session's current state, if it exists.
    pub fn session(&self, user_id: &str, session_id: &str) -> Option<Session> {
        self.sessions
            .get(user_id, session_id)
            .map(|handle| handle.lock().clone())
    }

    /// Forget a session. Returns whether it existed.
    pub fn clear_session(&self, user_id: &str, session_id: &str) -> bool {
        self.sessions.clear(user_id, session_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atmos_weather::{Coordinate, WeatherError};

    #[test]
    fn test_retry_policy_from_config() {
        let policy = retry_policy(&RetryConfig::default());
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(200));
        assert_eq!(policy.jitter, Duration::from_millis(100));
        assert_eq!(policy.deadline, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_error_mapping_keeps_kind() {
        assert_eq!(
            to_query_error(ResolveError::LocationNotFound("Atlantis".into())),
            QueryError::LocationNotFound("Atlantis".into())
        );

        let mapped = to_query_error(ResolveError::ForecastUnavailable {
            attempts: 5,
            source: WeatherError::Timeout,
        });
        assert!(matches!(mapped, QueryError::ForecastUnavailable { attempts: 5, .. }));

        let mapped = to_query_error(ResolveError::ProviderUnavailable {
            attempts: 2,
            source: WeatherError::Status {
                status: 503,
                body: "busy".into(),
            },
        });
        assert_eq!(mapped.kind(), "provider_unavailable");

        let mapped = to_query_error(ResolveError::Timeout {
            stage: "geocoding",
            attempts: 1,
        });
        assert_eq!(mapped.kind(), "timeout");

        let mapped = to_query_error(ResolveError::TimezoneUnresolved(
            Coordinate::new(0.0, -140.0).unwrap(),
        ));
        assert_eq!(mapped.kind(), "forecast_unavailable");
    }

    #[test]
    fn test_from_config_builds_with_defaults() {
        let orchestrator = Orchestrator::from_config(&Config::default()).unwrap();
        assert_eq!(orchestrator.session_count(), 0);
        assert_eq!(orchestrator.hours_in_response, 6);
    }

    #[test]
    fn test_from_config_rejects_bad_url() {
        let mut config = Config::default();
        config.providers.forecast_url = "not a url".into();
        assert!(Orchestrator::from_config(&config).is_err());
    }
}
