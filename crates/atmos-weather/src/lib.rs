//! Weather lookups for Atmos
//!
//! Geocoding, timezone resolution and hourly forecasts, each remote call
//! wrapped in a shared retry policy and the results kept in TTL caches.

pub mod cache;
pub mod forecast;
pub mod geocode;
pub mod provider;
pub mod retry;
pub mod timezone;
pub mod types;

pub use cache::TtlCache;
pub use forecast::{ForecastFetcher, OpenMeteoClient};
pub use geocode::{GeocodeResolver, NominatimGeocoder};
pub use provider::{ForecastProvider, ForecastRequest, GeocodingProvider};
pub use retry::{RetryDecision, RetryError, RetryExecutor, RetryPolicy, Retryable};
pub use timezone::{PolygonLookup, TimezoneLookup, TimezoneResolver};
pub use types::*;
