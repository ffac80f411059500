//! Contracts for the remote services the resolvers depend on.
//!
//! Real HTTP implementations live next to their resolvers
//! ([`crate::geocode::NominatimGeocoder`], [`crate::forecast::OpenMeteoClient`]);
//! tests substitute doubles implementing the same traits.

use async_trait::async_trait;

use crate::types::{Coordinate, GeocodeMatch, HourlySample, LocationQuery, WeatherError};

/// Free text in, provider-ranked matches out. An empty list means no match.
#[async_trait]
pub trait GeocodingProvider: Send + Sync {
    async fn search(&self, query: &LocationQuery) -> Result<Vec<GeocodeMatch>, WeatherError>;
}

/// Parameters of one forecast request
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRequest {
    pub coordinate: Coordinate,
    /// IANA zone the samples should be timestamped in
    pub timezone: String,
    pub days: u8,
}

/// Hourly samples, ordered by time, for a coordinate and zone.
#[async_trait]
pub trait ForecastProvider: Send + Sync {
    async fn hourly(&self, request: &ForecastRequest) -> Result<Vec<HourlySample>, WeatherError>;
}
