use chrono::{DateTime, NaiveDateTime, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::retry::{is_retryable_error, is_retryable_status, RetryDecision, Retryable};

/// Weather condition categories mapped from WMO codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    #[default]
    Clear,
    PartlyCloudy,
    Cloudy,
    Fog,
    Drizzle,
    Rain,
    HeavyRain,
    Snow,
    Sleet,
    Thunderstorm,
}

impl WeatherCondition {
    /// Convert WMO weather code to WeatherCondition
    /// See: https://open-meteo.com/en/docs#weathervariables
    pub fn from_wmo_code(code: i32) -> Self {
        match code {
            0 => Self::Clear,
            1..=2 => Self::PartlyCloudy,
            3 => Self::Cloudy,
            45 | 48 => Self::Fog,
            51 | 53 | 55 => Self::Drizzle,
            56 | 57 => Self::Sleet, // Freezing drizzle
            61 | 63 | 80 => Self::Rain,
            65 | 81 | 82 => Self::HeavyRain,
            66 | 67 => Self::Sleet, // Freezing rain
            71 | 73 | 75 | 77 | 85 | 86 => Self::Snow,
            95 | 96 | 99 => Self::Thunderstorm,
            _ => Self::Clear,
        }
    }

    /// Lowercase phrase used inside replies
    pub fn description(&self) -> &'static str {
        match self {
            Self::Clear => "clear",
            Self::PartlyCloudy => "partly cloudy",
            Self::Cloudy => "cloudy",
            Self::Fog => "fog",
            Self::Drizzle => "drizzle",
            Self::Rain => "rain",
            Self::HeavyRain => "heavy rain",
            Self::Snow => "snow",
            Self::Sleet => "sleet",
            Self::Thunderstorm => "thunderstorm",
        }
    }
}

/// WGS84 position. Construct through [`Coordinate::new`] to get range checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, WeatherError> {
        let coordinate = Self {
            latitude,
            longitude,
        };
        if coordinate.is_valid() {
            Ok(coordinate)
        } else {
            Err(WeatherError::InvalidCoordinate {
                latitude,
                longitude,
            })
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Scaled integer form used for cache keys; `precision` is decimal places.
    pub fn rounded(&self, precision: u32) -> (i64, i64) {
        let scale = 10f64.powi(precision.min(9) as i32);
        (
            (self.latitude * scale).round() as i64,
            (self.longitude * scale).round() as i64,
        )
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.4}, {:.4})", self.latitude, self.longitude)
    }
}

/// Free-text place name with an optional country hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationQuery {
    pub text: String,
    pub country: Option<String>,
}

impl LocationQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            country: None,
        }
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        let country = country.into();
        self.country = if country.trim().is_empty() {
            None
        } else {
            Some(country)
        };
        self
    }

    /// Trimmed, lowercased, whitespace-collapsed form shared by all spellings of a place.
    pub fn cache_key(&self) -> String {
        let mut key = normalize(&self.text);
        if let Some(country) = self.country.as_deref().map(normalize) {
            if !country.is_empty() {
                key.push('|');
                key.push_str(&country);
            }
        }
        key
    }

    /// "City, Country" in title case, as sent to the geocoding provider.
    pub fn provider_query(&self) -> String {
        let city = title_case(&self.text);
        match self.country.as_deref().map(title_case) {
            Some(country) if !country.is_empty() => format!("{}, {}", city, country),
            _ => city,
        }
    }

    /// Place name for replies.
    pub fn label(&self) -> String {
        title_case(&self.text)
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// One ranked answer from the geocoding provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeMatch {
    pub coordinate: Coordinate,
    pub display_name: String,
}

/// Zone identifier and offset at the moment it was resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimezoneInfo {
    pub zone: String,
    pub utc_offset_seconds: i32,
    pub local_time: NaiveDateTime,
}

impl TimezoneInfo {
    /// Resolve an IANA zone name at `now`. Returns `None` for unknown names.
    pub fn for_zone(zone: &str, now: DateTime<Utc>) -> Option<Self> {
        let tz: chrono_tz::Tz = zone.parse().ok()?;
        let local = now.with_timezone(&tz);
        Some(Self {
            zone: tz.name().to_string(),
            utc_offset_seconds: local.offset().fix().local_minus_utc(),
            local_time: local.naive_local(),
        })
    }

    /// Fallback used when a coordinate has no zone.
    pub fn utc(now: DateTime<Utc>) -> Self {
        Self {
            zone: "UTC".to_string(),
            utc_offset_seconds: 0,
            local_time: now.naive_utc(),
        }
    }

    /// Offset formatted as `UTC+02:00`.
    pub fn offset_label(&self) -> String {
        let sign = if self.utc_offset_seconds < 0 { '-' } else { '+' };
        let total = self.utc_offset_seconds.unsigned_abs();
        format!("UTC{}{:02}:{:02}", sign, total / 3600, (total % 3600) / 60)
    }
}

/// Hourly forecast entry, timestamped in the forecast's local zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlySample {
    pub time: NaiveDateTime,
    pub temperature: f64,
    pub condition: WeatherCondition,
}

/// Forecast for one coordinate and zone. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub coordinate: Coordinate,
    pub timezone: TimezoneInfo,
    pub hourly: Vec<HourlySample>,
    pub fetched_at: DateTime<Utc>,
}

impl ForecastRecord {
    /// Up to `count` samples starting at the hour containing `now_local`.
    ///
    /// Falls back to the earliest samples when the forecast lies entirely in the past.
    pub fn upcoming(&self, now_local: NaiveDateTime, count: usize) -> &[HourlySample] {
        let start = self
            .hourly
            .iter()
            .position(|s| s.time + chrono::Duration::hours(1) > now_local)
            .unwrap_or(0);
        let end = (start + count).min(self.hourly.len());
        &self.hourly[start..end]
    }
}

/// Provider-level failures
#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Provider timed out")]
    Timeout,
    #[error("Provider unavailable: {0}")]
    Unavailable(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid coordinate: ({latitude}, {longitude})")]
    InvalidCoordinate { latitude: f64, longitude: f64 },
    #[error("Invalid provider URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Retryable for WeatherError {
    fn retry_decision(&self) -> RetryDecision {
        match self {
            WeatherError::Network(e) => is_retryable_error(e),
            WeatherError::Status { status, .. } => reqwest::StatusCode::from_u16(*status)
                .map(is_retryable_status)
                .unwrap_or(RetryDecision::NoRetry),
            WeatherError::Timeout | WeatherError::Unavailable(_) => RetryDecision::Retry,
            WeatherError::Parse(_)
            | WeatherError::InvalidCoordinate { .. }
            | WeatherError::InvalidUrl(_) => RetryDecision::NoRetry,
        }
    }
}

/// Stage failures surfaced by the resolvers
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("No match for location '{0}'")]
    LocationNotFound(String),
    #[error("No timezone for coordinate {0}")]
    TimezoneUnresolved(Coordinate),
    #[error("Geocoding failed after {attempts} attempt(s): {source}")]
    ProviderUnavailable {
        attempts: u32,
        #[source]
        source: WeatherError,
    },
    #[error("Forecast failed after {attempts} attempt(s): {source}")]
    ForecastUnavailable {
        attempts: u32,
        #[source]
        source: WeatherError,
    },
    #[error("{stage} deadline exceeded after {attempts} attempt(s)")]
    Timeout { stage: &'static str, attempts: u32 },
}
