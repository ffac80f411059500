use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Longest retry deadline for a single remote call
pub const MAX_RETRY_DEADLINE_SECS: u64 = 3600;
/// Longest budget for answering one query
pub const MAX_PIPELINE_TIMEOUT_SECS: u64 = 24 * 3600;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub forecast: ForecastConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Lifetime of geocode and forecast entries, in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Decimal places kept when rounding coordinates into forecast cache keys
    #[serde(default = "default_coordinate_precision")]
    pub coordinate_precision: u32,
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_coordinate_precision() -> u32 {
    2
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            coordinate_precision: default_coordinate_precision(),
        }
    }
}

/// Backoff settings for every remote call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    /// Upper bound of the random jitter added to each delay
    pub jitter_ms: u64,
    pub max_delay_ms: u64,
    /// Overall deadline for one remote call including all its retries
    pub deadline_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 200,
            multiplier: 2.0,
            jitter_ms: 100,
            max_delay_ms: 5000,
            deadline_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Deadline for one whole `answer` call
    #[serde(default = "default_pipeline_timeout")]
    pub timeout_secs: u64,
}

fn default_pipeline_timeout() -> u64 {
    60
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_pipeline_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub geocoding_url: String,
    pub forecast_url: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            geocoding_url: "https://nominatim.openstreetmap.org/search".to_string(),
            forecast_url: "https://api.open-meteo.com/v1/forecast".to_string(),
            user_agent: "Atmos/0.1.0".to_string(),
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Number of days requested from the forecast provider
    pub days: u8,
    /// Hourly readings listed in a reply
    pub hours_in_response: usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            days: 1,
            hours_in_response: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            let config = Self::default();
            config.save_to(&config_path)?;
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Validation errors fail the load; warnings are returned for the caller
    /// to report once logging is up.
    pub fn load_validated(path: Option<&Path>) -> Result<(Self, ValidationResult)> {
        let config = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::load()?,
        };
        let validation = config.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        Ok((config, validation))
    }

    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        validate_url(
            &self.providers.geocoding_url,
            "providers.geocoding_url",
            &mut result,
        );
        validate_url(
            &self.providers.forecast_url,
            "providers.forecast_url",
            &mut result,
        );

        if self.providers.user_agent.trim().is_empty() {
            result.add_error(
                "providers.user_agent",
                "User agent is required by the geocoding provider",
            );
        }

        if self.retry.max_attempts == 0 {
            result.add_error("retry.max_attempts", "At least one attempt is required");
        } else if self.retry.max_attempts > 20 {
            result.add_warning("retry.max_attempts", "More than 20 attempts per call");
        }

        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            result.add_error("retry.multiplier", "Backoff multiplier must be >= 1.0");
        }

        if self.retry.deadline_secs == 0 {
            result.add_error("retry.deadline_secs", "Deadline must be greater than 0");
        } else if self.retry.deadline_secs > MAX_RETRY_DEADLINE_SECS {
            result.add_error(
                "retry.deadline_secs",
                format!("Deadline must be at most {} seconds", MAX_RETRY_DEADLINE_SECS),
            );
        }

        if self.pipeline.timeout_secs == 0 {
            result.add_error("pipeline.timeout_secs", "Timeout must be greater than 0");
        } else if self.pipeline.timeout_secs > MAX_PIPELINE_TIMEOUT_SECS {
            result.add_error(
                "pipeline.timeout_secs",
                format!("Timeout must be at most {} seconds", MAX_PIPELINE_TIMEOUT_SECS),
            );
        }

        if self.cache.ttl_secs == 0 {
            result.add_warning("cache.ttl_secs", "Caching disabled (0 seconds)");
        }

        if self.cache.coordinate_precision > 6 {
            result.add_warning(
                "cache.coordinate_precision",
                "Precision above 6 decimal places will rarely produce cache hits",
            );
        }

        if self.forecast.days == 0 || self.forecast.days > 16 {
            result.add_error("forecast.days", "Forecast days must be between 1 and 16");
        }

        if self.forecast.hours_in_response == 0 {
            result.add_error(
                "forecast.hours_in_response",
                "At least one hourly reading must be shown",
            );
        }

        result
    }

    /// Save configuration to an explicit file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the default configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("atmos");

        Ok(config_dir.join("config.toml"))
    }
}

fn validate_url(url_str: &str, field_name: &str, result: &mut ValidationResult) {
    match Url::parse(url_str) {
        Ok(url) => {
            if url.scheme() != "http" && url.scheme() != "https" {
                result.add_error(
                    field_name,
                    format!("URL must use http or https scheme, got: {}", url.scheme()),
                );
            }

            if url.host().is_none() {
                result.add_error(field_name, "URL must have a host");
            }
        }
        Err(e) => {
            result.add_error(field_name, format!("Invalid URL: {}", e));
        }
    }
}
