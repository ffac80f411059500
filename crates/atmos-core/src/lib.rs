pub mod config;
pub mod error;

pub use config::{
    CacheConfig, Config, ForecastConfig, LoggingConfig, PipelineConfig, ProvidersConfig,
    RetryConfig, ValidationResult,
};
pub use error::QueryError;

use anyhow::Result;

/// Initialize tracing/logging.
///
/// `RUST_LOG` wins over `default_level` when it is set.
pub fn init(default_level: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    tracing::debug!("Atmos logging initialized");
    Ok(())
}
