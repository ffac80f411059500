//! Coordinates to IANA timezone, offline.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tzf_rs::DefaultFinder;

use crate::types::{Coordinate, ResolveError, TimezoneInfo};

/// Pure zone lookup. `None` means the point has no named zone.
pub trait TimezoneLookup: Send + Sync {
    fn zone_at(&self, coordinate: Coordinate) -> Option<String>;
}

/// Polygon lookup over the bundled timezone boundary data.
pub struct PolygonLookup {
    finder: DefaultFinder,
}

impl PolygonLookup {
    pub fn new() -> Self {
        Self {
            finder: DefaultFinder::new(),
        }
    }
}

impl Default for PolygonLookup {
    fn default() -> Self {
        Self::new()
    }
}

impl TimezoneLookup for PolygonLookup {
    fn zone_at(&self, coordinate: Coordinate) -> Option<String> {
        let name = self
            .finder
            .get_tz_name(coordinate.longitude, coordinate.latitude);

        // Open ocean falls back to nautical Etc/GMT zones
        if name.is_empty() || name.starts_with("Etc/") {
            None
        } else {
            Some(name.to_string())
        }
    }
}

pub struct TimezoneResolver {
    lookup: Arc<dyn TimezoneLookup>,
}

impl TimezoneResolver {
    pub fn new(lookup: Arc<dyn TimezoneLookup>) -> Self {
        Self { lookup }
    }

    /// Zone and current offset for `coordinate`.
    ///
    /// # Errors
    /// `TimezoneUnresolved` for invalid coordinates and points outside every zone.
    pub fn resolve(&self, coordinate: Coordinate) -> Result<TimezoneInfo, ResolveError> {
        self.resolve_at(coordinate, Utc::now())
    }

    /// Same as [`resolve`](Self::resolve) with an explicit clock reading.
    pub fn resolve_at(
        &self,
        coordinate: Coordinate,
        now: DateTime<Utc>,
    ) -> Result<TimezoneInfo, ResolveError> {
        if !coordinate.is_valid() {
            return Err(ResolveError::TimezoneUnresolved(coordinate));
        }

        let info = self
            .lookup
            .zone_at(coordinate)
            .and_then(|zone| TimezoneInfo::for_zone(&zone, now))
            .ok_or(ResolveError::TimezoneUnresolved(coordinate))?;

        tracing::debug!("Coordinate {} is in {}", coordinate, info.zone);
        Ok(info)
    }
}
