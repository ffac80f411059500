use atmos_weather::{ForecastRecord, TimezoneInfo};

/// Reply text for a forecast, e.g.
/// `Weather in Berlin (Europe/Berlin, UTC+02:00): 12:00 18°C clear, 13:00 19°C cloudy.`
///
/// `timezone` is the zone as resolved for this turn; it picks which samples
/// count as upcoming even when `record` came from the cache.
pub fn compose_response(
    place: &str,
    record: &ForecastRecord,
    timezone: &TimezoneInfo,
    hours: usize,
) -> String {
    let header = format!(
        "Weather in {} ({}, {})",
        place,
        timezone.zone,
        timezone.offset_label()
    );

    let upcoming = record.upcoming(timezone.local_time, hours.max(1));
    if upcoming.is_empty() {
        return format!("{}: no hourly forecast is available right now.", header);
    }

    let readings = upcoming
        .iter()
        .map(|s| {
            format!(
                "{} {:.0}°C {}",
                s.time.format("%H:%M"),
                s.temperature,
                s.condition.description()
            )
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!("{}: {}.", header, readings)
}
