//! Caller-facing error taxonomy for the Atmos query pipeline.
//!
//! Every failure that leaves the orchestrator is one of these kinds:
//! - `user_message()` gives a response-shaped explanation for the person asking
//! - `kind()` gives a stable code for front-ends that branch on the failure
//! - `Display` keeps the underlying detail for logs

use thiserror::Error;

/// Errors returned by `answer`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    /// The location text matched nothing at the geocoding provider.
    #[error("Location not found: {0}")]
    LocationNotFound(String),

    /// The query named no place and the session has no earlier location.
    #[error("No location in query or session history")]
    NoLocationContext,

    /// The geocoding provider could not be reached after retrying.
    #[error("Geocoding provider unavailable after {attempts} attempt(s): {detail}")]
    ProviderUnavailable { attempts: u32, detail: String },

    /// The forecast provider could not be reached after retrying.
    #[error("Forecast unavailable after {attempts} attempt(s): {detail}")]
    ForecastUnavailable { attempts: u32, detail: String },

    /// A remote call or the whole pipeline ran past its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Query is empty")]
    EmptyQuery,
}

impl QueryError {
    /// Returns a user-friendly message suitable for a chat reply.
    pub fn user_message(&self) -> &'static str {
        match self {
            QueryError::LocationNotFound(_) => {
                "I don't know that place. Check the spelling or add the country."
            }
            QueryError::NoLocationContext => "Please tell me which city you mean.",
            QueryError::ProviderUnavailable { .. } => {
                "The location service is temporarily unavailable. Please try again later."
            }
            QueryError::ForecastUnavailable { .. } => {
                "The weather service is temporarily unavailable. Please try again later."
            }
            QueryError::Timeout(_) => "That took too long. Please try again.",
            QueryError::EmptyQuery => "Ask me about the weather somewhere, e.g. \"Weather in Berlin\".",
        }
    }

    /// Stable machine-readable code for this error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::LocationNotFound(_) => "location_not_found",
            QueryError::NoLocationContext => "no_location_context",
            QueryError::ProviderUnavailable { .. } => "provider_unavailable",
            QueryError::ForecastUnavailable { .. } => "forecast_unavailable",
            QueryError::Timeout(_) => "timeout",
            QueryError::EmptyQuery => "empty_query",
        }
    }

    /// Whether asking again later might succeed without the user changing anything.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            QueryError::ProviderUnavailable { .. }
                | QueryError::ForecastUnavailable { .. }
                | QueryError::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_kinds() -> Vec<QueryError> {
        vec![
            QueryError::LocationNotFound("Atlantis".into()),
            QueryError::NoLocationContext,
            QueryError::ProviderUnavailable {
                attempts: 5,
                detail: "503".into(),
            },
            QueryError::ForecastUnavailable {
                attempts: 5,
                detail: "timeout".into(),
            },
            QueryError::Timeout("pipeline".into()),
            QueryError::EmptyQuery,
        ]
    }

    #[test]
    fn test_user_messages_are_non_empty() {
        for err in all_kinds() {
            assert!(!err.user_message().is_empty(), "{:?}", err);
        }
    }

    #[test]
    fn test_kinds_are_distinct() {
        let mut kinds: Vec<_> = all_kinds().iter().map(QueryError::kind).collect();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(kinds.len(), all_kinds().len());
    }

    #[test]
    fn test_user_messages_distinguish_failure_causes() {
        let unknown_place = QueryError::LocationNotFound("Atlantis".into()).user_message();
        let down = QueryError::ForecastUnavailable {
            attempts: 3,
            detail: String::new(),
        }
        .user_message();
        let which_city = QueryError::NoLocationContext.user_message();

        assert!(unknown_place.contains("don't know that place"));
        assert!(down.contains("temporarily unavailable"));
        assert!(which_city.contains("which city"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(QueryError::Timeout("x".into()).is_transient());
        assert!(!QueryError::NoLocationContext.is_transient());
        assert!(!QueryError::LocationNotFound("x".into()).is_transient());
    }

    #[test]
    fn test_display_keeps_detail() {
        let err = QueryError::ProviderUnavailable {
            attempts: 4,
            detail: "connection reset".into(),
        };
        let text = err.to_string();
        assert!(text.contains("4 attempt"));
        assert!(text.contains("connection reset"));
    }
}
