//! Turning free text into a structured lookup request.
//!
//! A language model or any other extractor can be plugged in through
//! [`IntentExtractor`]; [`KeywordIntentExtractor`] is the built-in rule set.

use atmos_weather::LocationQuery;

/// Structured form of a user query
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Intent {
    /// Place named in the query, if any
    pub location: Option<LocationQuery>,
}

pub trait IntentExtractor: Send + Sync {
    fn extract(&self, query: &str) -> Intent;
}

/// Words that introduce a place: "weather in Berlin", "how about Paris".
const LOCATION_MARKERS: &[&str] = &["in", "for", "at", "about"];

/// Words that can follow a marker without naming a place.
const NON_PLACE_WORDS: &[&str] = &[
    "now", "today", "tomorrow", "tonight", "later", "there", "here", "it", "this", "that",
    "the", "a", "an", "same", "place", "city", "morning", "afternoon", "evening", "night",
    "weekend", "week", "moment", "right", "currently", "weather", "forecast", "next", "hours",
];

/// Leading words dropped from a candidate place name.
const ARTICLES: &[&str] = &["the", "a", "an"];

/// Openers of a follow-up that names a place without a marker: "And Paris?".
const LEAD_INS: &[&str] = &[
    "and", "so", "then", "also", "what", "what's", "whats", "how", "how's", "about", "is", "it",
    "the", "weather", "forecast", "now",
];

/// Replies that are never a place, even capitalised.
const SMALL_TALK: &[&str] = &[
    "thanks", "thank", "you", "ok", "okay", "yes", "no", "hi", "hello", "hey", "great", "cool",
    "please", "bye", "sure", "nice",
];

/// Longest bare place name accepted without a marker word.
const MAX_BARE_PLACE_WORDS: usize = 3;

/// Rule-based extractor.
///
/// Scans marker words from the end of the query backwards and takes the
/// words up to the next marker as the place. Candidates made only of
/// temporal or filler words ("now", "tomorrow", "the weekend") are skipped,
/// so "How about now?" names no place. A trailing ", <country>" becomes the
/// country hint.
///
/// Without a usable marker, a short run of capitalised words after lead-ins
/// such as "and" or "what's" is taken as the place, so "And Paris?",
/// "Paris weather" and "Berlin?" still name a city.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordIntentExtractor;

impl KeywordIntentExtractor {
    fn place_from(words: &[&str]) -> Option<LocationQuery> {
        let mut words: Vec<&str> = words
            .iter()
            .map(|w| w.trim_matches(|c: char| matches!(c, '?' | '!' | '.' | ';' | ':' | '"')))
            .filter(|w| !w.is_empty())
            .collect();

        while words
            .first()
            .is_some_and(|w| ARTICLES.contains(&w.to_lowercase().as_str()))
        {
            words.remove(0);
        }

        while words.last().is_some_and(|w| is_non_place(w)) {
            words.pop();
        }

        if words.is_empty() || words.iter().all(|w| is_non_place(w)) {
            return None;
        }

        let text = words.join(" ");
        let text = text.trim_end_matches(',');

        let query = match text.rsplit_once(',') {
            Some((city, country)) if !city.trim().is_empty() => {
                LocationQuery::new(city.trim()).with_country(country.trim())
            }
            _ => LocationQuery::new(text.trim()),
        };
        Some(query)
    }

    fn bare_place(words: &[&str]) -> Option<LocationQuery> {
        let start = words
            .iter()
            .position(|w| !LEAD_INS.contains(&normalize(w).as_str()))?;

        let candidate: Vec<&str> = words[start..]
            .iter()
            .copied()
            .filter(|w| !normalize(w).is_empty())
            .collect();
        let place = Self::place_from(&candidate)?;

        let place_words: Vec<&str> = place.text.split_whitespace().collect();
        let bare = place_words.len() <= MAX_BARE_PLACE_WORDS
            && place_words.iter().all(|w| {
                w.chars().next().is_some_and(char::is_uppercase)
                    && !SMALL_TALK.contains(&normalize(w).as_str())
                    && !is_marker(w)
            });

        bare.then_some(place)
    }
}

/// Lowercase with surrounding punctuation removed.
fn normalize(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
        .to_lowercase()
}

fn is_non_place(word: &str) -> bool {
    let word = word.trim_matches(',').to_lowercase();
    NON_PLACE_WORDS.contains(&word.as_str())
}

fn is_marker(word: &str) -> bool {
    LOCATION_MARKERS.contains(&word.to_lowercase().as_str())
}

impl IntentExtractor for KeywordIntentExtractor {
    fn extract(&self, query: &str) -> Intent {
        let words: Vec<&str> = query.split_whitespace().collect();

        let mut end = words.len();
        for i in (0..words.len()).rev() {
            if !is_marker(words[i]) {
                continue;
            }
            if let Some(location) = Self::place_from(&words[i + 1..end]) {
                tracing::debug!("Extracted location '{}' from query", location.text);
                return Intent {
                    location: Some(location),
                };
            }
            end = i;
        }

        if let Some(location) = Self::bare_place(&words) {
            tracing::debug!("Taking bare '{}' as the location", location.text);
            return Intent {
                location: Some(location),
            };
        }

        Intent::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn place(query: &str) -> Option<LocationQuery> {
        KeywordIntentExtractor.extract(query).location
    }

    #[test]
    fn test_simple_place() {
        assert_eq!(place("Weather in Berlin"), Some(LocationQuery::new("Berlin")));
        assert_eq!(
            place("What's the weather like in New York?"),
            Some(LocationQuery::new("New York"))
        );
    }

    #[test]
    fn test_follow_up_with_place() {
        assert_eq!(place("How about Paris?"), Some(LocationQuery::new("Paris")));
    }

    #[test]
    fn test_follow_up_without_place() {
        assert_eq!(place("How about now?"), None);
        assert_eq!(place("And tomorrow?"), None);
        assert_eq!(place("what about the weekend"), None);
        assert_eq!(place("thanks!"), None);
    }

    #[test]
    fn test_country_hint() {
        assert_eq!(
            place("Forecast for Paris, Texas"),
            Some(LocationQuery::new("Paris").with_country("Texas"))
        );
    }

    #[test]
    fn test_temporal_words_are_trimmed() {
        assert_eq!(place("weather in Lyon today"), Some(LocationQuery::new("Lyon")));
        assert_eq!(
            place("forecast for Santiago in the morning"),
            Some(LocationQuery::new("Santiago"))
        );
        assert_eq!(
            place("what's it like at the moment in Oslo"),
            Some(LocationQuery::new("Oslo"))
        );
    }

    #[test]
    fn test_leading_article_dropped() {
        assert_eq!(place("weather in the Hague"), Some(LocationQuery::new("Hague")));
    }

    #[test]
    fn test_place_without_marker() {
        assert_eq!(place("And Paris?"), Some(LocationQuery::new("Paris")));
        assert_eq!(place("Paris weather"), Some(LocationQuery::new("Paris")));
        assert_eq!(place("Berlin?"), Some(LocationQuery::new("Berlin")));
        assert_eq!(place("and New York now"), Some(LocationQuery::new("New York")));
        assert_eq!(
            place("Paris, Texas?"),
            Some(LocationQuery::new("Paris").with_country("Texas"))
        );
    }

    #[test]
    fn test_small_talk_is_not_a_place() {
        assert_eq!(place("Thanks!"), None);
        assert_eq!(place("OK thank you"), None);
        assert_eq!(place("Is it raining?"), None);
        assert_eq!(place("What's the weather?"), None);
        assert_eq!(place("Tell me something about tomorrow"), None);
    }

    #[test]
    fn test_marker_at_end_is_ignored() {
        assert_eq!(place("what is it like in"), None);
    }
}
