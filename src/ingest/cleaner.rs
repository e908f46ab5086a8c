use crate::config::EngineConfig;
use crate::ingest::event::{Event, RawEvent};
use chrono::{DateTime, Months, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static BOT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)bot|crawler|spider|scraper|headless").expect("bot pattern is valid")
});

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+\.\d+\.\d+").expect("version pattern is valid"));

/// The subset of engine configuration the cleaner cares about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleaningOptions {
    pub exclude_internal_traffic: bool,
    pub anonymize_data: bool,
}

impl From<&EngineConfig> for CleaningOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            exclude_internal_traffic: config.exclude_internal_traffic,
            anonymize_data: config.anonymize_data,
        }
    }
}

/// Validate, filter and optionally anonymize a batch of raw events.
///
/// An event is dropped when it carries a bot User-Agent (only with
/// `exclude_internal_traffic`), when its timestamp does not parse or falls outside
/// `[now - 1 year, now]`, or when its type or session id is missing. Nothing else
/// is ever dropped.
pub fn clean_events(raw: &[RawEvent], options: CleaningOptions, now: DateTime<Utc>) -> Vec<Event> {
    let mut bots = 0usize;
    let mut malformed = 0usize;
    let mut out_of_range = 0usize;

    let cleaned: Vec<Event> = raw
        .iter()
        .filter_map(|raw_event| {
            if options.exclude_internal_traffic && raw_event.user_agent().is_some_and(is_bot_user_agent)
            {
                bots += 1;
                return None;
            }
            let Some(event) = Event::from_raw(raw_event.clone()) else {
                malformed += 1;
                return None;
            };
            if !is_valid_timestamp(event.timestamp, now) {
                out_of_range += 1;
                return None;
            }
            Some(if options.anonymize_data {
                anonymize_event(event)
            } else {
                event
            })
        })
        .collect();

    tracing::debug!(
        received = raw.len(),
        retained = cleaned.len(),
        bots,
        malformed,
        out_of_range,
        "Cleaned event batch"
    );

    cleaned
}

/// Returns `true` when the User-Agent matches a known automation signature.
pub fn is_bot_user_agent(user_agent: &str) -> bool {
    BOT_RE.is_match(user_agent)
}

/// A timestamp is valid when it lies within the year leading up to `now`.
pub fn is_valid_timestamp(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let one_year_ago = now
        .checked_sub_months(Months::new(12))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    timestamp <= now && timestamp >= one_year_ago
}

/// Replace identifiers with their rolling hash, strip the IP and blur UA versions.
pub fn anonymize_event(mut event: Event) -> Event {
    event.visitor_id = event.visitor_id.map(hash_non_empty);
    event.user_id = event.user_id.map(hash_non_empty);
    event.metadata.remove("ip");
    if let Some(ua) = event.user_agent().map(anonymize_user_agent) {
        event.metadata.insert("userAgent".to_string(), Value::String(ua));
    }
    event
}

/// Deterministic 32-bit rolling hash (`h = h * 31 + unit` over UTF-16 code units),
/// rendered as the base-36 form of its absolute value.
pub fn hash_identifier(input: &str) -> String {
    let hash = input
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)));
    to_base36(u64::from(hash.unsigned_abs()))
}

fn hash_non_empty(id: String) -> String {
    if id.is_empty() {
        id
    } else {
        hash_identifier(&id)
    }
}

/// Replace dotted `major.minor.patch` versions with `x.x.x`.
pub fn anonymize_user_agent(user_agent: &str) -> String {
    VERSION_RE.replace_all(user_agent, "x.x.x").into_owned()
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        if let Some(c) = u32::try_from(value % 36)
            .ok()
            .and_then(|d| char::from_digit(d, 36))
        {
            digits.push(c);
        }
        value /= 36;
    }
    digits.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn raw_at(ts: DateTime<Utc>) -> RawEvent {
        RawEvent {
            event_type: "view".to_string(),
            timestamp: ts.to_rfc3339(),
            session_id: Some("s1".to_string()),
            visitor_id: Some("visitor-1".to_string()),
            user_id: Some("user-1".to_string()),
            ..RawEvent::default()
        }
    }

    fn with_ua(mut raw: RawEvent, ua: &str) -> RawEvent {
        raw.metadata
            .insert("userAgent".to_string(), Value::String(ua.to_string()));
        raw
    }

    #[test]
    fn test_bot_patterns() {
        assert!(is_bot_user_agent("Googlebot/2.1"));
        assert!(is_bot_user_agent("Mozilla/5.0 HeadlessChrome/120.0"));
        assert!(is_bot_user_agent("AhrefsCRAWLER"));
        assert!(is_bot_user_agent("my-spider"));
        assert!(is_bot_user_agent("data scraper"));
        assert!(!is_bot_user_agent("Mozilla/5.0 (Windows NT 10.0) Chrome/120.0"));
    }

    #[test]
    fn test_bots_dropped_only_when_excluding() {
        let events = vec![
            with_ua(raw_at(now() - Duration::hours(1)), "Googlebot/2.1"),
            with_ua(raw_at(now() - Duration::hours(1)), "Mozilla/5.0"),
        ];
        let excluding = CleaningOptions {
            exclude_internal_traffic: true,
            anonymize_data: false,
        };
        assert_eq!(clean_events(&events, excluding, now()).len(), 1);
        assert_eq!(
            clean_events(&events, CleaningOptions::default(), now()).len(),
            2
        );
    }

    #[test]
    fn test_timestamp_window() {
        assert!(is_valid_timestamp(now(), now()));
        assert!(is_valid_timestamp(now() - Duration::days(364), now()));
        assert!(!is_valid_timestamp(now() + Duration::seconds(1), now()));
        assert!(!is_valid_timestamp(now() - Duration::days(367), now()));
    }

    #[test]
    fn test_out_of_range_and_malformed_dropped() {
        let mut malformed = raw_at(now());
        malformed.session_id = None;
        let events = vec![
            raw_at(now() - Duration::days(400)),
            raw_at(now() + Duration::days(1)),
            malformed,
            raw_at(now() - Duration::minutes(5)),
        ];
        let cleaned = clean_events(&events, CleaningOptions::default(), now());
        assert_eq!(cleaned.len(), 1);
    }

    #[test]
    fn test_hash_identifier_known_values() {
        assert_eq!(hash_identifier(""), "0");
        assert_eq!(hash_identifier("a"), "2p");
        assert_eq!(hash_identifier("ab"), "2e9");
        assert_eq!(hash_identifier("visitor-1"), hash_identifier("visitor-1"));
        assert_ne!(hash_identifier("visitor-1"), hash_identifier("visitor-2"));
    }

    #[test]
    fn test_hash_identifier_wraps() {
        // Long inputs overflow i32 many times over; the output stays base-36.
        let hashed = hash_identifier(&"x".repeat(500));
        assert!(hashed.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_anonymize_user_agent() {
        assert_eq!(
            anonymize_user_agent("Chrome/120.0.6099.130 Safari/537.36"),
            "Chrome/x.x.x.130 Safari/537.36"
        );
        assert_eq!(anonymize_user_agent("Firefox/121.0"), "Firefox/121.0");
    }

    #[test]
    fn test_anonymize_event() {
        let mut raw = with_ua(raw_at(now()), "Agent/1.2.3");
        raw.metadata
            .insert("ip".to_string(), Value::String("10.0.0.1".to_string()));
        let options = CleaningOptions {
            exclude_internal_traffic: false,
            anonymize_data: true,
        };
        let cleaned = clean_events(&[raw], options, now());
        let event = &cleaned[0];
        assert_eq!(event.visitor_id.as_deref(), Some(hash_identifier("visitor-1").as_str()));
        assert_eq!(event.user_id.as_deref(), Some(hash_identifier("user-1").as_str()));
        assert!(!event.metadata.contains_key("ip"));
        assert_eq!(event.user_agent(), Some("Agent/x.x.x"));
    }

    #[test]
    fn test_anonymize_leaves_empty_ids() {
        let mut raw = raw_at(now());
        raw.visitor_id = Some(String::new());
        raw.user_id = None;
        let options = CleaningOptions {
            exclude_internal_traffic: false,
            anonymize_data: true,
        };
        let cleaned = clean_events(&[raw], options, now());
        assert_eq!(cleaned[0].visitor_id.as_deref(), Some(""));
        assert!(cleaned[0].user_id.is_none());
    }
}
