use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Kind of interaction recorded by the tracking script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    View,
    Scroll,
    Click,
    Download,
    Signature,
    Exit,
}

impl EventType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Scroll => "scroll",
            Self::Click => "click",
            Self::Download => "download",
            Self::Signature => "signature",
            Self::Exit => "exit",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "view" => Some(Self::View),
            "scroll" => Some(Self::Scroll),
            "click" => Some(Self::Click),
            "download" => Some(Self::Download),
            "signature" => Some(Self::Signature),
            "exit" => Some(Self::Exit),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
}

impl DeviceType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
            Self::Tablet => "tablet",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "desktop" => Some(Self::Desktop),
            "mobile" => Some(Self::Mobile),
            "tablet" => Some(Self::Tablet),
            _ => None,
        }
    }
}

/// Coarse viewer location attached by the tracking script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

/// Inbound event exactly as the tracking script or persistence store hands it over.
///
/// Nothing here is trusted: the timestamp is an unparsed string and the type and
/// device are free text. Every field deserializes leniently, so a field of the
/// wrong JSON type comes through empty instead of rejecting the whole payload.
/// [`crate::ingest::cleaner::clean_events`] turns these into validated [`Event`]s.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    #[serde(rename = "type", default, deserialize_with = "lenient::string")]
    pub event_type: String,
    #[serde(default, deserialize_with = "lenient::timestamp")]
    pub timestamp: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub session_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub visitor_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub proposal_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub section: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_number")]
    pub scroll_depth: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_number")]
    pub time_on_page: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub device_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub browser_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::location")]
    pub location: Option<Location>,
    #[serde(default, deserialize_with = "lenient::object")]
    pub metadata: Map<String, Value>,
}

impl RawEvent {
    /// Read one event out of arbitrary JSON. Anything that is not an object
    /// becomes an empty event, which the cleaner then drops as malformed.
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }

    /// User-Agent recorded in `metadata.userAgent`, if any.
    pub fn user_agent(&self) -> Option<&str> {
        self.metadata.get("userAgent").and_then(Value::as_str)
    }
}

/// Deserialize a list of events one by one with [`RawEvent::from_value`].
pub fn deserialize_events<'de, D>(deserializer: D) -> Result<Vec<RawEvent>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Vec::<Value>::deserialize(deserializer)?;
    Ok(values.into_iter().map(RawEvent::from_value).collect())
}

/// [`deserialize_events`] for an optional list; `null` reads as absent.
pub fn deserialize_opt_events<'de, D>(deserializer: D) -> Result<Option<Vec<RawEvent>>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<Value>>::deserialize(deserializer)?;
    Ok(values.map(|values| values.into_iter().map(RawEvent::from_value).collect()))
}

/// Per-field deserializers that map wrong types and `null` to an empty value.
mod lenient {
    use super::Location;
    use chrono::DateTime;
    use serde::{Deserialize, Deserializer};
    use serde_json::{Map, Value};

    fn text(value: Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(Value::deserialize(d).map(text)?.unwrap_or_default())
    }

    pub fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Value::deserialize(d).map(text)
    }

    /// Strings pass through; integers are epoch milliseconds.
    pub fn timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::String(s) => s,
            Value::Number(n) => n
                .as_i64()
                .and_then(DateTime::from_timestamp_millis)
                .map(|ts| ts.to_rfc3339())
                .unwrap_or_default(),
            _ => String::new(),
        })
    }

    pub fn opt_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        })
    }

    pub fn location<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Location>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Object(map) => {
                let field = |key: &str| map.get(key).cloned().and_then(text);
                Some(Location {
                    country: field("country"),
                    region: field("region"),
                    city: field("city"),
                })
            }
            _ => None,
        })
    }

    pub fn object<'de, D: Deserializer<'de>>(d: D) -> Result<Map<String, Value>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Object(map) => map,
            _ => Map::new(),
        })
    }
}

/// A validated interaction event.
///
/// Every `Event` has a known type, a parsed UTC timestamp and a non-empty session id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub visitor_id: Option<String>,
    pub proposal_id: Option<String>,
    pub user_id: Option<String>,
    pub section: Option<String>,
    pub scroll_depth: Option<f64>,
    pub time_on_page: Option<f64>,
    pub device_type: Option<DeviceType>,
    pub browser_type: Option<String>,
    pub location: Option<Location>,
    pub metadata: Map<String, Value>,
}

impl Event {
    /// Validate a raw event. Returns `None` when the type is unknown, the timestamp
    /// does not parse, or the session id is missing.
    pub fn from_raw(raw: RawEvent) -> Option<Self> {
        let event_type = EventType::parse(raw.event_type.trim())?;
        let timestamp = parse_timestamp(&raw.timestamp)?;
        let session_id = raw.session_id.filter(|s| !s.trim().is_empty())?;

        Some(Self {
            event_type,
            timestamp,
            session_id,
            visitor_id: raw.visitor_id,
            proposal_id: raw.proposal_id,
            user_id: raw.user_id,
            section: raw.section,
            scroll_depth: raw.scroll_depth,
            time_on_page: raw.time_on_page,
            device_type: raw.device_type.as_deref().and_then(DeviceType::parse),
            browser_type: raw.browser_type,
            location: raw.location,
            metadata: raw.metadata,
        })
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.metadata.get("userAgent").and_then(Value::as_str)
    }

    /// Key identifying the person behind the event: user id, then visitor id.
    pub fn person_key(&self) -> &str {
        self.user_id
            .as_deref()
            .or(self.visitor_id.as_deref())
            .unwrap_or("anonymous")
    }

    /// Key used for unique-visitor counts: visitor id, then session id.
    pub fn visitor_or_session(&self) -> &str {
        self.visitor_id.as_deref().unwrap_or(&self.session_id)
    }

    /// Country from the top-level location, falling back to `metadata.location.country`.
    pub fn country(&self) -> Option<&str> {
        self.location
            .as_ref()
            .and_then(|l| l.country.as_deref())
            .or_else(|| {
                self.metadata
                    .get("location")
                    .and_then(|l| l.get("country"))
                    .and_then(Value::as_str)
            })
    }

    pub fn is(&self, event_type: EventType) -> bool {
        self.event_type == event_type
    }
}

/// Parse an ISO-8601 timestamp.
///
/// Accepts RFC 3339 with an offset, a naive date-time (read as UTC), or a bare date
/// (midnight UTC).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
