use crate::events::timestamp;

use chrono::{DateTime, Utc};
use serde::{de, Deserialize};
use serde_json;
use std::collections::HashMap;

/// Free-form event properties, stored as a JSON document
pub type Properties = HashMap<String, serde_json::Value>;

/// A track event, as sent to /track
/// Every field may be missing or null, as the beacon script and hand-written clients
/// are not always thorough
#[derive(Deserialize, Debug, Clone, Default)]
pub struct TrackPayload {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default, deserialize_with = "timestamp::deserialize")]
    pub ts: Option<DateTime<Utc>>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, rename = "ref")]
    pub referrer: Option<String>,
    #[serde(default)]
    pub props: Option<Properties>,
}

impl TrackPayload {
    /// Parses a request body, which must be a JSON object
    /// Anything after the closing brace other than whitespace is an error
    pub fn from_body(body: &str) -> serde_json::Result<Self> {
        let document: serde_json::Value = serde_json::from_str(body)?;
        if !document.is_object() {
            return Err(de::Error::custom("expected a JSON object"));
        }
        serde_json::from_value(document)
    }

    /// Fills in the blanks: an event without a timestamp happened when we received it
    pub fn normalize(self, received_at: DateTime<Utc>) -> EventRecord {
        EventRecord {
            event: self.event.unwrap_or_default(),
            timestamp: self.ts.unwrap_or(received_at),
            url: self.url.unwrap_or_default(),
            referrer: self.referrer.unwrap_or_default(),
            properties: self.props,
        }
    }
}

/// A normalised event, ready to be stored
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub event: String,
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub referrer: String,
    pub properties: Option<Properties>,
}

impl EventRecord {
    /// Properties as a JSON document, `null` when there are none
    pub fn properties_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.properties)
    }

    /// Reverse of properties_json, for rows read back from storage
    pub fn properties_from_json(json: Option<&str>) -> serde_json::Result<Option<Properties>> {
        match json {
            Some(document) => serde_json::from_str(document),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn received_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 4, 8, 0, 0).unwrap()
    }

    #[test]
    fn page_view_is_normalised() {
        let payload = TrackPayload::from_body(r#"{"event":"page_view","url":"/home","ref":""}"#).unwrap();
        let record = payload.normalize(received_at());

        assert_eq!(record.event, "page_view");
        assert_eq!(record.url, "/home");
        assert_eq!(record.referrer, "");
        assert_eq!(record.timestamp, received_at());
        assert_eq!(record.properties, None);
    }

    #[test]
    fn client_timestamp_is_kept() {
        let payload = TrackPayload::from_body(r#"{"event":"click","ts":"2024-01-02T03:04:05Z"}"#).unwrap();
        let record = payload.normalize(received_at());
        assert_eq!(record.timestamp, Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
    }

    #[test]
    fn zero_timestamp_is_replaced() {
        let payload = TrackPayload::from_body(r#"{"event":"click","ts":"0001-01-01T00:00:00Z"}"#).unwrap();
        assert_eq!(payload.normalize(received_at()).timestamp, received_at());
    }

    #[test]
    fn missing_and_null_fields_default_to_empty() {
        let record = TrackPayload::from_body(r#"{"event":null,"url":null}"#).unwrap().normalize(received_at());
        assert_eq!(record.event, "");
        assert_eq!(record.url, "");
        assert_eq!(record.referrer, "");

        let record = TrackPayload::from_body("{}").unwrap().normalize(received_at());
        assert_eq!(record.event, "");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let payload = TrackPayload::from_body(r#"{"event":"x","anonymousId":"abc"}"#).unwrap();
        assert_eq!(payload.event.as_deref(), Some("x"));
    }

    #[test]
    fn malformed_payloads_are_refused() {
        assert!(TrackPayload::from_body("{").is_err());
        assert!(TrackPayload::from_body("[]").is_err());
        assert!(TrackPayload::from_body("null").is_err());
        assert!(TrackPayload::from_body(r#"{"event": 12}"#).is_err());
        assert!(TrackPayload::from_body(r#"{"event": "x", "props": "nope"}"#).is_err());
        assert!(TrackPayload::from_body(r#"{"event": "x"} trailing"#).is_err());
    }

    #[test]
    fn only_whitespace_may_follow_the_object() {
        assert!(TrackPayload::from_body("{\"event\": \"x\"}\n  ").is_ok());
        assert!(TrackPayload::from_body(r#"{"event": "x"}{"event": "y"}"#).is_err());
    }

    #[test]
    fn properties_survive_serialisation() {
        let payload = TrackPayload::from_body(r#"{"event":"x","props":{"a":1,"b":"x","c":[true,null]}}"#).unwrap();
        let record = payload.normalize(received_at());

        let json = record.properties_json().unwrap();
        let back = EventRecord::properties_from_json(Some(&json)).unwrap().unwrap();
        assert_eq!(back.get("a"), Some(&json!(1)));
        assert_eq!(back.get("b"), Some(&json!("x")));
        assert_eq!(back.get("c"), Some(&json!([true, null])));
    }

    #[test]
    fn no_properties_is_json_null() {
        let record = TrackPayload::default().normalize(received_at());
        assert_eq!(record.properties_json().unwrap(), "null");
        assert_eq!(EventRecord::properties_from_json(Some("null")).unwrap(), None);
        assert_eq!(EventRecord::properties_from_json(None).unwrap(), None);
    }
}
