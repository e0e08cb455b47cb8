/* webtics - a minimal, no-fuss analytics event collector
 * Copyright (C) 2024 Withings
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>. */

//! Client timestamps, as found in the `ts` field of tracked events

use chrono::{DateTime, TimeZone, Utc};
use serde::{de, Deserialize, Deserializer};

/// 0001-01-01T00:00:00Z in seconds since the Unix epoch, the usual "unset" value for clients
/// which always serialise a time
const YEAR_ONE: i64 = -62_135_596_800;

/// What can be found on the wire: RFC 3339 text or milliseconds since the epoch
#[derive(Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    Millis(i64),
    Text(String),
}

/// True for the values clients send when they have no timestamp to give
pub fn is_unset(timestamp: &DateTime<Utc>) -> bool {
    let seconds = timestamp.timestamp();
    timestamp.timestamp_subsec_nanos() == 0 && (seconds == 0 || seconds == YEAR_ONE)
}

/// Deserialises an optional client timestamp, zero values come out as None
pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let timestamp = match Option::<WireTimestamp>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(WireTimestamp::Millis(millis)) => Utc.timestamp_millis_opt(millis).single()
            .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {}", millis)))?,
        Some(WireTimestamp::Text(text)) => DateTime::parse_from_rfc3339(&text)
            .map_err(|e| de::Error::custom(format!("invalid timestamp {:?}: {}", text, e)))?
            .with_timezone(&Utc),
    };

    Ok(Some(timestamp).filter(|t| !is_unset(t)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Holder {
        #[serde(default, deserialize_with = "deserialize")]
        ts: Option<DateTime<Utc>>,
    }

    fn parse(value: serde_json::Value) -> Result<Option<DateTime<Utc>>, serde_json::Error> {
        serde_json::from_value::<Holder>(value).map(|h| h.ts)
    }

    #[test]
    fn rfc3339_is_converted_to_utc() {
        let ts = parse(json!({"ts": "2024-03-01T12:30:00+02:00"})).unwrap().unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap());
    }

    #[test]
    fn epoch_milliseconds_are_accepted() {
        let ts = parse(json!({"ts": 1_709_296_200_123_i64})).unwrap().unwrap();
        assert_eq!(ts.timestamp_millis(), 1_709_296_200_123);
    }

    #[test]
    fn missing_and_null_are_unset() {
        assert_eq!(parse(json!({})).unwrap(), None);
        assert_eq!(parse(json!({"ts": null})).unwrap(), None);
    }

    #[test]
    fn zero_values_are_unset() {
        assert_eq!(parse(json!({"ts": 0})).unwrap(), None);
        assert_eq!(parse(json!({"ts": "1970-01-01T00:00:00Z"})).unwrap(), None);
        assert_eq!(parse(json!({"ts": "0001-01-01T00:00:00Z"})).unwrap(), None);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse(json!({"ts": "yesterday"})).is_err());
        assert!(parse(json!({"ts": true})).is_err());
        assert!(parse(json!({"ts": {"at": 1}})).is_err());
    }
}
