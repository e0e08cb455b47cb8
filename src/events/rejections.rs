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

use crate::events::timestamp;
use crate::events::track::TrackPayload;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json;

/// Only the timestamp, to check it on its own
#[derive(Deserialize)]
struct TimestampOnly {
    #[serde(default, deserialize_with = "timestamp::deserialize")]
    #[allow(dead_code)]
    ts: Option<DateTime<Utc>>,
}

/// Checks a single field of a payload and explains what is wrong with it
fn explain_field(key: &str, value: &serde_json::Value) -> Option<String> {
    match key {
        "event" | "url" | "ref" => match value {
            serde_json::Value::String(_) | serde_json::Value::Null => None,
            other => Some(format!("{}: expected a string, got {}", key, other)),
        },
        "ts" => serde_json::from_value::<TimestampOnly>(serde_json::json!({ "ts": value }))
            .err()
            .map(|e| format!("ts: {}", e)),
        "props" => match value {
            serde_json::Value::Object(_) | serde_json::Value::Null => None,
            other => Some(format!("props: expected an object, got {}", other)),
        },
        _ => None,
    }
}

/// Attempts to explain why a payload is being rejected, with log-friendly messages
pub fn explain_rejection(payload: &str) -> Vec<String> {
    let generic_json = match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(j) => j,
        Err(e) => return vec!(format!("(1) invalid JSON structure: {}", e)),
    };

    let mut messages: Vec<String> = vec!();
    match TrackPayload::from_body(payload) {
        Ok(_) => return vec!(),
        Err(e) => messages.push(e.to_string()),
    }

    match generic_json.as_object() {
        Some(generic_map) => messages.extend(
            ["event", "ts", "url", "ref", "props"].iter()
                .filter_map(|key| generic_map.get(*key).map(|value| (key, value)))
                .filter_map(|(key, value)| explain_field(key, value))
        ),
        None => messages.push("root element is not a map".into()),
    }

    messages.iter().enumerate()
        .map(|(i, m)| format!("({}) {}", i + 1, m))
        .collect::<Vec<String>>()
}
