use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DisplayFormat {
    #[default]
    Compact,
    Full,
}

impl DisplayFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayFormat::Compact => "compact",
            DisplayFormat::Full => "full",
        }
    }
}

/// Settings for one key or dial, as delivered by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct KeySettings {
    #[serde(rename = "placeId")]
    pub place_id: u64,
    pub format: DisplayFormat,
}

impl KeySettings {
    pub fn new(place_id: u64, format: DisplayFormat) -> Self {
        Self { place_id, format }
    }

    /// Parses a host settings object field by field. An unusable field falls
    /// back to its default without affecting the others.
    pub fn from_json(value: &Value) -> Self {
        let Some(fields) = value.as_object() else {
            return Self::default();
        };
        // Older profiles saved the place under `targetId`.
        let place_id = fields
            .get("placeId")
            .or_else(|| fields.get("targetId"))
            .map(parse_place_id)
            .unwrap_or(0);
        let format = fields.get("format").map(parse_format).unwrap_or_default();
        Self { place_id, format }
    }

    pub fn is_configured(&self) -> bool {
        self.place_id != 0
    }
}

// Unrecognised values render as compact.
fn parse_format(value: &Value) -> DisplayFormat {
    match value.as_str().map(str::trim) {
        Some(s) if s.eq_ignore_ascii_case("full") => DisplayFormat::Full,
        _ => DisplayFormat::Compact,
    }
}

// The property inspector stores text fields as strings, older profiles as numbers.
fn parse_place_id(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.trim().parse::<u64>().unwrap_or(0),
        _ => 0,
    }
}

/// Current settings for every live instance, keyed by host context id.
///
/// The coordinator reads from here rather than trusting settings captured when
/// a refresh was scheduled, since a `didReceiveSettings` may land in between.
#[derive(Default)]
pub struct SettingsCache {
    entries: Mutex<HashMap<String, KeySettings>>,
}

impl SettingsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, context: &str, settings: KeySettings) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(context.to_string(), settings);
        }
    }

    pub fn get(&self, context: &str) -> KeySettings {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(context).copied())
            .unwrap_or_default()
    }

    pub fn delete(&self, context: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(context);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
