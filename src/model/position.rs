//! Decoded position report and protocol-specific extended attributes.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One normalized location report produced by a protocol decoder.
///
/// Immutable after the decoder hands it off. A position whose `device_id`
/// is still `None` must be dropped before it reaches the sink.
#[derive(Debug, Clone, Serialize)]
pub struct Position {
    /// Resolved internal device id, if identity resolution succeeded.
    pub device_id: Option<i64>,
    /// Fix time as reported by the device, UTC.
    pub time: DateTime<Utc>,
    /// GPS fix validity flag.
    pub valid: bool,
    /// Degrees, signed (negative = south).
    pub latitude: f64,
    /// Degrees, signed (negative = west).
    pub longitude: f64,
    /// Knots.
    pub speed: f64,
    /// Degrees, [0, 360).
    pub course: f64,
    /// Meters. Zero for protocols that do not transmit altitude.
    pub altitude: f64,
    /// Protocol-specific attributes, insertion-ordered.
    pub extended_info: ExtendedInfo,
}

/// Ordered key/value attribute set tagged with the originating protocol.
///
/// Keys are unique within one event; `set` on an existing key replaces the
/// value in place so the serialized form stays stable for diffing.
#[derive(Debug, Clone, Serialize)]
pub struct ExtendedInfo {
    protocol: &'static str,
    attributes: Vec<(&'static str, String)>,
}

impl ExtendedInfo {
    pub fn new(protocol: &'static str) -> Self {
        Self {
            protocol,
            attributes: Vec::new(),
        }
    }

    /// Protocol name this event originated from.
    pub fn protocol(&self) -> &'static str {
        self.protocol
    }

    /// Set an attribute, replacing any previous value for the same key.
    pub fn set(&mut self, key: &'static str, value: impl ToString) {
        let value = value.to_string();
        if let Some(entry) = self.attributes.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.attributes.push((key, value));
        }
    }

    /// Look up an attribute by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl std::fmt::Display for ExtendedInfo {
    /// Stable self-describing serialization, insertion order preserved.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<info><protocol>{}</protocol>", self.protocol)?;
        for (key, value) in &self.attributes {
            write!(f, "<{key}>{value}</{key}>")?;
        }
        write!(f, "</info>")
    }
}
