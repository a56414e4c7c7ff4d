//! Device identity record.

use serde::{Deserialize, Serialize};

/// A registered tracking device.
///
/// Owned by the device directory; immutable once created. Decoders look
/// devices up by IMEI, never by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Internal device id assigned by the directory.
    pub id: i64,
    /// 15-digit hardware identifier used as the wire-level key.
    pub imei: String,
}

impl Device {
    pub fn new(id: i64, imei: impl Into<String>) -> Self {
        Self { id, imei: imei.into() }
    }
}
