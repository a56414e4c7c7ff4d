//! Storage boundary: device directory and position sink contracts.
//!
//! Persistent storage lives outside this crate. The server only talks to
//! these two contracts; the in-memory implementations back tests and the
//! default standalone binary.

mod memory;

pub use memory::{MemoryDirectory, MemorySink};

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Device, Position};

/// External registry of known devices.
///
/// Failures surface as `AppError::DirectoryUnavailable`; callers must treat
/// an unresolved device as "drop this frame's event" and keep the
/// connection open.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Full device list, used to rebuild the identity cache snapshot.
    async fn list_devices(&self) -> Result<Vec<Device>>;

    /// Register a previously unknown IMEI and return the new record.
    async fn create_device(&self, imei: &str) -> Result<Device>;
}

/// External store for decoded position reports.
#[async_trait]
pub trait PositionSink: Send + Sync {
    /// Persist one position and return its assigned id.
    async fn store(&self, position: &Position) -> Result<i64>;

    /// Point the device's "latest position" at a stored position.
    async fn update_latest_position(&self, device_id: i64, position_id: i64) -> Result<()>;
}
