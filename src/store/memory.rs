//! In-memory directory and sink implementations.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use tracing::info;

use super::{DeviceDirectory, PositionSink};
use crate::error::Result;
use crate::model::{Device, Position};

/// In-memory device registry with auto-incrementing ids.
pub struct MemoryDirectory {
    devices: Mutex<HashMap<String, Device>>,
    next_id: AtomicI64,
    list_calls: AtomicUsize,
    create_calls: AtomicUsize,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            list_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
        }
    }

    /// Pre-seed a device, returning its assigned id.
    pub fn seed(&self, imei: &str) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.devices
            .lock()
            .unwrap()
            .insert(imei.to_string(), Device::new(id, imei));
        id
    }

    /// Number of `list_devices` calls observed.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of `create_device` calls observed.
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceDirectory for MemoryDirectory {
    async fn list_devices(&self) -> Result<Vec<Device>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.devices.lock().unwrap().values().cloned().collect())
    }

    async fn create_device(&self, imei: &str) -> Result<Device> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut devices = self.devices.lock().unwrap();
        if let Some(existing) = devices.get(imei) {
            return Ok(existing.clone());
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let device = Device::new(id, imei);
        devices.insert(imei.to_string(), device.clone());
        Ok(device)
    }
}

/// In-memory position sink that logs each stored report as JSON.
#[derive(Default)]
pub struct MemorySink {
    positions: Mutex<Vec<Position>>,
    latest: Mutex<HashMap<i64, i64>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of positions stored so far.
    pub fn stored_count(&self) -> usize {
        self.positions.lock().unwrap().len()
    }

    /// Latest position id recorded for a device, if any.
    pub fn latest_for(&self, device_id: i64) -> Option<i64> {
        self.latest.lock().unwrap().get(&device_id).copied()
    }
}

#[async_trait]
impl PositionSink for MemorySink {
    async fn store(&self, position: &Position) -> Result<i64> {
        let mut positions = self.positions.lock().unwrap();
        positions.push(position.clone());
        let id = positions.len() as i64;
        if let Ok(json) = serde_json::to_string(position) {
            info!("Stored position {id}: {json}");
        }
        Ok(id)
    }

    async fn update_latest_position(&self, device_id: i64, position_id: i64) -> Result<()> {
        self.latest.lock().unwrap().insert(device_id, position_id);
        Ok(())
    }
}
