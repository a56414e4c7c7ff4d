//! Device identity cache: IMEI to device-id resolution.
//!
//! Pull-through, whole-table cache. The snapshot is rebuilt wholesale from
//! the directory once it is older than the refresh delay, and swapped
//! atomically so readers never observe a partially built mapping. Correct
//! for small fleets; a lookup that lands on a stale snapshot pays for one
//! full directory reload.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::model::Device;
use crate::store::DeviceDirectory;

/// Default snapshot refresh delay (seconds).
pub const DEFAULT_REFRESH_SECS: u64 = 300;

struct Snapshot {
    devices: Arc<HashMap<String, Device>>,
    built_at: Instant,
}

/// IMEI-keyed device cache over an external directory.
pub struct DeviceCache {
    directory: Arc<dyn DeviceDirectory>,
    refresh_delay: Duration,
    snapshot: RwLock<Option<Snapshot>>,
    // Single-flight guard: one refresh at a time, waiters re-check.
    refresh_guard: Mutex<()>,
}

impl DeviceCache {
    pub fn new(directory: Arc<dyn DeviceDirectory>, refresh_delay: Duration) -> Self {
        Self {
            directory,
            refresh_delay,
            snapshot: RwLock::new(None),
            refresh_guard: Mutex::new(()),
        }
    }

    /// Resolve an IMEI to a device id.
    ///
    /// Rebuilds the snapshot first if it is absent or expired. Fails with
    /// `UnknownDevice` when the IMEI is missing from a fresh snapshot.
    pub async fn resolve(&self, imei: &str) -> Result<i64> {
        let devices = match self.fresh_snapshot() {
            Some(devices) => devices,
            None => self.refresh().await?,
        };

        devices
            .get(imei)
            .map(|device| device.id)
            .ok_or_else(|| AppError::UnknownDevice(imei.to_string()))
    }

    /// Resolve an IMEI, registering it with the directory if unknown.
    ///
    /// A brand-new IMEI triggers exactly one `create_device` call; repeated
    /// logins resolve to the same id from the refreshed snapshot.
    pub async fn ensure_registered(&self, imei: &str) -> Result<i64> {
        match self.resolve(imei).await {
            Ok(id) => Ok(id),
            Err(AppError::UnknownDevice(_)) => {
                warn!("Unknown device {imei}, registering");
                self.directory.create_device(imei).await?;
                self.invalidate();
                let devices = self.refresh().await?;
                devices
                    .get(imei)
                    .map(|device| device.id)
                    .ok_or_else(|| AppError::UnknownDevice(imei.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Drop the snapshot so the next resolve reloads from the directory.
    pub fn invalidate(&self) {
        *self.snapshot.write().unwrap() = None;
    }

    fn fresh_snapshot(&self) -> Option<Arc<HashMap<String, Device>>> {
        let guard = self.snapshot.read().unwrap();
        guard
            .as_ref()
            .filter(|s| s.built_at.elapsed() < self.refresh_delay)
            .map(|s| Arc::clone(&s.devices))
    }

    async fn refresh(&self) -> Result<Arc<HashMap<String, Device>>> {
        let _flight = self.refresh_guard.lock().await;

        // Another caller may have finished a rebuild while we waited.
        if let Some(devices) = self.fresh_snapshot() {
            return Ok(devices);
        }

        let list = self.directory.list_devices().await?;
        debug!("Rebuilt device snapshot: {} devices", list.len());

        let devices: Arc<HashMap<String, Device>> = Arc::new(
            list.into_iter()
                .map(|device| (device.imei.clone(), device))
                .collect(),
        );

        *self.snapshot.write().unwrap() = Some(Snapshot {
            devices: Arc::clone(&devices),
            built_at: Instant::now(),
        });

        Ok(devices)
    }
}
