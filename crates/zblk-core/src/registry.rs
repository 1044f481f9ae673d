//! Process-wide device registry.
//!
//! An explicit registry struct rather than an implicit singleton: the
//! embedding process constructs one at startup, hands out `Arc<Device>`
//! handles, and drops the registry at shutdown.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::device::Device;
use crate::{Error, Result};

/// Collection of devices indexed by a small integer, kernel hot-add
/// style: adding without an index takes the lowest free one.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: RwLock<FxHashMap<u32, Arc<Device>>>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device at `index`, or at the lowest free index when `None`.
    ///
    /// Returns the new device, still uninitialized.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceExists`] if the index is taken.
    pub fn add(&self, index: Option<u32>) -> Result<Arc<Device>> {
        let mut devices = self.devices.write();
        let index = match index {
            Some(index) => {
                if devices.contains_key(&index) {
                    return Err(Error::DeviceExists(index));
                }
                index
            }
            None => (0..).find(|i| !devices.contains_key(i)).unwrap_or(0),
        };
        let device = Arc::new(Device::new(index));
        devices.insert(index, Arc::clone(&device));
        tracing::debug!(index, "device added");
        Ok(device)
    }

    /// Look up a device by index.
    #[must_use]
    pub fn get(&self, index: u32) -> Option<Arc<Device>> {
        self.devices.read().get(&index).cloned()
    }

    /// Remove and reset the device at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] for an unknown index and
    /// [`Error::Busy`] while the device is claimed.
    pub fn remove(&self, index: u32) -> Result<()> {
        let mut devices = self.devices.write();
        let device = devices.get(&index).ok_or(Error::DeviceNotFound(index))?;
        if device.is_claimed() {
            return Err(Error::Busy(format!("device {index} is claimed")));
        }
        device.reset()?;
        devices.remove(&index);
        tracing::debug!(index, "device removed");
        Ok(())
    }

    /// All devices, ordered by index.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<Device>> {
        let mut devices: Vec<_> = self.devices.read().values().cloned().collect();
        devices.sort_by_key(|d| d.index());
        devices
    }

    /// Number of registered devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}
