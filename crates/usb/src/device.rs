//! Emulated USB device
//!
//! A [`Device`] is what discovery hands out: bus and port numbers, the
//! descriptor populated from the host's device information, and a weak link
//! back to the context that registered it. Devices are shared through
//! `Arc`; handles keep them alive while open.

use crate::context::ContextInner;
use crate::handle::DeviceHandle;
use protocol::{DeviceDescriptor, DeviceSpeed, UsbError, UsbResult};
use std::ops::Index;
use std::sync::{Arc, Mutex, PoisonError, Weak};

pub struct Device {
    bus_number: u8,
    port_number: u8,
    descriptor: Mutex<DeviceDescriptor>,
    context: Weak<ContextInner>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("bus_number", &self.bus_number)
            .field("port_number", &self.port_number)
            .field("descriptor", &self.descriptor())
            .finish()
    }
}

impl Device {
    pub(crate) fn new(
        context: Weak<ContextInner>,
        bus_number: u8,
        port_number: u8,
        descriptor: DeviceDescriptor,
    ) -> Self {
        Self {
            bus_number,
            port_number,
            descriptor: Mutex::new(descriptor),
            context,
        }
    }

    pub fn bus_number(&self) -> u8 {
        self.bus_number
    }

    pub fn port_number(&self) -> u8 {
        self.port_number
    }

    /// Port path from the root hub, written into `ports`
    ///
    /// The emulated device sits directly on a root port, so the path has
    /// one element.
    pub fn port_numbers(&self, ports: &mut [u8]) -> UsbResult<usize> {
        let Some(first) = ports.first_mut() else {
            return Err(UsbError::InvalidParam);
        };
        *first = self.port_number;
        Ok(1)
    }

    /// The host does not report link speed; SuperSpeed is assumed
    pub fn speed(&self) -> DeviceSpeed {
        DeviceSpeed::Super
    }

    pub fn descriptor(&self) -> DeviceDescriptor {
        *self
            .descriptor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn update_descriptor(&self, descriptor: DeviceDescriptor) {
        *self
            .descriptor
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = descriptor;
    }

    /// Context that registered this device, if it still exists
    pub(crate) fn context(&self) -> UsbResult<Arc<ContextInner>> {
        self.context.upgrade().ok_or(UsbError::NoDevice)
    }

    /// Open a session on this device
    pub async fn open(self: &Arc<Self>) -> UsbResult<DeviceHandle> {
        DeviceHandle::open(self.clone()).await
    }
}

/// Result of device discovery
#[derive(Debug, Default, Clone)]
pub struct DeviceList {
    devices: Vec<Arc<Device>>,
}

impl DeviceList {
    pub(crate) fn new(devices: Vec<Arc<Device>>) -> Self {
        Self { devices }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<Device>> {
        self.devices.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Device>> {
        self.devices.get(index)
    }

    pub fn into_vec(self) -> Vec<Arc<Device>> {
        self.devices
    }
}

impl Index<usize> for DeviceList {
    type Output = Arc<Device>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.devices[index]
    }
}

impl IntoIterator for DeviceList {
    type Item = Arc<Device>;
    type IntoIter = std::vec::IntoIter<Arc<Device>>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.into_iter()
    }
}

impl<'a> IntoIterator for &'a DeviceList {
    type Item = &'a Arc<Device>;
    type IntoIter = std::slice::Iter<'a, Arc<Device>>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orphan() -> Device {
        Device::new(Weak::new(), 0, 1, DeviceDescriptor::default())
    }

    #[test]
    fn test_port_numbers() {
        let device = orphan();
        let mut ports = [0u8; 7];
        assert_eq!(device.port_numbers(&mut ports), Ok(1));
        assert_eq!(ports[0], 1);
        assert_eq!(device.port_numbers(&mut []), Err(UsbError::InvalidParam));
    }

    #[test]
    fn test_speed_is_super() {
        assert_eq!(orphan().speed(), DeviceSpeed::Super);
    }

    #[test]
    fn test_orphaned_device_has_no_context() {
        assert_eq!(orphan().context().err(), Some(UsbError::NoDevice));
    }

    #[test]
    fn test_update_descriptor() {
        let device = orphan();
        let updated = DeviceDescriptor::builder().vendor_id(0x1a6e).build();
        device.update_descriptor(updated);
        assert_eq!(device.descriptor().vendor_id, 0x1a6e);
    }
}
