//! Library context
//!
//! The context is the root of the emulation: it owns the device registry,
//! the queue of finished transfers waiting for `handle_events`, and the
//! bridge and host handles every other object reaches through it.

use crate::bridge::HostBridge;
use crate::device::{Device, DeviceList};
use crate::transfer::{Transfer, TransferId};
use common::config::UsbSettings;
use common::{BlockingQueue, DeviceFilter, HostHandle};
use protocol::{LIBRARY_VERSION, LibraryVersion, UsbError, UsbResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Tunables of a context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextOptions {
    /// Per-item wait while draining completed transfers
    pub event_poll_timeout: Duration,
    /// Filters handed to the host when requesting a device
    pub filters: Vec<DeviceFilter>,
    /// Bus number reported for the device
    pub bus_number: u8,
    /// Port number reported for the device
    pub port_number: u8,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            event_poll_timeout: Duration::from_millis(25),
            filters: vec![DeviceFilter::new(0x18d1, 0x9302)],
            bus_number: 0,
            port_number: 1,
        }
    }
}

impl ContextOptions {
    pub fn from_settings(settings: &UsbSettings) -> common::Result<Self> {
        Ok(Self {
            event_poll_timeout: settings.event_poll_timeout(),
            filters: settings.device_filters()?,
            bus_number: settings.bus_number,
            port_number: settings.port_number,
        })
    }
}

pub(crate) struct ContextInner {
    pub(crate) bridge: Arc<dyn HostBridge>,
    pub(crate) host: HostHandle,
    pub(crate) options: ContextOptions,
    pub(crate) completed: BlockingQueue<Box<Transfer>>,
    devices: Mutex<HashMap<(u8, u8), Arc<Device>>>,
}

impl ContextInner {
    fn devices(&self) -> MutexGuard<'_, HashMap<(u8, u8), Arc<Device>>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Root handle of the emulated library
///
/// Clones share the same registry and completion queue.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("options", &self.inner.options)
            .field("pending_completions", &self.inner.completed.len())
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Create a context with default options
    pub fn init(bridge: Arc<dyn HostBridge>, host: HostHandle) -> UsbResult<Self> {
        Self::init_with_options(bridge, host, ContextOptions::default())
    }

    /// Create a context
    ///
    /// Fails with [`UsbError::NotSupported`] when the host has no device
    /// access capability.
    pub fn init_with_options(
        bridge: Arc<dyn HostBridge>,
        host: HostHandle,
        options: ContextOptions,
    ) -> UsbResult<Self> {
        debug!("libusb_init");

        if !bridge.is_available() {
            warn!("Host offers no device access");
            return Err(UsbError::NotSupported);
        }

        Ok(Self {
            inner: Arc::new(ContextInner {
                bridge,
                host,
                options,
                completed: BlockingQueue::new(),
                devices: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Release the registry and every completion not yet delivered
    ///
    /// Undelivered transfers are dropped without running their callbacks.
    pub fn exit(self) {
        debug!("libusb_exit");

        let dropped = self.inner.completed.drain();
        if !dropped.is_empty() {
            warn!(
                "Dropping {} completed transfers that were never handled",
                dropped.len()
            );
        }
        self.inner.devices().clear();
    }

    pub fn options(&self) -> &ContextOptions {
        &self.inner.options
    }

    pub fn host(&self) -> &HostHandle {
        &self.inner.host
    }

    /// Logged and otherwise ignored
    pub fn set_debug(&self, level: i32) {
        debug!(level, "libusb_set_debug ignored");
    }

    pub fn version() -> &'static LibraryVersion {
        &LIBRARY_VERSION
    }

    /// Ask the host for the device and record it in the registry
    ///
    /// The list holds zero or one device: the host either selects a single
    /// device matching the configured filters or none.
    pub async fn get_device_list(&self) -> UsbResult<DeviceList> {
        debug!("libusb_get_device_list");

        let info = match self
            .inner
            .bridge
            .request_device(&self.inner.options.filters)
            .await
        {
            Ok(Some(info)) => info,
            Ok(None) => {
                debug!("Host selected no device");
                return Ok(DeviceList::default());
            }
            Err(e) => {
                warn!("Device request failed: {}", e);
                return Ok(DeviceList::default());
            }
        };

        let key = (self.inner.options.bus_number, self.inner.options.port_number);
        let descriptor = info.descriptor();
        let device = {
            let mut devices = self.inner.devices();
            let device = devices.entry(key).or_insert_with(|| {
                Arc::new(Device::new(
                    Arc::downgrade(&self.inner),
                    key.0,
                    key.1,
                    descriptor,
                ))
            });
            device.update_descriptor(descriptor);
            device.clone()
        };

        info!(
            bus = device.bus_number(),
            port = device.port_number(),
            "USB device {:04x}:{:04x} (bcdUSB {:#06x}, class {:#04x}/{:#04x}/{:#04x}, bcdDevice {:#06x}, {} configuration(s)){}",
            descriptor.vendor_id,
            descriptor.product_id,
            descriptor.usb_version.0,
            descriptor.class,
            descriptor.subclass,
            descriptor.protocol,
            descriptor.device_version.0,
            descriptor.num_configurations,
            info.product_name
                .as_deref()
                .map(|p| format!(" \"{}\"", p))
                .unwrap_or_default()
        );

        Ok(DeviceList::new(vec![device]))
    }

    /// Deliver every finished transfer to its callback
    ///
    /// Waits up to the event poll timeout for each next completion and
    /// returns once the queue stays empty. On the host thread it only
    /// drains what is already queued, since completions cannot arrive
    /// while the host is blocked.
    pub fn handle_events(&self) -> UsbResult<()> {
        let timeout = self.inner.options.event_poll_timeout;
        let on_host = HostHandle::on_host_thread();
        let mut delivered = 0usize;

        loop {
            let next = if on_host {
                self.inner.completed.try_pop()
            } else {
                self.inner.completed.pop(timeout)
            };
            let Some(transfer) = next else {
                break;
            };
            transfer.deliver();
            delivered += 1;
        }

        trace!(delivered, "libusb_handle_events");
        Ok(())
    }

    /// Cancellation of in-flight transfers is not offered by the host
    pub fn cancel_transfer(&self, id: TransferId) -> UsbResult<()> {
        debug!(?id, "libusb_cancel_transfer not supported");
        Err(UsbError::NotSupported)
    }

    /// Device recorded at `(bus, port)`, if any
    pub fn device(&self, bus_number: u8, port_number: u8) -> Option<Arc<Device>> {
        self.inner
            .devices()
            .get(&(bus_number, port_number))
            .cloned()
    }

    /// Number of finished transfers waiting for `handle_events`
    pub fn pending_completions(&self) -> usize {
        self.inner.completed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::HostDeviceInfo;
    use crate::sim::SimulatedBridge;
    use common::HostRuntime;

    #[test]
    fn test_init_requires_host_capability() {
        let host = HostRuntime::start().unwrap();
        let bridge = Arc::new(SimulatedBridge::unavailable());
        assert_eq!(
            Context::init(bridge, host.handle()).unwrap_err(),
            UsbError::NotSupported
        );
    }

    #[test]
    fn test_options_from_settings() {
        let settings = UsbSettings::default();
        let options = ContextOptions::from_settings(&settings).unwrap();
        assert_eq!(options, ContextOptions::default());
    }

    #[test]
    fn test_device_list_registers_device() {
        let host = HostRuntime::start().unwrap();
        let bridge = Arc::new(SimulatedBridge::new().with_device(HostDeviceInfo::new(0x18d1, 0x9302)));
        let context = Context::init(bridge, host.handle()).unwrap();

        let list = {
            let context = context.clone();
            host.handle()
                .block_on(async move { context.get_device_list().await })
                .unwrap()
                .unwrap()
        };

        assert_eq!(list.len(), 1);
        let registered = context.device(0, 1).unwrap();
        assert!(Arc::ptr_eq(&registered, &list[0]));
        assert_eq!(registered.descriptor().vendor_id, 0x18d1);

        context.exit();
    }

    #[test]
    fn test_cancel_is_not_supported() {
        let host = HostRuntime::start().unwrap();
        let context = Context::init(Arc::new(SimulatedBridge::new()), host.handle()).unwrap();
        assert_eq!(
            context.cancel_transfer(TransferId(1)),
            Err(UsbError::NotSupported)
        );
    }
}
