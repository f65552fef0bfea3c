//! Open device sessions
//!
//! A [`DeviceHandle`] keeps its [`Device`] alive and tracks the interfaces it
//! has claimed. Every call that has to reach the device is a future awaited
//! on the host context; synchronous callers go through
//! [`common::HostHandle::block_on`].

use crate::device::Device;
use protocol::{ControlSetup, Direction, UsbError, UsbResult};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

struct HandleInner {
    device: Arc<Device>,
    claimed: Mutex<BTreeSet<u8>>,
}

/// Open session on a device
///
/// Clones refer to the same session; transfers hold one while in flight.
#[derive(Clone)]
pub struct DeviceHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("device", &self.inner.device)
            .field("claimed", &*self.claimed())
            .finish()
    }
}

impl DeviceHandle {
    /// Open and reset the device
    ///
    /// A failed reset is logged and otherwise ignored; a failed open is
    /// reported as [`UsbError::Io`].
    pub async fn open(device: Arc<Device>) -> UsbResult<Self> {
        debug!(
            bus = device.bus_number(),
            port = device.port_number(),
            "libusb_open"
        );
        let context = device.context()?;

        if let Err(e) = context.bridge.open().await {
            warn!("Failed to open device: {}", e);
            return Err(UsbError::Io);
        }
        if let Err(e) = context.bridge.reset().await {
            warn!("Reset after open failed: {}", e);
        }

        Ok(Self {
            inner: Arc::new(HandleInner {
                device,
                claimed: Mutex::new(BTreeSet::new()),
            }),
        })
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.inner.device
    }

    /// Close the session without waiting for the host
    pub fn close(self) {
        debug!("libusb_close");

        match self.inner.device.context() {
            Ok(context) => {
                let bridge = context.bridge.clone();
                context.host.spawn(async move {
                    if let Err(e) = bridge.close().await {
                        debug!("Close failed: {}", e);
                    }
                });
            }
            Err(_) => debug!("Context already released, nothing to close"),
        }
        self.claimed().clear();
    }

    pub async fn claim_interface(&self, interface: u8) -> UsbResult<()> {
        debug!(interface, "libusb_claim_interface");
        let context = self.inner.device.context()?;

        match context.bridge.claim_interface(interface).await {
            Ok(()) => {
                self.claimed().insert(interface);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to claim interface {}: {}", interface, e);
                Err(UsbError::Io)
            }
        }
    }

    pub async fn release_interface(&self, interface: u8) -> UsbResult<()> {
        debug!(interface, "libusb_release_interface");
        let context = self.inner.device.context()?;

        match context.bridge.release_interface(interface).await {
            Ok(()) => {
                self.claimed().remove(&interface);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to release interface {}: {}", interface, e);
                Err(UsbError::Io)
            }
        }
    }

    /// Interfaces currently claimed through this handle
    pub fn claimed_interfaces(&self) -> Vec<u8> {
        self.claimed().iter().copied().collect()
    }

    /// Reset the device
    ///
    /// Reported as successful even when the host fails the reset.
    pub async fn reset(&self) -> UsbResult<()> {
        debug!("libusb_reset_device");
        let context = self.inner.device.context()?;

        if let Err(e) = context.bridge.reset().await {
            warn!("Reset failed: {}", e);
        }
        Ok(())
    }

    /// Accepted and ignored; the host selects the configuration on open
    pub fn set_configuration(&self, configuration: i32) -> UsbResult<()> {
        debug!(configuration, "libusb_set_configuration ignored");
        Ok(())
    }

    /// Control transfer on endpoint 0
    ///
    /// The data stage direction comes from bit 7 of `request_type`. For IN
    /// requests up to `data.len()` bytes are read into `data`; for OUT
    /// requests `data` is sent. Returns the number of bytes transferred.
    /// `timeout` is accepted but the host enforces its own.
    pub async fn control_transfer(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &mut [u8],
        timeout: Duration,
    ) -> UsbResult<usize> {
        let setup = ControlSetup::new(request_type, request, value, index);
        debug!(
            ?setup,
            length = data.len(),
            timeout_ms = timeout.as_millis() as u64,
            "libusb_control_transfer"
        );
        let length = u16::try_from(data.len()).map_err(|_| UsbError::InvalidParam)?;
        let context = self.inner.device.context()?;

        match setup.direction {
            Direction::In => {
                let received = context
                    .bridge
                    .control_transfer_in(setup, length)
                    .await
                    .map_err(|e| {
                        warn!("Control transfer IN failed: {}", e);
                        UsbError::from(e)
                    })?;
                let n = received.len().min(data.len());
                data[..n].copy_from_slice(&received[..n]);
                Ok(n)
            }
            Direction::Out => context
                .bridge
                .control_transfer_out(setup, data.to_vec())
                .await
                .map_err(|e| {
                    warn!("Control transfer OUT failed: {}", e);
                    UsbError::from(e)
                }),
        }
    }

    /// Synchronous bulk transfer, not offered by the emulation
    pub fn bulk_transfer(
        &self,
        endpoint: u8,
        _data: &mut [u8],
        _timeout: Duration,
    ) -> UsbResult<usize> {
        debug!(endpoint, "libusb_bulk_transfer not supported");
        Err(UsbError::NotSupported)
    }

    /// Synchronous interrupt transfer, not offered by the emulation
    pub fn interrupt_transfer(
        &self,
        endpoint: u8,
        _data: &mut [u8],
        _timeout: Duration,
    ) -> UsbResult<usize> {
        debug!(endpoint, "libusb_interrupt_transfer not supported");
        Err(UsbError::NotSupported)
    }

    fn claimed(&self) -> MutexGuard<'_, BTreeSet<u8>> {
        self.inner
            .claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
