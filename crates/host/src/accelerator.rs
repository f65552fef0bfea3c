//! USB accelerator over the libusb emulation
//!
//! [`UsbAccelerator`] discovers the accelerator through a [`usb::Context`]
//! and hands out [`UsbDelegate`]s. A delegate runs on the compute worker
//! thread: each invocation writes the input tensor to the bulk OUT endpoint,
//! reads the output tensor back from the bulk IN endpoint, and pumps
//! `handle_events` until both transfers have called back.

use async_channel::{Receiver, Sender};
use common::config::AcceleratorSettings;
use interpreter::{
    Accelerator, AcceleratorDevice, Delegate, DeviceKind, EngineError, EngineResult, Tensor,
};
use protocol::{TransferStatus, UsbError};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, trace, warn};
use usb::{Context, Device, DeviceHandle, Transfer};

#[derive(Debug, Error)]
pub enum AcceleratorError {
    #[error("Unknown accelerator device: {0}")]
    UnknownDevice(String),

    #[error("USB error: {0}")]
    Usb(#[from] UsbError),

    #[error("Host context error: {0}")]
    Host(#[from] common::Error),
}

/// Accelerator reached through the emulated USB stack
pub struct UsbAccelerator {
    context: Context,
    settings: AcceleratorSettings,
    verbosity: AtomicI32,
    devices: Mutex<HashMap<String, Arc<Device>>>,
}

impl UsbAccelerator {
    pub fn new(context: Context, settings: AcceleratorSettings) -> Self {
        Self {
            context,
            settings,
            verbosity: AtomicI32::new(0),
            devices: Mutex::new(HashMap::new()),
        }
    }

    pub fn verbosity(&self) -> i32 {
        self.verbosity.load(Ordering::Relaxed)
    }

    /// sysfs-style path naming a device by bus and port
    pub fn device_path(device: &Device) -> String {
        format!(
            "/sys/bus/usb/devices/{}-{}",
            device.bus_number(),
            device.port_number()
        )
    }

    fn devices(&self) -> MutexGuard<'_, HashMap<String, Arc<Device>>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enumerate(&self) -> Result<Vec<Arc<Device>>, AcceleratorError> {
        let context = self.context.clone();
        let list = self
            .context
            .host()
            .block_on(async move { context.get_device_list().await })??;
        Ok(list.into_vec())
    }

    /// Open the accelerator at `path` and wrap it in a delegate
    pub fn open_delegate(&self, path: &str) -> Result<UsbDelegate, AcceleratorError> {
        let device = self
            .devices()
            .get(path)
            .cloned()
            .ok_or_else(|| AcceleratorError::UnknownDevice(path.to_string()))?;
        UsbDelegate::open(self.context.clone(), device, &self.settings)
    }
}

impl Accelerator for UsbAccelerator {
    fn set_verbosity(&self, verbosity: i32) {
        self.verbosity.store(verbosity, Ordering::Relaxed);
        self.context.set_debug(verbosity);
    }

    fn list_devices(&self) -> Vec<AcceleratorDevice> {
        let found = match self.enumerate() {
            Ok(found) => found,
            Err(e) => {
                warn!("Accelerator enumeration failed: {}", e);
                return Vec::new();
            }
        };

        let mut devices = self.devices();
        found
            .into_iter()
            .map(|device| {
                let path = Self::device_path(&device);
                devices.insert(path.clone(), device);
                AcceleratorDevice {
                    kind: DeviceKind::Usb,
                    path,
                }
            })
            .collect()
    }

    fn create_delegate(
        &self,
        device: &AcceleratorDevice,
        options: &BTreeMap<String, String>,
    ) -> Option<Box<dyn Delegate>> {
        if device.kind != DeviceKind::Usb {
            warn!("Unsupported accelerator {}", device);
            return None;
        }
        for (key, value) in options {
            debug!(%key, %value, "Delegate option");
        }

        match self.open_delegate(&device.path) {
            Ok(delegate) => {
                info!("Accelerator delegate ready on {}", device);
                Some(Box::new(delegate))
            }
            Err(e) => {
                warn!("Failed to open accelerator {}: {}", device, e);
                None
            }
        }
    }
}

/// Delegate offloading each invocation as a bulk OUT + bulk IN pair
pub struct UsbDelegate {
    context: Context,
    handle: DeviceHandle,
    interface: u8,
    out_endpoint: u8,
    in_endpoint: u8,
    timeout: Duration,
}

impl std::fmt::Debug for UsbDelegate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbDelegate")
            .field("handle", &self.handle)
            .field("out_endpoint", &self.out_endpoint)
            .field("in_endpoint", &self.in_endpoint)
            .finish_non_exhaustive()
    }
}

impl UsbDelegate {
    /// Open `device` and claim the accelerator interface
    ///
    /// Blocks on the host context, so it must not be called from the host
    /// thread.
    pub fn open(
        context: Context,
        device: Arc<Device>,
        settings: &AcceleratorSettings,
    ) -> Result<Self, AcceleratorError> {
        let interface = settings.interface;
        let handle = context
            .host()
            .block_on(async move {
                let handle = device.open().await?;
                let claimed = handle.claim_interface(interface).await;
                if let Err(e) = claimed {
                    handle.close();
                    return Err(e);
                }
                Ok::<_, UsbError>(handle)
            })??;

        Ok(Self {
            context,
            handle,
            interface,
            out_endpoint: settings.out_endpoint,
            in_endpoint: settings.in_endpoint,
            timeout: settings.invoke_timeout(),
        })
    }

    fn submit(
        &self,
        endpoint: u8,
        buffer: Vec<u8>,
        done: Sender<Box<Transfer>>,
    ) -> EngineResult<()> {
        let mut transfer = Transfer::alloc(0);
        transfer.fill_bulk(
            &self.handle,
            endpoint,
            buffer,
            Box::new(move |transfer| {
                let _ = done.try_send(transfer);
            }),
            self.timeout,
        );
        transfer.submit().map(|_| ()).map_err(|e| {
            EngineError::Delegate(format!(
                "submit on endpoint {:#04x} failed: {}",
                endpoint, e.error
            ))
        })
    }

    /// Deliver completions until both halves of the exchange are back
    fn wait_pair(
        &self,
        done: &Receiver<Box<Transfer>>,
    ) -> EngineResult<(Box<Transfer>, Box<Transfer>)> {
        let deadline = Instant::now() + self.timeout;
        let mut sent = None;
        let mut received = None;

        loop {
            while let Ok(transfer) = done.try_recv() {
                if transfer.endpoint().is_in() {
                    received = Some(transfer);
                } else {
                    sent = Some(transfer);
                }
            }
            if let (Some(_), Some(_)) = (&sent, &received) {
                break;
            }
            if Instant::now() >= deadline {
                return Err(EngineError::Invoke(format!(
                    "accelerator did not answer within {:?}",
                    self.timeout
                )));
            }
            self.context
                .handle_events()
                .map_err(|e| EngineError::Invoke(e.to_string()))?;
        }

        match (sent, received) {
            (Some(sent), Some(received)) => Ok((sent, received)),
            _ => Err(EngineError::Invoke("transfer pair incomplete".to_string())),
        }
    }
}

fn check(transfer: &Transfer) -> EngineResult<()> {
    match transfer.status() {
        TransferStatus::Completed => Ok(()),
        status => Err(EngineError::Invoke(format!(
            "bulk transfer on endpoint {:#04x} ended with {:?}",
            transfer.endpoint().0,
            status
        ))),
    }
}

impl Delegate for UsbDelegate {
    fn name(&self) -> &str {
        "usb-accelerator"
    }

    fn invoke(&mut self, inputs: &[Tensor], outputs: &mut [Tensor]) -> EngineResult<()> {
        let input = inputs
            .first()
            .ok_or_else(|| EngineError::Delegate("graph has no input".to_string()))?;
        let output = outputs
            .first_mut()
            .ok_or_else(|| EngineError::Delegate("graph has no output".to_string()))?;
        let expected = output.data().len();

        let (tx, rx) = async_channel::unbounded();
        self.submit(self.out_endpoint, input.data().to_vec(), tx.clone())?;
        self.submit(self.in_endpoint, vec![0; expected], tx)?;

        let (sent, received) = self.wait_pair(&rx)?;
        check(&sent)?;
        check(&received)?;

        let data = received.data();
        if data.len() != expected {
            return Err(EngineError::Invoke(format!(
                "short read: {} of {} bytes",
                data.len(),
                expected
            )));
        }
        output.data_mut().copy_from_slice(data);
        trace!(bytes = expected, "Accelerator invocation complete");
        Ok(())
    }
}

impl Drop for UsbDelegate {
    fn drop(&mut self) {
        let handle = self.handle.clone();
        let interface = self.interface;
        match self
            .context
            .host()
            .block_on(async move { handle.release_interface(interface).await })
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to release interface {}: {}", interface, e),
            Err(e) => debug!("Interface {} not released: {}", interface, e),
        }
        self.handle.clone().close();
    }
}
