//! Host async bridge
//!
//! The host exposes device access only as futures that must run on the host
//! context. [`HostBridge`] is that surface: one selected device, opened,
//! reset and driven through control and bulk/interrupt endpoints. Every
//! failure comes back as a [`BridgeError`] value; nothing on this boundary
//! panics.

use common::DeviceFilter;
use protocol::{BcdVersion, ControlSetup, DeviceDescriptor, TransferStatus, UsbError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by bridge operations
pub type BridgeFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Failure reported by the host
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("Host has no device access capability")]
    Unavailable,

    #[error("No device selected")]
    NoDeviceSelected,

    #[error("Device is not open")]
    NotOpen,

    #[error("Device disconnected")]
    Disconnected,

    #[error("Endpoint {0:#04x} stalled")]
    Stall(u8),

    #[error("Host operation failed: {0}")]
    Failed(String),
}

impl BridgeError {
    /// Terminal status recorded on a transfer that failed with this error
    pub fn transfer_status(&self) -> TransferStatus {
        match self {
            BridgeError::Stall(_) => TransferStatus::Stall,
            BridgeError::Disconnected => TransferStatus::NoDevice,
            _ => TransferStatus::Error,
        }
    }
}

impl From<BridgeError> for UsbError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Stall(_) => UsbError::Pipe,
            BridgeError::Disconnected => UsbError::NoDevice,
            BridgeError::Unavailable => UsbError::NotSupported,
            BridgeError::NoDeviceSelected
            | BridgeError::NotOpen
            | BridgeError::Failed(_) => UsbError::Io,
        }
    }
}

/// Device information as reported by the host
///
/// Versions arrive split into their components; [`HostDeviceInfo::descriptor`]
/// packs them into BCD fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDeviceInfo {
    pub usb_version_major: u8,
    pub usb_version_minor: u8,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_version_major: u8,
    pub device_version_minor: u8,
    pub device_version_subminor: u8,
    pub num_configurations: u8,
    pub manufacturer_name: Option<String>,
    pub product_name: Option<String>,
    pub serial_number: Option<String>,
}

impl HostDeviceInfo {
    /// Minimal vendor-class device with one configuration
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            usb_version_major: 2,
            usb_version_minor: 0,
            device_class: 0xff,
            device_subclass: 0xff,
            device_protocol: 0xff,
            vendor_id,
            product_id,
            device_version_major: 1,
            device_version_minor: 0,
            device_version_subminor: 0,
            num_configurations: 1,
            manufacturer_name: None,
            product_name: None,
            serial_number: None,
        }
    }

    pub fn descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor::builder()
            .usb_version(BcdVersion::from_usb(
                self.usb_version_major,
                self.usb_version_minor,
            ))
            .class(self.device_class, self.device_subclass, self.device_protocol)
            .vendor_id(self.vendor_id)
            .product_id(self.product_id)
            .device_version(BcdVersion::from_device(
                self.device_version_major,
                self.device_version_minor,
                self.device_version_subminor,
            ))
            .num_configurations(self.num_configurations)
            .build()
    }

    pub fn matches_any(&self, filters: &[DeviceFilter]) -> bool {
        filters
            .iter()
            .any(|f| f.matches(self.vendor_id, self.product_id))
    }
}

/// Asynchronous device access offered by the host
///
/// All futures are polled on the host context. Endpoint arguments are
/// endpoint numbers without the direction bit.
pub trait HostBridge: Send + Sync + 'static {
    /// Whether the host offers device access at all
    fn is_available(&self) -> bool;

    /// Select the device to work with
    ///
    /// Returns `None` when no single device could be selected.
    fn request_device<'a>(
        &'a self,
        filters: &'a [DeviceFilter],
    ) -> BridgeFuture<'a, BridgeResult<Option<HostDeviceInfo>>>;

    fn open(&self) -> BridgeFuture<'_, BridgeResult<()>>;

    fn close(&self) -> BridgeFuture<'_, BridgeResult<()>>;

    fn reset(&self) -> BridgeFuture<'_, BridgeResult<()>>;

    fn claim_interface(&self, interface: u8) -> BridgeFuture<'_, BridgeResult<()>>;

    fn release_interface(&self, interface: u8) -> BridgeFuture<'_, BridgeResult<()>>;

    /// Control transfer with a device-to-host data stage of up to `length` bytes
    fn control_transfer_in(
        &self,
        setup: ControlSetup,
        length: u16,
    ) -> BridgeFuture<'_, BridgeResult<Vec<u8>>>;

    /// Control transfer with a host-to-device data stage, returns bytes written
    fn control_transfer_out(
        &self,
        setup: ControlSetup,
        data: Vec<u8>,
    ) -> BridgeFuture<'_, BridgeResult<usize>>;

    /// Bulk or interrupt IN of up to `length` bytes
    fn transfer_in(&self, endpoint: u8, length: usize) -> BridgeFuture<'_, BridgeResult<Vec<u8>>>;

    /// Bulk or interrupt OUT, returns bytes written
    fn transfer_out(&self, endpoint: u8, data: Vec<u8>) -> BridgeFuture<'_, BridgeResult<usize>>;
}
