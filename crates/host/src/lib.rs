//! Pieces of the `bridge-host` binary
//!
//! The binary wires the toy inference backend to the USB accelerator
//! delegate, which reaches a simulated device through the libusb emulation.

pub mod accelerator;
pub mod toy;

pub use accelerator::{AcceleratorError, UsbAccelerator, UsbDelegate};
pub use toy::{ToyBackend, encode_model};

use usb::{HostDeviceInfo, SimulatedBridge};

pub const ACCELERATOR_VENDOR_ID: u16 = 0x18d1;
pub const ACCELERATOR_PRODUCT_ID: u16 = 0x9302;

/// Simulated host with one accelerator attached
///
/// Its bulk endpoints loop data back through the toy operator, so offloaded
/// invocations produce the same result as the CPU path.
pub fn simulated_bridge() -> SimulatedBridge {
    let info = HostDeviceInfo {
        usb_version_major: 3,
        usb_version_minor: 0x10,
        manufacturer_name: Some("Google".to_string()),
        product_name: Some("Coral USB Accelerator".to_string()),
        ..HostDeviceInfo::new(ACCELERATOR_VENDOR_ID, ACCELERATOR_PRODUCT_ID)
    };
    SimulatedBridge::new()
        .with_device(info)
        .with_loopback_transform(|data: &[u8]| {
            let mut out = vec![0; data.len()];
            toy::increment(data, &mut out);
            out
        })
}
