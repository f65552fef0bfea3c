//! Fixed-layout records and constants of the emulated device-access API
//!
//! This crate defines the libusb 1.0 surface that the emulation layer has to
//! reproduce bit-for-bit: status codes, transfer status and type values, the
//! 18-byte device descriptor, the library version record and the `repr(C)`
//! structures shared with C callers.
//!
//! # Example
//!
//! ```
//! use protocol::{DeviceDescriptor, UsbError};
//!
//! let descriptor = DeviceDescriptor::builder()
//!     .vendor_id(0x18d1)
//!     .product_id(0x9302)
//!     .build();
//!
//! let bytes = descriptor.to_bytes();
//! assert_eq!(bytes.len(), 18);
//! assert_eq!(DeviceDescriptor::from_bytes(&bytes).unwrap(), descriptor);
//!
//! assert_eq!(UsbError::NotSupported.code(), -12);
//! ```

pub mod abi;
pub mod descriptor;
pub mod error;
pub mod status;
pub mod types;
pub mod version;

pub use abi::{RawDeviceDescriptor, RawIsoPacketDescriptor, RawTransfer, RawVersion};
pub use descriptor::{BcdVersion, DeviceDescriptor, DeviceDescriptorBuilder};
pub use error::{ProtocolError, Result};
pub use status::{TransferStatus, UsbError, UsbResult};
pub use types::{
    ControlSetup, DeviceSpeed, Direction, EndpointAddress, Recipient, RequestKind, TransferType,
};
pub use version::{LIBRARY_VERSION, LibraryVersion};
