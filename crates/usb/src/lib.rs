//! libusb 1.0 emulation over an asynchronous host
//!
//! Callers see the classic libusb model: a context, discovered devices,
//! open handles, and transfers that are submitted now and completed later
//! by `handle_events`. Underneath, every device operation is a future run
//! on the host context through a [`HostBridge`].
//!
//! # Example
//!
//! ```no_run
//! use common::HostRuntime;
//! use std::sync::Arc;
//! use usb::{Context, HostDeviceInfo, SimulatedBridge};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let host = HostRuntime::start()?;
//! let bridge = Arc::new(SimulatedBridge::new().with_device(HostDeviceInfo::new(0x18d1, 0x9302)));
//! let context = Context::init(bridge, host.handle())?;
//!
//! let ctx = context.clone();
//! let devices = host.handle().block_on(async move { ctx.get_device_list().await })??;
//! assert_eq!(devices.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod context;
pub mod device;
pub mod ffi;
pub mod handle;
pub mod sim;
pub mod transfer;

pub use bridge::{BridgeError, BridgeFuture, BridgeResult, HostBridge, HostDeviceInfo};
pub use context::{Context, ContextOptions};
pub use device::{Device, DeviceList};
pub use handle::DeviceHandle;
pub use sim::{BridgeCall, Fault, SimulatedBridge};
pub use transfer::{SubmitError, Transfer, TransferCallback, TransferId};
