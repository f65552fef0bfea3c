//! Common utilities for edge-bridge
//!
//! This crate provides the pieces shared by the device emulation layer and
//! the compute interpreter: the blocking handoff queue, the host execution
//! context, configuration, error handling and logging setup.

pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod queue;
pub mod test_utils;

pub use config::{BridgeConfig, DeviceFilter};
pub use error::{Error, Result};
pub use host::{HostHandle, HostRuntime};
pub use logging::{setup_logging, verbosity_to_level};
pub use queue::BlockingQueue;
