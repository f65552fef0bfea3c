//! Hardware accelerator interface

use crate::engine::{EngineResult, Tensor};
use std::collections::BTreeMap;
use std::fmt;

/// Custom operator marking a model compiled for the accelerator
pub const EDGETPU_CUSTOM_OP: &str = "edgetpu-custom-op";

/// Bus the accelerator is attached through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Usb,
    Pci,
}

/// Accelerator found by [`Accelerator::list_devices`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceleratorDevice {
    pub kind: DeviceKind,
    pub path: String,
}

impl fmt::Display for AcceleratorDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            DeviceKind::Usb => "usb",
            DeviceKind::Pci => "pci",
        };
        write!(f, "{}:{}", kind, self.path)
    }
}

/// Accelerator runtime
pub trait Accelerator: Send + Sync {
    fn set_verbosity(&self, verbosity: i32);

    fn list_devices(&self) -> Vec<AcceleratorDevice>;

    /// `None` when the device refuses the delegate or the options
    fn create_delegate(
        &self,
        device: &AcceleratorDevice,
        options: &BTreeMap<String, String>,
    ) -> Option<Box<dyn Delegate>>;
}

/// Executes the delegated part of a graph
///
/// Runs on the compute worker thread, inside [`crate::Engine::invoke`].
pub trait Delegate: Send {
    fn name(&self) -> &str;

    fn invoke(&mut self, inputs: &[Tensor], outputs: &mut [Tensor]) -> EngineResult<()>;
}
