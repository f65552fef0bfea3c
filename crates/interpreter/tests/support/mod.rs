//! Fake backend, engine and accelerator shared by the integration tests
//!
//! Model bytes select the behavior:
//! - `b"cpu"`: plain model, output = input + 1
//! - `b"tpu"`: uses the accelerator custom operator
//! - `b"fail"`: every invocation fails
//! - `b"slow"`: every invocation sleeps 200 ms
//! - `b"corrupt"`, `b"unbuildable"`, `b"huge"`: fail at load, build and
//!   tensor allocation respectively

#![allow(dead_code)]

use interpreter::{
    Accelerator, AcceleratorDevice, Backend, Delegate, DeviceKind, EDGETPU_CUSTOM_OP, Engine,
    EngineError, EngineResult, Model, Tensor,
};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

pub const TENSOR_LEN: i32 = 4;

pub struct FakeBackend;

impl Backend for FakeBackend {
    fn load_model(&self, bytes: &[u8]) -> EngineResult<Model> {
        match bytes {
            b"corrupt" => Err(EngineError::Model("bad magic".to_string())),
            b"tpu" => Ok(Model::new(bytes.to_vec(), vec![EDGETPU_CUSTOM_OP.to_string()])),
            _ => Ok(Model::new(bytes.to_vec(), Vec::new())),
        }
    }

    fn build(&self, model: &Model) -> EngineResult<Box<dyn Engine>> {
        if model.bytes() == b"unbuildable" {
            return Err(EngineError::UnsupportedOp("CONV_3D".to_string()));
        }
        let dims = if model.bytes() == b"huge" {
            vec![-1]
        } else {
            vec![1, TENSOR_LEN]
        };
        Ok(Box::new(FakeEngine {
            behavior: model.bytes().to_vec(),
            inputs: vec![Tensor::new("input", dims.clone())],
            outputs: vec![Tensor::new("output", dims)],
            delegate: None,
        }))
    }
}

struct FakeEngine {
    behavior: Vec<u8>,
    inputs: Vec<Tensor>,
    outputs: Vec<Tensor>,
    delegate: Option<Box<dyn Delegate>>,
}

impl Engine for FakeEngine {
    fn apply_delegate(&mut self, delegate: Box<dyn Delegate>) -> EngineResult<()> {
        self.delegate = Some(delegate);
        Ok(())
    }

    fn allocate_tensors(&mut self) -> EngineResult<()> {
        for tensor in self.inputs.iter_mut().chain(self.outputs.iter_mut()) {
            tensor.allocate()?;
        }
        Ok(())
    }

    fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    fn inputs_mut(&mut self) -> &mut [Tensor] {
        &mut self.inputs
    }

    fn outputs(&self) -> &[Tensor] {
        &self.outputs
    }

    fn invoke(&mut self) -> EngineResult<()> {
        match self.behavior.as_slice() {
            b"fail" => return Err(EngineError::Invoke("kernel error".to_string())),
            b"slow" => std::thread::sleep(Duration::from_millis(200)),
            _ => {}
        }
        if let Some(delegate) = self.delegate.as_mut() {
            return delegate.invoke(&self.inputs, &mut self.outputs);
        }
        let input = self.inputs[0].data().to_vec();
        for (out, value) in self.outputs[0].data_mut().iter_mut().zip(input) {
            *out = value.wrapping_add(1);
        }
        Ok(())
    }
}

/// Delegate adding 2, to tell it apart from the CPU path
struct PlusTwo;

impl Delegate for PlusTwo {
    fn name(&self) -> &str {
        "plus-two"
    }

    fn invoke(&mut self, inputs: &[Tensor], outputs: &mut [Tensor]) -> EngineResult<()> {
        let input = inputs[0].data().to_vec();
        for (out, value) in outputs[0].data_mut().iter_mut().zip(input) {
            *out = value.wrapping_add(2);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeAccelerator {
    pub devices: Vec<AcceleratorDevice>,
    pub refuse: bool,
    pub verbosity: Mutex<Option<i32>>,
    pub options: Mutex<Option<BTreeMap<String, String>>>,
}

impl FakeAccelerator {
    pub fn connected() -> Self {
        Self {
            devices: vec![AcceleratorDevice {
                kind: DeviceKind::Usb,
                path: "/dev/bus/usb/000/001".to_string(),
            }],
            ..Self::default()
        }
    }
}

impl Accelerator for FakeAccelerator {
    fn set_verbosity(&self, verbosity: i32) {
        *self.verbosity.lock().unwrap() = Some(verbosity);
    }

    fn list_devices(&self) -> Vec<AcceleratorDevice> {
        self.devices.clone()
    }

    fn create_delegate(
        &self,
        _device: &AcceleratorDevice,
        options: &BTreeMap<String, String>,
    ) -> Option<Box<dyn Delegate>> {
        *self.options.lock().unwrap() = Some(options.clone());
        if self.refuse {
            None
        } else {
            Some(Box::new(PlusTwo))
        }
    }
}
