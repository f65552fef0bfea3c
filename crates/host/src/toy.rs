//! Toy inference backend
//!
//! Model layout: the magic `TOYM`, the tensor length as a little-endian
//! `u32`, then an optional custom operator name in UTF-8. The graph has one
//! `[1, len]` input and one `[1, len]` output and computes
//! `output[i] = input[i] + 1`, either on the CPU or through a delegate.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use interpreter::{Backend, Delegate, Engine, EngineError, EngineResult, Model, Tensor};
use std::io::{Cursor, Read};
use tracing::{debug, trace};

pub const MAGIC: &[u8; 4] = b"TOYM";

/// Largest tensor a toy model may declare
pub const MAX_TENSOR_LEN: u32 = 1 << 24;

/// Serialize a toy model
pub fn encode_model(tensor_len: u32, custom_op: Option<&str>) -> Vec<u8> {
    let mut bytes = MAGIC.to_vec();
    // Writing into a Vec cannot fail.
    let _ = bytes.write_u32::<LittleEndian>(tensor_len);
    if let Some(op) = custom_op {
        bytes.extend_from_slice(op.as_bytes());
    }
    bytes
}

/// Header of a parsed toy model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToyHeader {
    pub tensor_len: u32,
    pub custom_op: Option<String>,
}

impl ToyHeader {
    pub fn parse(bytes: &[u8]) -> EngineResult<Self> {
        let mut cursor = Cursor::new(bytes);

        let mut magic = [0u8; 4];
        cursor
            .read_exact(&mut magic)
            .map_err(|_| EngineError::Model("truncated header".to_string()))?;
        if &magic != MAGIC {
            return Err(EngineError::Model(format!("bad magic {:02x?}", magic)));
        }

        let tensor_len = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| EngineError::Model("truncated header".to_string()))?;
        if tensor_len == 0 {
            return Err(EngineError::Model("empty tensor".to_string()));
        }

        let mut rest = Vec::new();
        cursor
            .read_to_end(&mut rest)
            .map_err(|e| EngineError::Model(e.to_string()))?;
        let custom_op = if rest.is_empty() {
            None
        } else {
            let name = String::from_utf8(rest)
                .map_err(|_| EngineError::Model("custom operator name is not UTF-8".to_string()))?;
            Some(name)
        };

        Ok(Self {
            tensor_len,
            custom_op,
        })
    }
}

/// Backend for toy models
#[derive(Debug, Default, Clone, Copy)]
pub struct ToyBackend;

impl Backend for ToyBackend {
    fn load_model(&self, bytes: &[u8]) -> EngineResult<Model> {
        let header = ToyHeader::parse(bytes)?;
        debug!(
            tensor_len = header.tensor_len,
            custom_op = ?header.custom_op,
            "Loaded toy model"
        );
        Ok(Model::new(bytes.to_vec(), header.custom_op.into_iter().collect()))
    }

    fn build(&self, model: &Model) -> EngineResult<Box<dyn Engine>> {
        let header = ToyHeader::parse(model.bytes())?;
        if header.tensor_len > MAX_TENSOR_LEN {
            return Err(EngineError::Allocation(format!(
                "tensor length {} exceeds {}",
                header.tensor_len, MAX_TENSOR_LEN
            )));
        }
        let len = i32::try_from(header.tensor_len)
            .map_err(|_| EngineError::Model("tensor length out of range".to_string()))?;

        Ok(Box::new(ToyEngine {
            inputs: vec![Tensor::new("input", vec![1, len])],
            outputs: vec![Tensor::new("output", vec![1, len])],
            delegate: None,
            delegated_op: header.custom_op,
        }))
    }
}

struct ToyEngine {
    inputs: Vec<Tensor>,
    outputs: Vec<Tensor>,
    delegate: Option<Box<dyn Delegate>>,
    delegated_op: Option<String>,
}

impl Engine for ToyEngine {
    fn apply_delegate(&mut self, delegate: Box<dyn Delegate>) -> EngineResult<()> {
        if self.delegated_op.is_none() {
            return Err(EngineError::Delegate(format!(
                "{}: model has no operator to delegate",
                delegate.name()
            )));
        }
        debug!(delegate = delegate.name(), "Delegate applied");
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
        if let Some(delegate) = self.delegate.as_mut() {
            trace!(delegate = delegate.name(), "Invoking delegate");
            return delegate.invoke(&self.inputs, &mut self.outputs);
        }
        if let Some(op) = &self.delegated_op {
            return Err(EngineError::UnsupportedOp(op.clone()));
        }
        let (input, output) = (&self.inputs[0], &mut self.outputs[0]);
        increment(input.data(), output.data_mut());
        Ok(())
    }
}

/// The toy graph's single operator
pub fn increment(input: &[u8], output: &mut [u8]) {
    for (out, value) in output.iter_mut().zip(input) {
        *out = value.wrapping_add(1);
    }
}
