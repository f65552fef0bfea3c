//! Inference engine interface
//!
//! The numerical engine is external to this crate. A [`Backend`] turns model
//! bytes into a [`Model`] and builds an [`Engine`] for it; the engine owns
//! its input and output [`Tensor`]s and runs the graph on `invoke`.

use crate::delegate::Delegate;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Malformed model: {0}")]
    Model(String),

    #[error("Unsupported operator: {0}")]
    UnsupportedOp(String),

    #[error("Delegate error: {0}")]
    Delegate(String),

    #[error("Tensor allocation failed: {0}")]
    Allocation(String),

    #[error("Invocation failed: {0}")]
    Invoke(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Dense `u8` tensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tensor {
    pub name: String,
    dims: Vec<i32>,
    data: Vec<u8>,
}

impl Tensor {
    /// Tensor without storage; `allocate` sizes it from `dims`
    pub fn new(name: impl Into<String>, dims: Vec<i32>) -> Self {
        Self {
            name: name.into(),
            dims,
            data: Vec::new(),
        }
    }

    pub fn dims(&self) -> &[i32] {
        &self.dims
    }

    pub fn num_dims(&self) -> usize {
        self.dims.len()
    }

    pub fn dim(&self, index: usize) -> Option<i32> {
        self.dims.get(index).copied()
    }

    /// Element count implied by the dimensions
    pub fn element_count(&self) -> Option<usize> {
        self.dims.iter().try_fold(1usize, |acc, &d| {
            usize::try_from(d).ok().and_then(|d| acc.checked_mul(d))
        })
    }

    /// Size the storage for the dimensions, zero-filled
    pub fn allocate(&mut self) -> EngineResult<()> {
        let count = self.element_count().ok_or_else(|| {
            EngineError::Allocation(format!("{}: invalid dimensions {:?}", self.name, self.dims))
        })?;
        self.data = vec![0; count];
        Ok(())
    }

    pub fn is_allocated(&self) -> bool {
        !self.data.is_empty() || self.element_count() == Some(0)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Parsed model, ready to be built into an engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    bytes: Vec<u8>,
    custom_ops: Vec<String>,
}

impl Model {
    pub fn new(bytes: Vec<u8>, custom_ops: Vec<String>) -> Self {
        Self { bytes, custom_ops }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn custom_ops(&self) -> &[String] {
        &self.custom_ops
    }

    pub fn uses_custom_op(&self, name: &str) -> bool {
        self.custom_ops.iter().any(|op| op == name)
    }
}

/// Model loader and engine builder
pub trait Backend: Send + Sync {
    fn load_model(&self, bytes: &[u8]) -> EngineResult<Model>;

    fn build(&self, model: &Model) -> EngineResult<Box<dyn Engine>>;
}

/// Executable graph with its tensors
///
/// Only the compute worker calls [`Engine::invoke`].
pub trait Engine: Send {
    /// Hand part of the graph to an accelerator delegate
    fn apply_delegate(&mut self, delegate: Box<dyn Delegate>) -> EngineResult<()>;

    fn allocate_tensors(&mut self) -> EngineResult<()>;

    fn inputs(&self) -> &[Tensor];

    fn inputs_mut(&mut self) -> &mut [Tensor];

    fn outputs(&self) -> &[Tensor];

    fn invoke(&mut self) -> EngineResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_allocation() {
        let mut tensor = Tensor::new("input", vec![1, 4, 4, 3]);
        assert_eq!(tensor.element_count(), Some(48));
        assert!(!tensor.is_allocated());

        tensor.allocate().unwrap();
        assert_eq!(tensor.data().len(), 48);
        assert!(tensor.data().iter().all(|&b| b == 0));
        assert_eq!(tensor.num_dims(), 4);
        assert_eq!(tensor.dim(3), Some(3));
        assert_eq!(tensor.dim(4), None);
    }

    #[test]
    fn test_negative_dimension_is_rejected() {
        let mut tensor = Tensor::new("bad", vec![2, -1]);
        assert_eq!(tensor.element_count(), None);
        assert!(matches!(tensor.allocate(), Err(EngineError::Allocation(_))));
    }

    #[test]
    fn test_model_custom_ops() {
        let model = Model::new(vec![1, 2], vec!["edgetpu-custom-op".to_string()]);
        assert!(model.uses_custom_op("edgetpu-custom-op"));
        assert!(!model.uses_custom_op("other"));
        assert_eq!(model.bytes(), &[1, 2]);
    }
}
