//! Interpreter error types

use std::time::Duration;
use thiserror::Error;

/// Failure while creating an interpreter
#[derive(Debug, Error)]
pub enum InitError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Failed to build interpreter: {0}")]
    InterpreterBuild(String),

    #[error("Model requires an accelerator but none is connected")]
    NotConnected,

    #[error("Accelerator delegate rejected: {0}")]
    DelegateRejected(String),

    #[error("Failed to allocate tensors: {0}")]
    TensorAllocation(String),

    #[error("Failed to start compute worker: {0}")]
    Worker(#[from] common::Error),
}

/// Failure of a single invocation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvokeError {
    #[error("Invocation {0} failed")]
    Failed(u64),

    #[error("Invocation {id} timed out after {timeout:?}")]
    Timeout { id: u64, timeout: Duration },

    #[error("Compute worker stopped before invocation {0} completed")]
    WorkerStopped(u64),

    #[error("Tensor index {0} out of range")]
    TensorIndex(usize),

    #[error("Tensor expects {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}
