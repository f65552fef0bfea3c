//! Compute interpreter with a dedicated worker thread
//!
//! An [`Interpreter`] wraps an external inference [`Engine`], optionally
//! accelerated by a [`Delegate`]. Invocations are serialized onto the
//! [`ComputeWorker`] thread and their results are delivered on the host
//! context, either to an awaiting future or to a completion handler.

pub mod delegate;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod interpreter;
pub mod worker;

pub use delegate::{Accelerator, AcceleratorDevice, Delegate, DeviceKind, EDGETPU_CUSTOM_OP};
pub use dispatcher::{Dispatcher, InvokeDoneHandler};
pub use engine::{Backend, Engine, EngineError, EngineResult, Model, Tensor};
pub use error::{InitError, InvokeError};
pub use interpreter::{INTERNAL_ID_BASE, Interpreter, InterpreterOptions};
pub use worker::{Command, ComputeWorker, InvokeDone, SharedEngine, WorkerState};
