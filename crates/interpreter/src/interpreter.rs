//! Interpreter lifecycle
//!
//! Creation loads the model, builds the engine, attaches an accelerator
//! delegate when the model was compiled for one, allocates tensors and
//! starts the compute worker. Invocations run on the worker; their results
//! come back through the [`Dispatcher`] on the host context.

use crate::delegate::{Accelerator, EDGETPU_CUSTOM_OP};
use crate::dispatcher::{Dispatcher, InvokeDoneHandler};
use crate::engine::{Backend, Engine, Tensor};
use crate::error::{InitError, InvokeError};
use crate::worker::{ComputeWorker, SharedEngine, WorkerState};
use common::{BridgeConfig, HostHandle};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info};

/// First id handed out by [`Interpreter::invoke`]
///
/// Ids passed to [`Interpreter::invoke_async`] should stay below it.
pub const INTERNAL_ID_BASE: u64 = 1 << 63;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterOptions {
    /// Accelerator runtime verbosity
    pub verbosity: i32,
    /// Wait bound of each compute worker poll
    pub poll_timeout: Duration,
    /// Options handed to the accelerator delegate
    pub delegate_options: BTreeMap<String, String>,
    /// Deadline of an awaited [`Interpreter::invoke`]
    pub invoke_timeout: Duration,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

impl InterpreterOptions {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            verbosity: config.accelerator.verbosity,
            poll_timeout: config.worker.poll_timeout(),
            delegate_options: config.accelerator.options.clone(),
            invoke_timeout: config.accelerator.invoke_timeout(),
        }
    }
}

pub struct Interpreter {
    engine: SharedEngine,
    worker: ComputeWorker,
    dispatcher: Dispatcher,
    next_id: AtomicU64,
    invoke_timeout: Duration,
    delegated: bool,
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("worker", &self.worker.state())
            .field("delegated", &self.delegated)
            .finish_non_exhaustive()
    }
}

impl Interpreter {
    /// Build an interpreter for `model`
    ///
    /// `accelerator` is only consulted when the model uses the accelerator's
    /// custom operator.
    pub fn create(
        model: &[u8],
        backend: &dyn Backend,
        accelerator: Option<&dyn Accelerator>,
        host: &HostHandle,
        options: &InterpreterOptions,
    ) -> Result<Self, InitError> {
        let model = backend.load_model(model).map_err(|e| {
            error!("Failed to load model: {}", e);
            InitError::ModelLoad(e.to_string())
        })?;
        let mut engine = backend.build(&model).map_err(|e| {
            error!("Failed to build interpreter: {}", e);
            InitError::InterpreterBuild(e.to_string())
        })?;

        let delegated = model.uses_custom_op(EDGETPU_CUSTOM_OP);
        if delegated {
            attach_delegate(engine.as_mut(), accelerator, options)?;
        } else {
            debug!("Model has no accelerator operator, running on CPU");
        }

        engine.allocate_tensors().map_err(|e| {
            error!("Failed to allocate tensors: {}", e);
            InitError::TensorAllocation(e.to_string())
        })?;

        let engine: SharedEngine = Arc::new(Mutex::new(engine));
        let (events_tx, events_rx) = async_channel::unbounded();
        let dispatcher = Dispatcher::start(host, events_rx);
        let worker = ComputeWorker::spawn(engine.clone(), events_tx, options.poll_timeout)?;

        info!(delegated, "Interpreter ready");
        Ok(Self {
            engine,
            worker,
            dispatcher,
            next_id: AtomicU64::new(INTERNAL_ID_BASE),
            invoke_timeout: options.invoke_timeout,
            delegated,
        })
    }

    /// Build an interpreter from a model file
    pub fn create_from_file(
        path: &Path,
        backend: &dyn Backend,
        accelerator: Option<&dyn Accelerator>,
        host: &HostHandle,
        options: &InterpreterOptions,
    ) -> Result<Self, InitError> {
        let model = std::fs::read(path).map_err(|e| {
            error!("Failed to read model {}: {}", path.display(), e);
            InitError::ModelLoad(format!("{}: {}", path.display(), e))
        })?;
        Self::create(&model, backend, accelerator, host, options)
    }

    /// Whether the accelerator delegate was attached
    pub fn is_delegated(&self) -> bool {
        self.delegated
    }

    pub fn worker_state(&self) -> WorkerState {
        self.worker.state()
    }

    pub fn num_inputs(&self) -> usize {
        self.engine().inputs().len()
    }

    pub fn num_outputs(&self) -> usize {
        self.engine().outputs().len()
    }

    pub fn input(&self, index: usize) -> Option<Tensor> {
        self.engine().inputs().get(index).cloned()
    }

    pub fn output(&self, index: usize) -> Option<Tensor> {
        self.engine().outputs().get(index).cloned()
    }

    /// Copy `data` into input tensor `index`
    pub fn set_input(&self, index: usize, data: &[u8]) -> Result<(), InvokeError> {
        let mut engine = self.engine();
        let tensor = engine
            .inputs_mut()
            .get_mut(index)
            .ok_or(InvokeError::TensorIndex(index))?;
        let buffer = tensor.data_mut();
        if buffer.len() != data.len() {
            return Err(InvokeError::SizeMismatch {
                expected: buffer.len(),
                actual: data.len(),
            });
        }
        buffer.copy_from_slice(data);
        Ok(())
    }

    /// Queue an invocation reported to the completion handler as `id`
    pub fn invoke_async(&self, id: u64) {
        self.worker.invoke(id);
    }

    /// Handler for results of [`Interpreter::invoke_async`]
    pub fn set_invoke_done(&self, handler: Option<InvokeDoneHandler>) {
        self.dispatcher.set_handler(handler);
    }

    /// Run one invocation and wait for it on the host context
    ///
    /// The returned future owns everything it needs, so it can be handed to
    /// [`HostHandle::block_on`].
    pub fn invoke(&self) -> impl Future<Output = Result<(), InvokeError>> + Send + 'static {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let done = self.dispatcher.register(id);
        let dispatcher = self.dispatcher.clone();
        let timeout = self.invoke_timeout;
        self.worker.invoke(id);

        async move {
            match tokio::time::timeout(timeout, done).await {
                Ok(Ok(true)) => Ok(()),
                Ok(Ok(false)) => Err(InvokeError::Failed(id)),
                Ok(Err(_)) => Err(InvokeError::WorkerStopped(id)),
                Err(_) => {
                    dispatcher.forget(id);
                    Err(InvokeError::Timeout { id, timeout })
                }
            }
        }
    }

    pub(crate) fn engine(&self) -> MutexGuard<'_, Box<dyn Engine>> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn attach_delegate(
    engine: &mut dyn Engine,
    accelerator: Option<&dyn Accelerator>,
    options: &InterpreterOptions,
) -> Result<(), InitError> {
    let Some(accelerator) = accelerator else {
        error!("Model uses {} but no accelerator runtime is available", EDGETPU_CUSTOM_OP);
        return Err(InitError::NotConnected);
    };

    accelerator.set_verbosity(options.verbosity);
    let devices = accelerator.list_devices();
    let Some(device) = devices.first() else {
        error!("No accelerator connected");
        return Err(InitError::NotConnected);
    };
    info!("Using accelerator {} ({} found)", device, devices.len());

    let delegate = accelerator
        .create_delegate(device, &options.delegate_options)
        .ok_or_else(|| {
            error!("Accelerator {} refused the delegate", device);
            InitError::DelegateRejected(format!("{} refused the delegate", device))
        })?;
    let name = delegate.name().to_string();
    engine.apply_delegate(delegate).map_err(|e| {
        error!("Failed to apply delegate {}: {}", name, e);
        InitError::DelegateRejected(e.to_string())
    })
}
