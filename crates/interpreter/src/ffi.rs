//! `interpreter_*` C ABI
//!
//! `interpreter_create` returns a boxed [`Interpreter`] as an opaque handle.
//! Results of `interpreter_invoke_async` are reported on the host context
//! through the callback registered with `interpreter_set_invoke_done`.

use crate::delegate::Accelerator;
use crate::dispatcher::InvokeDoneHandler;
use crate::engine::{Backend, Engine, Tensor};
use crate::interpreter::{Interpreter, InterpreterOptions};
use crate::worker::InvokeDone;
use common::{HostHandle, setup_logging, verbosity_to_level};
use std::ffi::c_int;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::{debug, warn};

/// `void (*)(size_t id, bool success)`
pub type RawInvokeDone = Option<unsafe extern "C" fn(id: usize, success: bool)>;

struct FfiRuntime {
    backend: Arc<dyn Backend>,
    accelerator: Option<Arc<dyn Accelerator>>,
    host: HostHandle,
    options: InterpreterOptions,
}

static RUNTIME: OnceLock<FfiRuntime> = OnceLock::new();
static INVOKE_DONE: RwLock<RawInvokeDone> = RwLock::new(None);

/// Bind the C ABI to a backend, an optional accelerator and the host context
///
/// Returns `false` if a runtime was already installed.
pub fn install(
    backend: Arc<dyn Backend>,
    accelerator: Option<Arc<dyn Accelerator>>,
    host: HostHandle,
    options: InterpreterOptions,
) -> bool {
    let installed = RUNTIME
        .set(FfiRuntime {
            backend,
            accelerator,
            host,
            options,
        })
        .is_ok();
    if !installed {
        warn!("Interpreter runtime already installed");
    }
    installed
}

fn raw_invoke_done() -> RawInvokeDone {
    *INVOKE_DONE
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Forward a result to the registered C callback
fn forward_invoke_done() -> InvokeDoneHandler {
    Arc::new(|done: InvokeDone| {
        let (Some(callback), Ok(id)) = (raw_invoke_done(), usize::try_from(done.id)) else {
            debug!(id = done.id, "No invokeDone callback for result");
            return;
        };
        unsafe { callback(id, done.success) }
    })
}

/// Register the completion callback, replacing any previous one
#[unsafe(no_mangle)]
pub extern "C" fn interpreter_set_invoke_done(callback: RawInvokeDone) {
    *INVOKE_DONE
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner) = callback;
}

/// # Safety
/// `model` must be valid for reading `len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn interpreter_create(
    model: *const u8,
    len: usize,
    verbosity: c_int,
) -> *mut Interpreter {
    if let Err(e) = setup_logging(verbosity_to_level(verbosity)) {
        debug!("Keeping existing logging: {}", e);
    }
    let Some(runtime) = RUNTIME.get() else {
        warn!("interpreter_create without an installed runtime");
        return std::ptr::null_mut();
    };
    if model.is_null() || len == 0 {
        warn!("interpreter_create with an empty model");
        return std::ptr::null_mut();
    }

    let model = unsafe { std::slice::from_raw_parts(model, len) };
    let options = InterpreterOptions {
        verbosity,
        ..runtime.options.clone()
    };
    match Interpreter::create(
        model,
        runtime.backend.as_ref(),
        runtime.accelerator.as_deref(),
        &runtime.host,
        &options,
    ) {
        Ok(interpreter) => {
            interpreter.set_invoke_done(Some(forward_invoke_done()));
            Box::into_raw(Box::new(interpreter))
        }
        Err(_) => std::ptr::null_mut(),
    }
}

/// # Safety
/// `interpreter` must be null or a handle from `interpreter_create` not yet
/// destroyed. Must not be called on the host thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn interpreter_destroy(interpreter: *mut Interpreter) {
    if !interpreter.is_null() {
        drop(unsafe { Box::from_raw(interpreter) });
    }
}

/// Look up a tensor of a live handle
///
/// # Safety
/// `interpreter` must be null or a live handle.
unsafe fn with_tensor<R>(
    interpreter: *const Interpreter,
    f: impl FnOnce(&dyn Engine) -> Option<&Tensor>,
    read: impl FnOnce(&Tensor) -> R,
) -> Option<R> {
    let interpreter = unsafe { interpreter.as_ref() }?;
    let engine = interpreter.engine();
    f(engine.as_ref()).map(read)
}

/// # Safety
/// `interpreter` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn interpreter_num_inputs(interpreter: *const Interpreter) -> usize {
    unsafe { interpreter.as_ref() }.map_or(0, Interpreter::num_inputs)
}

/// # Safety
/// `interpreter` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn interpreter_num_outputs(interpreter: *const Interpreter) -> usize {
    unsafe { interpreter.as_ref() }.map_or(0, Interpreter::num_outputs)
}

/// Storage of input `index`, writable until the next invocation is queued
///
/// # Safety
/// `interpreter` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn interpreter_input_buffer(
    interpreter: *mut Interpreter,
    index: usize,
) -> *mut u8 {
    let Some(interpreter) = (unsafe { interpreter.as_ref() }) else {
        return std::ptr::null_mut();
    };
    let mut engine = interpreter.engine();
    engine
        .inputs_mut()
        .get_mut(index)
        .map_or(std::ptr::null_mut(), |t| t.data_mut().as_mut_ptr())
}

/// # Safety
/// `interpreter` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn interpreter_output_buffer(
    interpreter: *const Interpreter,
    index: usize,
) -> *const u8 {
    unsafe { with_tensor(interpreter, |e| e.outputs().get(index), |t| t.data().as_ptr()) }
        .unwrap_or(std::ptr::null())
}

/// Rank of input `index`, 0 when there is no such tensor
///
/// # Safety
/// `interpreter` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn interpreter_num_input_dims(
    interpreter: *const Interpreter,
    index: usize,
) -> usize {
    unsafe { with_tensor(interpreter, |e| e.inputs().get(index), Tensor::num_dims) }.unwrap_or(0)
}

/// # Safety
/// `interpreter` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn interpreter_num_output_dims(
    interpreter: *const Interpreter,
    index: usize,
) -> usize {
    unsafe { with_tensor(interpreter, |e| e.outputs().get(index), Tensor::num_dims) }.unwrap_or(0)
}

fn dim_size(tensor: &Tensor, dim: usize) -> usize {
    tensor
        .dim(dim)
        .and_then(|size| usize::try_from(size).ok())
        .unwrap_or(0)
}

/// Extent of `dim` in input `index`, 0 when out of range
///
/// # Safety
/// `interpreter` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn interpreter_input_dim(
    interpreter: *const Interpreter,
    index: usize,
    dim: usize,
) -> usize {
    unsafe { with_tensor(interpreter, |e| e.inputs().get(index), |t| dim_size(t, dim)) }
        .unwrap_or(0)
}

/// # Safety
/// `interpreter` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn interpreter_output_dim(
    interpreter: *const Interpreter,
    index: usize,
    dim: usize,
) -> usize {
    unsafe { with_tensor(interpreter, |e| e.outputs().get(index), |t| dim_size(t, dim)) }
        .unwrap_or(0)
}

/// Queue an invocation; the result is reported to the invokeDone callback
///
/// # Safety
/// `interpreter` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn interpreter_invoke_async(interpreter: *const Interpreter, id: usize) {
    match unsafe { interpreter.as_ref() } {
        Some(interpreter) => interpreter.invoke_async(id as u64),
        None => warn!(id, "interpreter_invoke_async on a null handle"),
    }
}
