//! Compute worker thread
//!
//! Dedicated thread that serializes invocations of the engine. Requests
//! arrive on a [`BlockingQueue`] and each result is reported as an
//! [`InvokeDone`] event on an unbounded channel consumed on the host context,
//! so the worker never waits on the host to deliver a result.
//!
//! ```text
//!  invoke(id) ──► BlockingQueue<Command> ──► worker thread ──► engine.invoke()
//!                                                  │
//!                           host context ◄─────────┘ InvokeDone { id, success }
//! ```

use crate::engine::Engine;
use common::{BlockingQueue, HostHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Engine shared between the worker and tensor accessors
pub type SharedEngine = Arc<Mutex<Box<dyn Engine>>>;

/// Command consumed by the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Invoke(u64),
    /// Stop after the commands queued ahead of it
    Shutdown,
}

/// Completion of one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvokeDone {
    pub id: u64,
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Stopped,
}

/// Owner of the compute worker thread
///
/// Dropping it queues [`Command::Shutdown`] and joins the thread. It must
/// not be dropped on the host thread while a delegate may be waiting on the
/// host.
pub struct ComputeWorker {
    commands: Arc<BlockingQueue<Command>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ComputeWorker {
    /// Start the worker thread
    ///
    /// `poll_timeout` bounds each wait on the command queue.
    pub fn spawn(
        engine: SharedEngine,
        events: async_channel::Sender<InvokeDone>,
        poll_timeout: Duration,
    ) -> common::Result<Self> {
        let commands = Arc::new(BlockingQueue::new());
        let running = Arc::new(AtomicBool::new(true));

        let thread = std::thread::Builder::new()
            .name("compute-worker".to_string())
            .spawn({
                let commands = commands.clone();
                let running = running.clone();
                move || {
                    run(&engine, &commands, &events, poll_timeout);
                    running.store(false, Ordering::SeqCst);
                }
            })?;

        Ok(Self {
            commands,
            running,
            thread: Some(thread),
        })
    }

    /// Queue an invocation; completion is reported with the same `id`
    pub fn invoke(&self, id: u64) {
        debug!(id, "Queueing invocation");
        self.commands.push(Command::Invoke(id));
    }

    pub fn state(&self) -> WorkerState {
        if self.running.load(Ordering::SeqCst) {
            WorkerState::Running
        } else {
            WorkerState::Stopped
        }
    }

    /// Commands not yet picked up by the worker
    pub fn queued(&self) -> usize {
        self.commands.len()
    }
}

impl Drop for ComputeWorker {
    fn drop(&mut self) {
        if HostHandle::on_host_thread() {
            warn!("Joining compute worker from the host thread");
        }
        self.commands.push(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Compute worker thread panicked");
            }
        }
    }
}

fn run(
    engine: &SharedEngine,
    commands: &BlockingQueue<Command>,
    events: &async_channel::Sender<InvokeDone>,
    poll_timeout: Duration,
) {
    info!("Compute worker started");

    loop {
        let Some(command) = commands.pop(poll_timeout) else {
            continue;
        };
        match command {
            Command::Shutdown => break,
            Command::Invoke(id) => {
                let success = invoke(engine, id);
                if events.try_send(InvokeDone { id, success }).is_err() {
                    debug!(id, "No listener for invocation result");
                }
            }
        }
    }

    info!("Compute worker stopped");
}

/// Run the engine once, containing panics to this invocation
fn invoke(engine: &SharedEngine, id: u64) -> bool {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .invoke()
    }));

    match result {
        Ok(Ok(())) => {
            debug!(id, "Invocation succeeded");
            true
        }
        Ok(Err(e)) => {
            warn!("Invocation {} failed: {}", id, e);
            false
        }
        Err(_) => {
            error!("Panic in engine during invocation {}", id);
            false
        }
    }
}
