//! Host execution context
//!
//! The host is a single cooperative executor: every asynchronous bridge
//! operation runs there, and completions that must be observed by the
//! embedding application are delivered there. [`HostRuntime`] owns that
//! executor (a current-thread Tokio runtime on a dedicated `host` thread);
//! [`HostHandle`] lets other threads hand work to it.
//!
//! Synchronous callers use [`HostHandle::block_on`]: the future runs on the
//! host while the calling thread waits for the result. The host thread itself
//! can never wait on its own work, so `block_on` from the host is refused.

use std::cell::Cell;
use std::future::Future;
use std::thread::JoinHandle;
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

thread_local! {
    static ON_HOST: Cell<bool> = const { Cell::new(false) };
}

/// Cloneable handle used to hand work to the host context
#[derive(Clone, Debug)]
pub struct HostHandle {
    runtime: Handle,
}

impl HostHandle {
    /// Wrap the handle of an externally owned runtime
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Use the runtime the caller is currently running on as the host
    pub fn current() -> crate::Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| crate::Error::Host(e.to_string()))
    }

    /// Whether the calling thread is the host thread of a [`HostRuntime`]
    pub fn on_host_thread() -> bool {
        ON_HOST.with(Cell::get)
    }

    /// Run a future on the host without waiting for it
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        drop(self.runtime.spawn(future));
    }

    /// Run a future on the host and wait for its output on this thread
    ///
    /// Fails instead of deadlocking when called from the host thread, and
    /// when the host stops before the future completes. Must not be called
    /// from inside another async runtime.
    pub fn block_on<F>(&self, future: F) -> crate::Result<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if Self::on_host_thread() {
            return Err(crate::Error::Host(
                "blocking wait issued from the host thread".to_string(),
            ));
        }

        let (tx, rx) = oneshot::channel();
        self.spawn(async move {
            let _ = tx.send(future.await);
        });

        rx.blocking_recv().map_err(|_| {
            crate::Error::Host("host context stopped before the call completed".to_string())
        })
    }
}

/// Owner of the host executor thread
///
/// Dropping the runtime stops the executor and joins its thread. Futures
/// still pending at that point are dropped.
pub struct HostRuntime {
    handle: HostHandle,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl HostRuntime {
    /// Start the host executor on a new thread
    pub fn start() -> crate::Result<Self> {
        let (handle_tx, handle_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("host".to_string())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = handle_tx.send(Err(e));
                        return;
                    }
                };

                ON_HOST.with(|flag| flag.set(true));
                let _ = handle_tx.send(Ok(runtime.handle().clone()));

                info!("Host context started");
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
                debug!("Host context shutting down");
            })?;

        let runtime = handle_rx
            .blocking_recv()
            .map_err(|_| crate::Error::Host("host thread exited during startup".to_string()))??;

        Ok(Self {
            handle: HostHandle::new(runtime),
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> HostHandle {
        self.handle.clone()
    }
}

impl Drop for HostRuntime {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Host thread panicked");
            }
        }
        info!("Host context stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_block_on_runs_on_host_thread() {
        let host = HostRuntime::start().unwrap();
        let on_host = host
            .handle()
            .block_on(async { HostHandle::on_host_thread() })
            .unwrap();

        assert!(on_host);
        assert!(!HostHandle::on_host_thread());
    }

    #[test]
    fn test_block_on_awaits_async_work() {
        let host = HostRuntime::start().unwrap();
        let value = host
            .handle()
            .block_on(async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                42
            })
            .unwrap();

        assert_eq!(value, 42);
    }

    #[test]
    fn test_block_on_from_host_is_refused() {
        let host = HostRuntime::start().unwrap();
        let handle = host.handle();
        let nested = handle
            .block_on({
                let handle = handle.clone();
                async move { handle.block_on(async { 1 }).is_err() }
            })
            .unwrap();

        assert!(nested);
    }

    #[test]
    fn test_block_on_from_many_threads() {
        let host = HostRuntime::start().unwrap();
        let workers: Vec<_> = (0..4u32)
            .map(|i| {
                let handle = host.handle();
                std::thread::spawn(move || handle.block_on(async move { i * 2 }).unwrap())
            })
            .collect();

        let results: Vec<u32> = workers.into_iter().map(|w| w.join().unwrap()).collect();
        assert_eq!(results, vec![0, 2, 4, 6]);
    }

    #[test]
    fn test_block_on_after_shutdown_fails() {
        let host = HostRuntime::start().unwrap();
        let handle = host.handle();
        drop(host);

        assert!(handle.block_on(async { 1 }).is_err());
    }
}
