//! Host-side delivery of invocation results
//!
//! A task on the host context receives [`InvokeDone`] events from the compute
//! worker. A result whose id has a registered waiter resolves that waiter;
//! any other result goes to the raw completion handler, if one is set.

use crate::worker::InvokeDone;
use common::HostHandle;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Callback for results nobody is awaiting
pub type InvokeDoneHandler = Arc<dyn Fn(InvokeDone) + Send + Sync>;

#[derive(Default)]
struct Routes {
    waiters: HashMap<u64, oneshot::Sender<bool>>,
    handler: Option<InvokeDoneHandler>,
}

#[derive(Clone)]
pub struct Dispatcher {
    routes: Arc<Mutex<Routes>>,
}

impl Dispatcher {
    /// Spawn the dispatch task on `host`
    ///
    /// The task ends once every sender of `events` is gone.
    pub fn start(host: &HostHandle, events: async_channel::Receiver<InvokeDone>) -> Self {
        let dispatcher = Self {
            routes: Arc::new(Mutex::new(Routes::default())),
        };

        host.spawn({
            let dispatcher = dispatcher.clone();
            async move {
                while let Ok(done) = events.recv().await {
                    dispatcher.dispatch(done);
                }
                debug!("Invocation event channel closed");
                dispatcher.routes().waiters.clear();
            }
        });

        dispatcher
    }

    /// Wait for the result of `id`
    ///
    /// Must be called before the invocation is queued.
    pub fn register(&self, id: u64) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        self.routes().waiters.insert(id, tx);
        rx
    }

    /// Drop the waiter of `id`, if still registered
    pub fn forget(&self, id: u64) {
        self.routes().waiters.remove(&id);
    }

    pub fn set_handler(&self, handler: Option<InvokeDoneHandler>) {
        self.routes().handler = handler;
    }

    fn dispatch(&self, done: InvokeDone) {
        let (waiter, handler) = {
            let mut routes = self.routes();
            (routes.waiters.remove(&done.id), routes.handler.clone())
        };

        match (waiter, handler) {
            (Some(waiter), _) => {
                let _ = waiter.send(done.success);
            }
            (None, Some(handler)) => handler(done),
            (None, None) => trace!(id = done.id, "Unclaimed invocation result"),
        }
    }

    fn routes(&self) -> MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
