//! Compute worker tests
//!
//! Tests the worker thread in isolation:
//! - FIFO processing regardless of compute time
//! - Failure and panic reporting
//! - Shutdown liveness
//!
//! Run with: `cargo test -p interpreter --test worker_tests`

use interpreter::{
    ComputeWorker, Delegate, Engine, EngineError, EngineResult, InvokeDone, SharedEngine, Tensor,
    WorkerState,
};
use proptest::prelude::*;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const POLL: Duration = Duration::from_millis(250);

/// What the scripted engine does on each call
#[derive(Debug, Clone, Copy)]
enum Step {
    Sleep(Duration),
    Fail,
    Panic,
}

struct ScriptedEngine {
    script: VecDeque<Step>,
    calls: Arc<Mutex<Vec<std::thread::ThreadId>>>,
}

impl Engine for ScriptedEngine {
    fn apply_delegate(&mut self, _delegate: Box<dyn Delegate>) -> EngineResult<()> {
        Ok(())
    }

    fn allocate_tensors(&mut self) -> EngineResult<()> {
        Ok(())
    }

    fn inputs(&self) -> &[Tensor] {
        &[]
    }

    fn inputs_mut(&mut self) -> &mut [Tensor] {
        &mut []
    }

    fn outputs(&self) -> &[Tensor] {
        &[]
    }

    fn invoke(&mut self) -> EngineResult<()> {
        self.calls.lock().unwrap().push(std::thread::current().id());
        match self.script.pop_front() {
            Some(Step::Sleep(d)) => {
                std::thread::sleep(d);
                Ok(())
            }
            Some(Step::Fail) => Err(EngineError::Invoke("scripted failure".to_string())),
            Some(Step::Panic) => panic!("scripted panic"),
            None => Ok(()),
        }
    }
}

struct Harness {
    worker: ComputeWorker,
    events: async_channel::Receiver<InvokeDone>,
    calls: Arc<Mutex<Vec<std::thread::ThreadId>>>,
}

fn harness(script: Vec<Step>, poll: Duration) -> Harness {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let engine: Box<dyn Engine> = Box::new(ScriptedEngine {
        script: script.into(),
        calls: calls.clone(),
    });
    let engine: SharedEngine = Arc::new(Mutex::new(engine));
    let (tx, events) = async_channel::unbounded();
    let worker = ComputeWorker::spawn(engine, tx, poll).unwrap();
    Harness {
        worker,
        events,
        calls,
    }
}

fn next_event(events: &async_channel::Receiver<InvokeDone>) -> InvokeDone {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(done) = events.try_recv() {
            return done;
        }
        assert!(Instant::now() < deadline, "no invocation result");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_invocations_complete_in_order() {
    let h = harness(
        vec![
            Step::Sleep(Duration::from_millis(60)),
            Step::Sleep(Duration::from_millis(5)),
            Step::Sleep(Duration::from_millis(30)),
        ],
        POLL,
    );

    for id in 1..=3 {
        h.worker.invoke(id);
    }

    let ids: Vec<u64> = (0..3).map(|_| next_event(&h.events).id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[test]
fn test_engine_runs_only_on_worker_thread() {
    let h = harness(Vec::new(), POLL);
    h.worker.invoke(1);
    h.worker.invoke(2);
    next_event(&h.events);
    next_event(&h.events);

    let calls = h.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], calls[1]);
    assert_ne!(calls[0], std::thread::current().id());
}

#[test]
fn test_failure_and_panic_are_reported() {
    let h = harness(vec![Step::Fail, Step::Panic, Step::Sleep(Duration::ZERO)], POLL);
    for id in [10, 11, 12] {
        h.worker.invoke(id);
    }

    assert_eq!(next_event(&h.events), InvokeDone { id: 10, success: false });
    assert_eq!(next_event(&h.events), InvokeDone { id: 11, success: false });
    assert_eq!(next_event(&h.events), InvokeDone { id: 12, success: true });
    assert_eq!(h.worker.state(), WorkerState::Running);
}

#[test]
fn test_idle_worker_keeps_running() {
    let h = harness(Vec::new(), Duration::from_millis(10));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(h.worker.state(), WorkerState::Running);
    assert_eq!(h.worker.queued(), 0);
    assert!(h.events.is_empty());
}

#[test]
fn test_shutdown_is_bounded_by_poll_cycle() {
    let h = harness(Vec::new(), POLL);
    std::thread::sleep(Duration::from_millis(20));

    let start = Instant::now();
    drop(h.worker);
    assert!(start.elapsed() < POLL * 2);
    assert!(h.events.is_closed());
}

#[test]
fn test_shutdown_serves_queued_commands() {
    let h = harness(vec![Step::Sleep(Duration::from_millis(20)); 3], POLL);
    for id in 1..=3 {
        h.worker.invoke(id);
    }
    drop(h.worker);

    let results: Vec<InvokeDone> = std::iter::from_fn(|| h.events.try_recv().ok()).collect();
    assert_eq!(
        results.iter().map(|d| d.id).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(results.iter().all(|d| d.success));
}

#[test]
fn test_results_survive_dropped_listener() {
    let h = harness(Vec::new(), POLL);
    drop(h.events);
    h.worker.invoke(1);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(h.worker.state(), WorkerState::Running);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// Property: results come back in submission order for any ids
    #[test]
    fn prop_fifo_for_any_ids(ids in proptest::collection::vec(any::<u64>(), 1..32)) {
        let h = harness(Vec::new(), POLL);
        for &id in &ids {
            h.worker.invoke(id);
        }
        let seen: Vec<u64> = ids.iter().map(|_| next_event(&h.events).id).collect();
        prop_assert_eq!(seen, ids);
    }
}
