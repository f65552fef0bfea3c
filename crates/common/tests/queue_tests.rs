//! Blocking queue integration tests
//!
//! Run with: `cargo test -p common --test queue_tests`

use common::BlockingQueue;
use common::test_utils::wait_until;
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const SHORT: Duration = Duration::from_millis(1);

// ============================================================================
// Ordering
// ============================================================================

proptest! {
    /// Property: items pushed by one producer are popped in push order
    #[test]
    fn prop_single_producer_fifo(items in proptest::collection::vec(any::<u32>(), 0..200)) {
        let queue = BlockingQueue::new();
        for item in &items {
            queue.push(*item);
        }

        let mut popped = Vec::with_capacity(items.len());
        while let Some(item) = queue.pop(SHORT) {
            popped.push(item);
        }
        prop_assert_eq!(popped, items);
    }

    /// Property: interleaved push/pop never reorders
    #[test]
    fn prop_interleaved_fifo(ops in proptest::collection::vec(any::<bool>(), 1..200)) {
        let queue = BlockingQueue::new();
        let mut next = 0u32;
        let mut expected = 0u32;

        for push in ops {
            if push {
                queue.push(next);
                next += 1;
            } else if let Some(item) = queue.try_pop() {
                prop_assert_eq!(item, expected);
                expected += 1;
            }
        }
        prop_assert_eq!(queue.len() as u32, next - expected);
    }
}

#[test]
fn test_each_producer_order_preserved() {
    let queue = Arc::new(BlockingQueue::new());
    let producers: Vec<_> = (0..4u32)
        .map(|p| {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..250u32 {
                    queue.push((p, i));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let mut last = [None::<u32>; 4];
    let mut count = 0;
    while let Some((p, i)) = queue.pop(SHORT) {
        if let Some(prev) = last[p as usize] {
            assert!(i > prev, "producer {} reordered: {} after {}", p, i, prev);
        }
        last[p as usize] = Some(i);
        count += 1;
    }
    assert_eq!(count, 1000);
}

// ============================================================================
// Timeouts
// ============================================================================

#[test]
fn test_pop_returns_none_only_after_timeout() {
    let queue: BlockingQueue<()> = BlockingQueue::new();
    for millis in [5u64, 20, 50] {
        let timeout = Duration::from_millis(millis);
        let start = Instant::now();
        assert!(queue.pop(timeout).is_none());
        assert!(start.elapsed() >= timeout);
    }
}

#[test]
fn test_item_pushed_before_timeout_is_delivered() {
    let queue = Arc::new(BlockingQueue::new());
    let producer = {
        let queue = queue.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            queue.push("late");
        })
    };

    let start = Instant::now();
    assert_eq!(queue.pop(Duration::from_secs(5)), Some("late"));
    assert!(start.elapsed() < Duration::from_secs(5));
    producer.join().unwrap();
}

#[test]
fn test_consumer_polling_loop_sees_every_item() {
    let queue = Arc::new(BlockingQueue::new());
    let received = Arc::new(AtomicUsize::new(0));

    let consumer = {
        let queue = queue.clone();
        let received = received.clone();
        thread::spawn(move || {
            loop {
                match queue.pop(Duration::from_millis(10)) {
                    Some(None) => break,
                    Some(Some(_)) => {
                        received.fetch_add(1, Ordering::SeqCst);
                    }
                    None => continue,
                }
            }
        })
    };

    for i in 0..100u32 {
        queue.push(Some(i));
        if i % 10 == 0 {
            thread::sleep(Duration::from_millis(15));
        }
    }
    assert!(wait_until(Duration::from_secs(5), || {
        received.load(Ordering::SeqCst) == 100
    }));

    queue.push(None);
    consumer.join().unwrap();
    assert!(queue.is_empty());
}
