//! Contract properties every [Queue] engine must satisfy.
//!
//! Each engine's tests construct an instance with the documented configuration and call into
//! these helpers.

use crate::{Error, Message, Queue};
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

/// Queue one message and take it back.
pub fn queue_then_take(queue: &impl Queue<u64>) {
    let message = Message::new("hello");
    queue.queue(&message).unwrap();
    assert_eq!(queue.queue_size().unwrap(), Some(1));

    let taken = queue.take().unwrap().expect("message should be visible");
    assert_eq!(taken.data().as_ref(), b"hello");
    assert_eq!(taken.num_requeues(), 0);
    assert!(taken.id().is_some());
    assert!(taken.queue_timestamp() >= taken.timestamp());
    assert_eq!(queue.queue_size().unwrap(), Some(0));
    assert_eq!(queue.ephemeral_size().unwrap(), Some(1));
}

/// Taking from an empty queue returns `None` and changes nothing.
pub fn take_empty(queue: &impl Queue<u64>) {
    let size = queue.queue_size().unwrap();
    let ephemeral = queue.ephemeral_size().unwrap();
    assert!(queue.take().unwrap().is_none());
    assert_eq!(queue.queue_size().unwrap(), size);
    assert_eq!(queue.ephemeral_size().unwrap(), ephemeral);
}

/// A finished message is gone, and finishing twice is harmless.
pub fn finish_clears(queue: &impl Queue<u64>) {
    queue.queue(&Message::new("work")).unwrap();
    let taken = queue.take().unwrap().unwrap();
    queue.finish(&taken).unwrap();
    assert_eq!(queue.queue_size().unwrap(), Some(0));
    assert_eq!(queue.ephemeral_size().unwrap(), Some(0));

    queue.finish(&taken).unwrap();
    assert_eq!(queue.ephemeral_size().unwrap(), Some(0));
    assert!(queue.take().unwrap().is_none());
}

/// Producer-assigned ids survive the round trip and caller-side mutation does not leak in.
pub fn copies_on_queue(queue: &impl Queue<u64>) {
    let mut message = Message::with_id(4242, "original");
    queue.queue(&message).unwrap();
    message.set_data("mutated");

    let taken = queue.take().unwrap().unwrap();
    assert_eq!(taken.id(), Some(&4242));
    assert_eq!(taken.data().as_ref(), b"original");
    queue.finish(&taken).unwrap();
}

/// Messages come back in the order they were queued.
pub fn fifo(queue: &impl Queue<u64>) {
    for i in 0..10u8 {
        queue.queue(&Message::new(vec![i])).unwrap();
    }
    for i in 0..10u8 {
        let taken = queue.take().unwrap().unwrap();
        assert_eq!(taken.data().as_ref(), &[i]);
        queue.finish(&taken).unwrap();
    }
}

/// In-flight messages are reported as orphans only once the threshold has elapsed.
pub fn orphans_after_threshold(queue: &impl Queue<u64>) {
    queue.queue(&Message::new("slow")).unwrap();
    let taken = queue.take().unwrap().unwrap();

    let orphans = queue.orphans(Duration::from_secs(10)).unwrap();
    assert_eq!(orphans.map(|o| o.len()), Some(0));

    thread::sleep(Duration::from_millis(1_500));
    let orphans = queue.orphans(Duration::from_secs(1)).unwrap().unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].id(), taken.id());
    assert_eq!(orphans[0].data().as_ref(), b"slow");

    // The scan is read-only
    assert_eq!(queue.ephemeral_size().unwrap(), Some(1));
    assert_eq!(queue.queue_size().unwrap(), Some(0));
}

/// With `max_size` in-flight messages, the next take fails and leaves the queue untouched.
pub fn ephemeral_bound(queue: &impl Queue<u64>, max_size: usize) {
    let total = max_size + 3;
    for i in 0..total {
        queue.queue(&Message::new(format!("m{i}"))).unwrap();
    }
    let mut taken = Vec::new();
    for _ in 0..max_size {
        taken.push(queue.take().unwrap().unwrap());
    }
    assert!(matches!(queue.take(), Err(Error::EphemeralFull)));
    assert_eq!(queue.queue_size().unwrap(), Some(total - max_size));
    assert_eq!(queue.ephemeral_size().unwrap(), Some(max_size));

    // Finishing frees capacity without affecting the queue
    let mut last = max_size;
    for message in &taken {
        queue.finish(message).unwrap();
        let current = queue.ephemeral_size().unwrap().unwrap();
        assert!(current < last);
        last = current;
        assert_eq!(queue.queue_size().unwrap(), Some(total - max_size));
    }
    assert!(queue.take().unwrap().is_some());
}

/// `requeue` increments the counter, `requeue_silent` does not; both make the message visible.
pub fn requeue_counts(queue: &impl Queue<u64>) {
    queue.queue(&Message::new("retry")).unwrap();
    let taken = queue.take().unwrap().unwrap();
    let id = taken.id().copied();

    queue.requeue(&taken).unwrap();
    assert_eq!(queue.ephemeral_size().unwrap(), Some(0));
    assert_eq!(queue.queue_size().unwrap(), Some(1));
    let taken = queue.take().unwrap().unwrap();
    assert_eq!(taken.id().copied(), id);
    assert_eq!(taken.num_requeues(), 1);
    assert!(taken.queue_timestamp() >= taken.timestamp());

    queue.requeue_silent(&taken).unwrap();
    assert_eq!(queue.ephemeral_size().unwrap(), Some(0));
    let taken = queue.take().unwrap().unwrap();
    assert_eq!(taken.id().copied(), id);
    assert_eq!(taken.num_requeues(), 1);

    queue.requeue(&taken).unwrap();
    let taken = queue.take().unwrap().unwrap();
    assert_eq!(taken.num_requeues(), 2);
    queue.finish(&taken).unwrap();
    assert!(queue.take().unwrap().is_none());
}

/// An orphan can be moved back explicitly; a finished one cannot.
pub fn move_to_queue(queue: &impl Queue<u64>) {
    queue.queue(&Message::new("stuck")).unwrap();
    let taken = queue.take().unwrap().unwrap();

    assert!(queue.move_to_queue(&taken).unwrap());
    assert_eq!(queue.ephemeral_size().unwrap(), Some(0));
    assert_eq!(queue.queue_size().unwrap(), Some(1));

    let again = queue.take().unwrap().unwrap();
    assert_eq!(again.id(), taken.id());
    assert_eq!(again.num_requeues(), 0);
    queue.finish(&again).unwrap();

    // Raced with finish
    assert!(!queue.move_to_queue(&again).unwrap());
    assert_eq!(queue.queue_size().unwrap(), Some(0));
}

/// With tracking disabled, taken messages are gone immediately.
pub fn ephemeral_disabled(queue: &impl Queue<u64>) {
    queue.queue(&Message::new("fire-and-forget")).unwrap();
    let taken = queue.take().unwrap().unwrap();
    assert_eq!(queue.ephemeral_size().unwrap(), Some(0));
    assert!(queue.orphans(Duration::ZERO).unwrap().is_none());
    assert!(!queue.move_to_queue(&taken).unwrap());
    queue.finish(&taken).unwrap();
    assert_eq!(queue.queue_size().unwrap(), Some(0));

    // Requeue still makes the message visible again
    queue.requeue(&taken).unwrap();
    let again = queue.take().unwrap().unwrap();
    assert_eq!(again.num_requeues(), 1);
}

/// `producers` threads queue `per_producer` unique payloads each while `consumers` threads drain
/// and finish. Every payload must be finished exactly once.
pub fn concurrent_drain<Q: Queue<u64> + 'static>(
    queue: Arc<Q>,
    producers: usize,
    consumers: usize,
    per_producer: usize,
) {
    let done = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(Mutex::new(Vec::new()));
    let full = Arc::new(AtomicUsize::new(0));

    // Start consumers
    let mut consumer_handles = Vec::new();
    for _ in 0..consumers {
        let queue = queue.clone();
        let done = done.clone();
        let finished = finished.clone();
        consumer_handles.push(thread::spawn(move || loop {
            match queue.take() {
                Ok(Some(message)) => {
                    let payload = String::from_utf8(message.data().to_vec()).unwrap();
                    queue.finish(&message).unwrap();
                    finished.lock().unwrap().push(payload);
                }
                Ok(None) => {
                    if done.load(Ordering::Acquire) && queue.queue_size().unwrap() == Some(0) {
                        return;
                    }
                    thread::yield_now();
                }
                Err(Error::EphemeralFull) => thread::yield_now(),
                Err(err) => panic!("take failed: {err}"),
            }
        }));
    }

    // Start producers
    let mut producer_handles = Vec::new();
    for p in 0..producers {
        let queue = queue.clone();
        let full = full.clone();
        producer_handles.push(thread::spawn(move || {
            for m in 0..per_producer {
                let message = Message::new(format!("{p}-{m}"));
                loop {
                    match queue.queue(&message) {
                        Ok(()) => break,
                        Err(Error::QueueFull) => {
                            full.fetch_add(1, Ordering::Relaxed);
                            thread::yield_now();
                        }
                        Err(err) => panic!("queue failed: {err}"),
                    }
                }
            }
        }));
    }
    for handle in producer_handles {
        handle.join().unwrap();
    }
    done.store(true, Ordering::Release);
    for handle in consumer_handles {
        handle.join().unwrap();
    }

    // Every payload finished exactly once
    let finished = finished.lock().unwrap();
    assert_eq!(finished.len(), producers * per_producer);
    let unique: HashSet<_> = finished.iter().cloned().collect();
    assert_eq!(unique.len(), finished.len(), "duplicate delivery");
    for p in 0..producers {
        for m in 0..per_producer {
            assert!(unique.contains(&format!("{p}-{m}")), "lost {p}-{m}");
        }
    }
    assert_eq!(queue.queue_size().unwrap(), Some(0));
    assert_eq!(queue.ephemeral_size().unwrap(), Some(0));
}

/// `workers` threads each take and return a message `rounds` times, alternating between
/// `requeue` and `move_to_queue`. A copy taken right after a requeue must still be in flight.
pub fn requeue_while_taking(queue: &impl Queue<u64>, workers: usize, rounds: usize) {
    for i in 0..workers as u64 {
        queue.queue(&Message::with_id(i, vec![i as u8])).unwrap();
    }
    thread::scope(|s| {
        for _ in 0..workers {
            s.spawn(|| {
                let mut done = 0;
                while done < rounds {
                    let Some(taken) = queue.take().unwrap() else {
                        thread::yield_now();
                        continue;
                    };
                    thread::yield_now();
                    if done % 2 == 0 {
                        queue.requeue(&taken).unwrap();
                    } else {
                        let moved = queue.move_to_queue(&taken).unwrap();
                        assert!(moved, "{:?} no longer in flight", taken.id());
                    }
                    done += 1;
                }
            });
        }
    });
    assert_eq!(queue.queue_size().unwrap(), Some(workers));
    assert_eq!(queue.ephemeral_size().unwrap(), Some(0));
}
