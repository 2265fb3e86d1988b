use std::{
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use workpool::{BoundedQueue, Interrupt};

#[test]
#[should_panic(expected = "queue capacity must be non-zero")]
fn zero_capacity_panics() {
    BoundedQueue::<i32>::new(0);
}

#[test]
fn fifo_order() {
    let queue = BoundedQueue::new(8);
    let interrupt = Interrupt::new();

    for i in 0..5 {
        queue.offer(i).unwrap();
    }

    assert_eq!(queue.len(), 5);

    for i in 0..5 {
        assert_eq!(queue.take(&interrupt), Some(i));
    }

    assert!(queue.is_empty());
}

#[test]
fn offer_full_returns_value() {
    let queue = BoundedQueue::new(2);

    assert!(queue.offer(1).is_ok());
    assert!(queue.offer(2).is_ok());
    assert_eq!(queue.offer(3), Err(3));
    assert_eq!(queue.len(), 2);
}

#[test]
fn put_blocks_until_take_makes_room() {
    let queue = Arc::new(BoundedQueue::new(1));
    queue.offer(1).unwrap();

    let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);

    let producer = {
        let queue = Arc::clone(&queue);

        thread::spawn(move || {
            entered_tx.send(()).unwrap();
            queue.put(2, &Interrupt::new())
        })
    };

    entered_rx.recv().unwrap();

    // The producer should be parked on the full queue.
    thread::sleep(Duration::from_millis(50));
    assert_eq!(queue.len(), 1);

    let interrupt = Interrupt::new();
    assert_eq!(queue.take(&interrupt), Some(1));

    // Taking made room; the blocked put must now complete and the element
    // must actually be enqueued.
    assert_eq!(producer.join().unwrap(), Ok(()));
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.take(&interrupt), Some(2));
}

#[test]
fn poll_times_out_on_empty_queue() {
    let queue = BoundedQueue::<i32>::new(4);

    let start = Instant::now();
    let polled = queue.poll(Duration::from_millis(50), &Interrupt::new());

    assert_eq!(polled, None);
    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[test]
fn poll_returns_available_value() {
    let queue = BoundedQueue::new(4);
    queue.offer(7).unwrap();

    assert_eq!(queue.poll(Duration::from_secs(10), &Interrupt::new()), Some(7));
}

#[test]
fn interrupt_wakes_blocked_take() {
    let queue = Arc::new(BoundedQueue::<i32>::new(4));
    let interrupt = Interrupt::new();

    let consumer = {
        let queue = Arc::clone(&queue);
        let interrupt = interrupt.clone();

        thread::spawn(move || queue.take(&interrupt))
    };

    thread::sleep(Duration::from_millis(50));

    interrupt.interrupt();
    queue.wake_consumers();

    assert_eq!(consumer.join().unwrap(), None);
}

#[test]
fn interrupt_hands_value_back_from_blocked_put() {
    let queue = Arc::new(BoundedQueue::new(1));
    queue.offer(1).unwrap();

    let interrupt = Interrupt::new();

    let producer = {
        let queue = Arc::clone(&queue);
        let interrupt = interrupt.clone();

        thread::spawn(move || queue.put(2, &interrupt))
    };

    thread::sleep(Duration::from_millis(50));

    interrupt.interrupt();
    queue.wake_producers();

    assert_eq!(producer.join().unwrap(), Err(2));
    assert_eq!(queue.len(), 1);
}

#[test]
fn interrupted_take_drains_remaining_items() {
    let queue = BoundedQueue::new(4);
    let interrupt = Interrupt::new();

    queue.offer(1).unwrap();
    queue.offer(2).unwrap();

    interrupt.interrupt();

    // Available work outranks the interrupt; `None` only comes once the
    // queue has nothing left.
    assert_eq!(queue.take(&interrupt), Some(1));
    assert_eq!(queue.poll(Duration::from_secs(10), &interrupt), Some(2));
    assert_eq!(queue.take(&interrupt), None);
    assert_eq!(queue.poll(Duration::from_secs(10), &interrupt), None);
}

#[test]
fn drain_preserves_order_and_empties() {
    let queue = BoundedQueue::new(8);

    for i in 1..=4 {
        queue.offer(i).unwrap();
    }

    assert_eq!(queue.drain(), vec![1, 2, 3, 4]);
    assert!(queue.is_empty());

    // The queue must be fully usable after a drain.
    queue.offer(9).unwrap();
    assert_eq!(queue.take(&Interrupt::new()), Some(9));
}

#[test]
fn drain_on_empty_queue_is_empty() {
    let queue = BoundedQueue::<i32>::new(4);

    assert!(queue.drain().is_empty());
    assert!(queue.is_empty());
}

/// Two producers churn through a tiny queue against one consumer. The
/// reported size must never exceed the capacity, every element must come
/// out exactly once, and each producer's elements must be consumed in the
/// order they were produced.
#[test]
fn concurrent_churn_keeps_invariants() {
    const PER_PRODUCER: usize = 250;
    const CAPACITY: usize = 4;

    let queue = Arc::new(BoundedQueue::new(CAPACITY));
    let consumed = Arc::new(Mutex::new(Vec::new()));

    let producers: Vec<_> = (0..2)
        .map(|p| {
            let queue = Arc::clone(&queue);

            thread::spawn(move || {
                let interrupt = Interrupt::new();

                for i in 0..PER_PRODUCER {
                    queue.put((p, i), &interrupt).unwrap();
                }
            })
        })
        .collect();

    let consumer = {
        let queue = Arc::clone(&queue);
        let consumed = Arc::clone(&consumed);

        thread::spawn(move || {
            let interrupt = Interrupt::new();

            for _ in 0..2 * PER_PRODUCER {
                let item = queue.take(&interrupt).unwrap();
                consumed.lock().unwrap().push(item);
            }
        })
    };

    // Sample the size invariant while the churn is in flight.
    let deadline = Instant::now() + Duration::from_millis(200);
    while Instant::now() < deadline {
        assert!(queue.len() <= CAPACITY);
        thread::yield_now();
    }

    for p in producers {
        p.join().unwrap();
    }
    consumer.join().unwrap();

    let consumed = consumed.lock().unwrap();
    assert_eq!(consumed.len(), 2 * PER_PRODUCER);
    assert!(queue.is_empty());

    // Per-producer FIFO: the sequence numbers of each producer must appear
    // in increasing order.
    for p in 0..2 {
        let sequence: Vec<_> = consumed.iter().filter(|(q, _)| *q == p).map(|(_, i)| *i).collect();
        assert_eq!(sequence, (0..PER_PRODUCER).collect::<Vec<_>>());
    }
}
