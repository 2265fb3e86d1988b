//! A capacity-bounded FIFO queue using the two-lock algorithm.
//!
//! Producers and consumers synchronize on independent locks (`tail` and
//! `head` respectively) so that an enqueue never contends with a dequeue.
//! The price of the split is an explicit cross-signal discipline: a producer
//! that makes the queue non-empty must wake a consumer through the
//! *consumer's* lock, and a consumer that makes the queue non-full must wake
//! a producer through the *producer's* lock. Both signals are load-bearing;
//! dropping either one causes missed wakeups.

use std::{
    ptr,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
        Condvar,
        Mutex,
        PoisonError,
    },
    time::{Duration, Instant},
};

/// A cooperative interruption token for threads blocked on a
/// [`BoundedQueue`].
///
/// Consumers check the token only when the queue is empty, so an
/// interrupted consumer still drains available work before giving up;
/// producers check it before each wait.
/// Setting the token alone does not wake a blocked thread; after calling
/// [`interrupt`](Interrupt::interrupt), the interrupting thread must also
/// call [`BoundedQueue::wake_consumers`] or [`BoundedQueue::wake_producers`]
/// for whichever side the target may be blocked on.
#[derive(Clone, Debug, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the token as interrupted. The flag is one-shot; it is never
    /// cleared.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

struct Node<T> {
    value: Option<T>,
    next: *mut Node<T>,
}

impl<T> Node<T> {
    fn sentinel() -> *mut Self {
        Box::into_raw(Box::new(Node {
            value: None,
            next: ptr::null_mut(),
        }))
    }

    fn alloc(value: T) -> *mut Self {
        Box::into_raw(Box::new(Node {
            value: Some(value),
            next: ptr::null_mut(),
        }))
    }
}

/// A bounded FIFO work queue with independent producer and consumer locks.
///
/// The queue is a singly-linked list whose head is a sentinel node that
/// never carries a value. `head` (guarded by the take-side lock) points at
/// the sentinel; `tail` (guarded by the put-side lock) points at the last
/// node. `count` tracks the number of value-carrying nodes and is the only
/// state both sides read.
///
/// # Examples
///
/// ```
/// use workpool::{BoundedQueue, Interrupt};
///
/// let queue = BoundedQueue::new(2);
/// let interrupt = Interrupt::new();
///
/// assert!(queue.offer(1).is_ok());
/// assert!(queue.offer(2).is_ok());
/// assert!(queue.offer(3).is_err()); // full
///
/// assert_eq!(queue.take(&interrupt), Some(1));
/// ```
pub struct BoundedQueue<T> {
    capacity: usize,
    count: AtomicUsize,

    /// Take side: the sentinel node. Only consumers lock this.
    head: Mutex<*mut Node<T>>,
    not_empty: Condvar,

    /// Put side: the last node in the list. Only producers lock this.
    tail: Mutex<*mut Node<T>>,
    not_full: Condvar,
}

// The raw node pointers are only ever dereferenced while holding the lock
// that guards the corresponding end of the list.
unsafe impl<T: Send> Send for BoundedQueue<T> {}
unsafe impl<T: Send> Sync for BoundedQueue<T> {}

impl<T> Default for BoundedQueue<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl<T> BoundedQueue<T> {
    /// Create a queue that holds at most `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be non-zero");

        let sentinel = Node::sentinel();

        Self {
            capacity,
            count: AtomicUsize::new(0),
            head: Mutex::new(sentinel),
            not_empty: Condvar::new(),
            tail: Mutex::new(sentinel),
            not_full: Condvar::new(),
        }
    }

    /// Create a queue with no practical capacity limit.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    /// Number of elements currently in the queue.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert at the tail, blocking while the queue is full.
    ///
    /// Returns the value back as `Err` if the token is interrupted before
    /// space becomes available.
    pub fn put(&self, value: T, interrupt: &Interrupt) -> Result<(), T> {
        let mut tail = self.tail.lock().unwrap();

        loop {
            if interrupt.is_interrupted() {
                return Err(value);
            }

            if self.count.load(Ordering::SeqCst) < self.capacity {
                break;
            }

            tail = self.not_full.wait(tail).unwrap();
        }

        let node = Node::alloc(value);

        unsafe {
            (**tail).next = node;
        }
        *tail = node;

        let c = self.count.fetch_add(1, Ordering::SeqCst);

        // Cascade to the next waiting producer if there is still room, so
        // producers drain their wait queue without a consumer round-trip.
        if c + 1 < self.capacity {
            self.not_full.notify_one();
        }

        drop(tail);

        // 0 -> 1 transition: a consumer may be parked on the other lock.
        if c == 0 {
            self.signal_not_empty();
        }

        Ok(())
    }

    /// Insert at the tail without blocking.
    ///
    /// Returns the value back as `Err` if the queue is full.
    pub fn offer(&self, value: T) -> Result<(), T> {
        if self.count.load(Ordering::SeqCst) == self.capacity {
            return Err(value);
        }

        let mut tail = self.tail.lock().unwrap();

        // Re-check now that we hold the put lock; another producer may have
        // filled the queue between the fast-path check and the lock.
        if self.count.load(Ordering::SeqCst) == self.capacity {
            return Err(value);
        }

        let node = Node::alloc(value);

        unsafe {
            (**tail).next = node;
        }
        *tail = node;

        let c = self.count.fetch_add(1, Ordering::SeqCst);

        if c + 1 < self.capacity {
            self.not_full.notify_one();
        }

        drop(tail);

        if c == 0 {
            self.signal_not_empty();
        }

        Ok(())
    }

    /// Remove from the head, blocking while the queue is empty.
    ///
    /// An interrupted token does not preempt available work: as long as
    /// elements remain they are returned, and `None` comes back only once
    /// the token is interrupted *and* the queue is empty.
    pub fn take(&self, interrupt: &Interrupt) -> Option<T> {
        let mut head = self.head.lock().unwrap();

        loop {
            if self.count.load(Ordering::SeqCst) > 0 {
                break;
            }

            if interrupt.is_interrupted() {
                return None;
            }

            head = self.not_empty.wait(head).unwrap();
        }

        let value = unsafe { Self::dequeue(&mut *head) };
        let c = self.count.fetch_sub(1, Ordering::SeqCst);

        // Cascade to the next waiting consumer if elements remain.
        if c > 1 {
            self.not_empty.notify_one();
        }

        drop(head);

        // full -> not-full transition: a producer may be parked.
        if c == self.capacity {
            self.signal_not_full();
        }

        Some(value)
    }

    /// Remove from the head, waiting at most `timeout` for an element.
    ///
    /// Returns `None` if the timeout elapses with the queue still empty, or
    /// the token is interrupted while the queue is empty.
    pub fn poll(&self, timeout: Duration, interrupt: &Interrupt) -> Option<T> {
        let deadline = Instant::now().checked_add(timeout);
        let mut head = self.head.lock().unwrap();

        loop {
            if self.count.load(Ordering::SeqCst) > 0 {
                break;
            }

            if interrupt.is_interrupted() {
                return None;
            }

            match deadline {
                Some(deadline) => {
                    let now = Instant::now();

                    if now >= deadline {
                        return None;
                    }

                    head = self.not_empty.wait_timeout(head, deadline - now).unwrap().0;
                }
                // Timeout too large to represent; wait unbounded like `take`.
                None => head = self.not_empty.wait(head).unwrap(),
            }
        }

        let value = unsafe { Self::dequeue(&mut *head) };
        let c = self.count.fetch_sub(1, Ordering::SeqCst);

        if c > 1 {
            self.not_empty.notify_one();
        }

        drop(head);

        if c == self.capacity {
            self.signal_not_full();
        }

        Some(value)
    }

    /// Atomically move every queued element into a `Vec` in FIFO order,
    /// leaving the queue empty.
    ///
    /// Takes the put lock first and then the take lock, the same order the
    /// single-lock paths are compatible with, so this cannot deadlock
    /// against concurrent `put`/`take` calls.
    pub fn drain(&self) -> Vec<T> {
        let mut tail = self.tail.lock().unwrap();
        let mut head = self.head.lock().unwrap();

        let mut drained = Vec::with_capacity(self.count.load(Ordering::SeqCst));

        unsafe {
            let sentinel = *head;
            let mut next = (*sentinel).next;
            (*sentinel).next = ptr::null_mut();

            while !next.is_null() {
                let mut node = Box::from_raw(next);
                drained.push(node.value.take().unwrap());
                next = node.next;
            }

            // The list is now just the sentinel again.
            *tail = sentinel;
        }

        self.count.store(0, Ordering::SeqCst);

        drained
    }

    /// Wake every thread blocked in [`take`](Self::take) or
    /// [`poll`](Self::poll) so it re-checks its interrupt token.
    pub fn wake_consumers(&self) {
        let _head = self.head.lock().unwrap();
        self.not_empty.notify_all();
    }

    /// Wake every thread blocked in [`put`](Self::put) so it re-checks its
    /// interrupt token.
    pub fn wake_producers(&self) {
        let _tail = self.tail.lock().unwrap();
        self.not_full.notify_all();
    }

    /// Unlink the node after the sentinel and return its value. The old
    /// sentinel is freed and the unlinked node becomes the new sentinel.
    ///
    /// The caller must hold the take lock, and the queue must be non-empty.
    unsafe fn dequeue(head: &mut *mut Node<T>) -> T {
        let sentinel = *head;
        let first = (*sentinel).next;
        debug_assert!(!first.is_null());

        drop(Box::from_raw(sentinel));
        *head = first;

        (*first).value.take().unwrap()
    }

    fn signal_not_empty(&self) {
        let _head = self.head.lock().unwrap();
        self.not_empty.notify_one();
    }

    fn signal_not_full(&self) {
        let _tail = self.tail.lock().unwrap();
        self.not_full.notify_one();
    }
}

impl<T> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        let mut node = *self.head.get_mut().unwrap_or_else(PoisonError::into_inner);

        while !node.is_null() {
            let boxed = unsafe { Box::from_raw(node) };
            node = boxed.next;
        }
    }
}
