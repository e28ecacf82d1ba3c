//! Bounded, multi-producer multi-consumer queues of deferred calls.
//!
//! The run loop drains three of these each pass: the bottom-half queue
//! (lock-free to the caller — no lock needed since only the owning CPU ever
//! drains it), the global run queue (gated by the kernel lock), and each
//! CPU's per-thread queue. All three share this same bounded-capacity shape.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use vesper_core::sync::SpinLock;

/// A deferred call: an owned closure run exactly once, then dropped.
pub type Thunk = Box<dyn FnOnce() + Send + 'static>;

/// Default capacity for a bounded thunk queue.
pub const DEFAULT_CAPACITY: usize = 2048;

/// A fixed-capacity FIFO queue of [`Thunk`]s safe to push and pop from any
/// CPU concurrently.
pub struct BoundedQueue {
    capacity: usize,
    items: SpinLock<VecDeque<Thunk>>,
}

/// Returned by [`BoundedQueue::push`] when the queue is already at capacity.
pub struct QueueFull(pub Thunk);

impl BoundedQueue {
    /// Creates an empty queue holding at most `capacity` thunks.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: SpinLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Enqueues `thunk`. Returns it back wrapped in [`QueueFull`] if the
    /// queue is already at capacity.
    pub fn push(&self, thunk: Thunk) -> Result<(), QueueFull> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(QueueFull(thunk));
        }
        items.push_back(thunk);
        Ok(())
    }

    /// Dequeues the oldest thunk, or `None` if the queue is empty.
    pub fn pop(&self) -> Option<Thunk> {
        self.items.lock().pop_front()
    }

    /// Drains and runs every thunk currently queued, in FIFO order.
    ///
    /// New thunks pushed by a running thunk are not run in this same drain
    /// pass — they'll be picked up on the run loop's next pass.
    pub fn drain_and_run(&self) {
        while let Some(thunk) = self.pop() {
            thunk();
        }
    }

    /// Number of thunks currently queued.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Returns `true` if no thunks are queued.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn fifo_order() {
        let q = BoundedQueue::new(4);
        static ORDER: SpinLock<[u32; 3]> = SpinLock::new([0; 3]);
        static IDX: AtomicU32 = AtomicU32::new(0);

        for i in 0..3u32 {
            q.push(Box::new(move || {
                let idx = IDX.fetch_add(1, Ordering::SeqCst) as usize;
                ORDER.lock()[idx] = i;
            }))
            .ok()
            .unwrap();
        }
        q.drain_and_run();
        assert_eq!(*ORDER.lock(), [0, 1, 2]);
    }

    #[test]
    fn push_fails_past_capacity() {
        let q = BoundedQueue::new(1);
        assert!(q.push(Box::new(|| {})).is_ok());
        assert!(q.push(Box::new(|| {})).is_err());
    }

    #[test]
    fn drain_empties_the_queue_after_running_every_thunk() {
        let q = BoundedQueue::new(4);
        static RAN: AtomicU32 = AtomicU32::new(0);
        let thunk = Box::new(|| {
            RAN.fetch_add(1, Ordering::SeqCst);
        });
        q.push(thunk).ok().unwrap();
        q.drain_and_run();
        assert!(q.is_empty());
        assert_eq!(RAN.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drain_does_not_run_a_thunk_pushed_by_another_thunk_in_the_same_pass() {
        static Q: SpinLock<Option<*const BoundedQueue>> = SpinLock::new(None);
        static RAN: AtomicU32 = AtomicU32::new(0);

        let q = BoundedQueue::new(4);
        *Q.lock() = Some(&q as *const BoundedQueue);

        // SAFETY: `q` outlives every use of the raw pointer stashed in `Q` —
        // it's only read back synchronously within this test, before `q` is
        // dropped at the end of the function.
        let requeue = Box::new(|| {
            let requeued = Box::new(|| {
                RAN.fetch_add(1, Ordering::SeqCst);
            });
            if let Some(ptr) = *Q.lock() {
                unsafe { &*ptr }.push(requeued).ok().unwrap();
            }
        });
        q.push(requeue).ok().unwrap();

        q.drain_and_run();
        assert_eq!(RAN.load(Ordering::SeqCst), 0);
        assert_eq!(q.len(), 1);

        q.drain_and_run();
        assert_eq!(RAN.load(Ordering::SeqCst), 1);
        assert!(q.is_empty());

        *Q.lock() = None;
    }
}
