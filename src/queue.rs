//! Thread-safe FIFO for handing work to a loop thread.
//!
//! Any number of producer threads may [`push`](CommandQueue::push); one
//! logical consumer (the server multiplexer or client session loop) pops and
//! executes. A single mutex guards push, pop and the emptiness check, so the
//! consumer never needs a lock on the state it owns.
//!
//! ```text
//! Thread 1 ─┐
//! Thread 2 ─┼─► CommandQueue<Command> ─► loop thread ─► sockets
//! Thread N ─┘
//! ```
//!
//! # Example
//!
//! ```
//! use chatwire::CommandQueue;
//!
//! let queue = CommandQueue::new();
//! queue.push("a");
//! queue.push("b");
//!
//! assert_eq!(queue.pop(), Some("a"));
//! assert_eq!(queue.pop(), Some("b"));
//! assert!(queue.is_empty());
//! ```

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Mutex-guarded FIFO of opaque work items.
#[derive(Debug)]
pub struct CommandQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> CommandQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    // A producer that panicked mid-push cannot leave the deque half-updated,
    // so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item at the back. O(1).
    pub fn push(&self, item: T) {
        self.lock().push_back(item);
    }

    /// Remove the front item, or `None` when empty. O(1).
    pub fn pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Check whether no items are queued. O(1).
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Remove every queued item, passing each to `cleanup` in FIFO order.
    ///
    /// Returns the number of items drained.
    pub fn drain_with<F>(&self, mut cleanup: F) -> usize
    where
        F: FnMut(T),
    {
        let drained: VecDeque<T> = std::mem::take(&mut *self.lock());
        let count = drained.len();
        for item in drained {
            cleanup(item);
        }
        count
    }

    /// Remove the items matching `pred`, keeping the rest in order.
    pub fn take_where<F>(&self, mut pred: F) -> Vec<T>
    where
        F: FnMut(&T) -> bool,
    {
        let mut items = self.lock();
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(items.len());
        for item in items.drain(..) {
            if pred(&item) {
                taken.push(item);
            } else {
                kept.push_back(item);
            }
        }
        *items = kept;
        taken
    }

    /// Consume the queue, passing every remaining item to `cleanup`.
    pub fn destroy<F>(self, cleanup: F) -> usize
    where
        F: FnMut(T),
    {
        self.drain_with(cleanup)
    }
}

impl<T> Default for CommandQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = CommandQueue::new();
        for i in 0..5 {
            queue.push(i);
        }
        let popped: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(popped, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_pop_empty() {
        let queue: CommandQueue<u8> = CommandQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_empty_after_draining_last_item() {
        let queue = CommandQueue::new();
        queue.push(1);
        assert!(!queue.is_empty());
        queue.pop();
        assert!(queue.is_empty());

        // The queue stays usable after running dry.
        queue.push(2);
        assert_eq!(queue.pop(), Some(2));
    }

    #[test]
    fn test_absent_items_are_stored() {
        let queue: CommandQueue<Option<u32>> = CommandQueue::new();
        queue.push(None);
        queue.push(Some(3));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(None));
        assert_eq!(queue.pop(), Some(Some(3)));
    }

    #[test]
    fn test_destroy_runs_cleanup_per_item() {
        let queue = CommandQueue::new();
        queue.push(String::from("x"));
        queue.push(String::from("y"));

        let mut cleaned = Vec::new();
        let count = queue.destroy(|item| cleaned.push(item));

        assert_eq!(count, 2);
        assert_eq!(cleaned, vec!["x", "y"]);
    }

    #[test]
    fn test_take_where_keeps_remaining_order() {
        let queue = CommandQueue::new();
        for i in 0..6 {
            queue.push(i);
        }

        assert_eq!(queue.take_where(|i| i % 2 == 0), vec![0, 2, 4]);
        let rest: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(rest, vec![1, 3, 5]);
    }

    #[test]
    fn test_concurrent_producers_keep_per_producer_order() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 1000;

        let queue = Arc::new(CommandQueue::new());
        let handles: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for seq in 0..PER_PRODUCER {
                        queue.push((p, seq));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut next = [0usize; PRODUCERS];
        let mut total = 0;
        while let Some((p, seq)) = queue.pop() {
            assert_eq!(seq, next[p], "producer {} out of order", p);
            next[p] += 1;
            total += 1;
        }

        assert_eq!(total, PRODUCERS * PER_PRODUCER);
        assert!(next.iter().all(|&n| n == PER_PRODUCER));
    }

    #[test]
    fn test_concurrent_push_and_pop() {
        let queue = Arc::new(CommandQueue::new());
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..10_000u32 {
                    queue.push(i);
                }
            })
        };

        let mut received = Vec::with_capacity(10_000);
        while received.len() < 10_000 {
            match queue.pop() {
                Some(i) => received.push(i),
                None => thread::yield_now(),
            }
        }
        producer.join().unwrap();

        assert!(received.windows(2).all(|w| w[0] + 1 == w[1]));
        assert!(queue.is_empty());
    }
}
