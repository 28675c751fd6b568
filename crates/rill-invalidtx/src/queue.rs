//! Byte-budgeted FIFO between validation threads and the publisher worker.
//!
//! Capacity is counted in accounted bytes, not items. Producers never wait:
//! an item that does not fit is degraded once and retried, and if it still
//! does not fit it is dropped and reported as such. The single consumer
//! blocks in [`ByteBudgetQueue::pop`] until an item arrives or the queue is
//! closed; after [`close`](ByteBudgetQueue::close) the remaining items are
//! drained before `pop` returns `None`.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

/// Items that can be charged against a byte budget.
pub trait ByteCost {
    /// Accounted size in bytes.
    fn byte_cost(&self) -> usize;

    /// Shrink the item. Returns `false` if it cannot get any smaller.
    fn degrade(&mut self) -> bool;
}

/// Result of a [`ByteBudgetQueue::try_push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Enqueued unchanged.
    Admitted,
    /// Enqueued after being degraded.
    AdmittedDegraded,
    /// Did not fit even after degradation; discarded.
    Dropped,
    /// The queue is closed; discarded.
    Closed,
}

impl PushOutcome {
    pub fn is_admitted(self) -> bool {
        matches!(self, Self::Admitted | Self::AdmittedDegraded)
    }
}

struct Inner<T> {
    items: VecDeque<(T, usize)>,
    used: usize,
    closed: bool,
}

/// FIFO queue bounded by the total byte cost of its items.
pub struct ByteBudgetQueue<T> {
    inner: Mutex<Inner<T>>,
    available: Condvar,
    capacity: usize,
}

impl<T: ByteCost> ByteBudgetQueue<T> {
    /// Create a queue that holds at most `capacity` accounted bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                used: 0,
                closed: false,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Enqueue without blocking.
    ///
    /// If the item does not fit it is degraded once and retried. Items that
    /// are already minimal go straight to the drop check. A dropped item is
    /// released after the lock is let go.
    pub fn try_push(&self, mut item: T) -> PushOutcome {
        let cost = item.byte_cost();
        match self.admit(item, cost, PushOutcome::Admitted) {
            Ok(outcome) => return outcome,
            Err(rejected) => item = rejected,
        }

        if !item.degrade() {
            return PushOutcome::Dropped;
        }
        let cost = item.byte_cost();
        match self.admit(item, cost, PushOutcome::AdmittedDegraded) {
            Ok(outcome) => outcome,
            Err(_dropped) => PushOutcome::Dropped,
        }
    }

    /// Single admission attempt. Hands the item back if it does not fit.
    fn admit(&self, item: T, cost: usize, admitted: PushOutcome) -> Result<PushOutcome, T> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(PushOutcome::Closed);
        }
        match inner.used.checked_add(cost) {
            Some(total) if total <= self.capacity => {
                inner.used = total;
                inner.items.push_back((item, cost));
                drop(inner);
                self.available.notify_one();
                Ok(admitted)
            }
            _ => Err(item),
        }
    }

    /// Dequeue, blocking while the queue is empty and open.
    ///
    /// Returns `None` once the queue is closed and fully drained.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        loop {
            if let Some((item, cost)) = inner.items.pop_front() {
                inner.used -= cost;
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            self.available.wait(&mut inner);
        }
    }

    /// Close the queue and wake the consumer. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        drop(inner);
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Accounted bytes currently resident.
    pub fn used_bytes(&self) -> usize {
        self.inner.lock().used
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    /// Test item: `cost` bytes, degradable down to `min`.
    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Item {
        id: u32,
        cost: usize,
        min: usize,
    }

    impl Item {
        fn new(id: u32, cost: usize, min: usize) -> Self {
            Self { id, cost, min }
        }
    }

    impl ByteCost for Item {
        fn byte_cost(&self) -> usize {
            self.cost
        }

        fn degrade(&mut self) -> bool {
            if self.cost <= self.min {
                return false;
            }
            self.cost = self.min;
            true
        }
    }

    // ------------------------------------------------------------------
    // Admission
    // ------------------------------------------------------------------

    #[test]
    fn admits_until_capacity() {
        let q: ByteBudgetQueue<Item> = ByteBudgetQueue::new(100);
        assert_eq!(q.try_push(Item::new(1, 60, 60)), PushOutcome::Admitted);
        assert_eq!(q.try_push(Item::new(2, 40, 40)), PushOutcome::Admitted);
        assert_eq!(q.used_bytes(), 100);
        assert_eq!(q.try_push(Item::new(3, 1, 1)), PushOutcome::Dropped);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn degrades_to_fit() {
        let q: ByteBudgetQueue<Item> = ByteBudgetQueue::new(100);
        q.try_push(Item::new(1, 90, 90));
        assert_eq!(q.try_push(Item::new(2, 50, 5)), PushOutcome::AdmittedDegraded);
        assert_eq!(q.used_bytes(), 95);
        q.close();
        q.pop();
        assert_eq!(q.pop().unwrap().cost, 5);
    }

    #[test]
    fn drops_when_degraded_form_still_too_large() {
        let q: ByteBudgetQueue<Item> = ByteBudgetQueue::new(100);
        q.try_push(Item::new(1, 98, 98));
        assert_eq!(q.try_push(Item::new(2, 50, 10)), PushOutcome::Dropped);
        assert_eq!(q.used_bytes(), 98);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn minimal_item_skips_degradation() {
        let q: ByteBudgetQueue<Item> = ByteBudgetQueue::new(10);
        q.try_push(Item::new(1, 10, 10));
        assert_eq!(q.try_push(Item::new(2, 4, 4)), PushOutcome::Dropped);
    }

    #[test]
    fn item_larger_than_capacity_is_dropped_on_empty_queue() {
        let q: ByteBudgetQueue<Item> = ByteBudgetQueue::new(10);
        assert_eq!(q.try_push(Item::new(1, 11, 11)), PushOutcome::Dropped);
        assert!(q.is_empty());
        assert_eq!(q.used_bytes(), 0);
    }

    #[test]
    fn pop_releases_budget() {
        let q: ByteBudgetQueue<Item> = ByteBudgetQueue::new(10);
        q.try_push(Item::new(1, 10, 10));
        assert_eq!(q.pop().unwrap().id, 1);
        assert_eq!(q.used_bytes(), 0);
        assert_eq!(q.try_push(Item::new(2, 10, 10)), PushOutcome::Admitted);
    }

    // ------------------------------------------------------------------
    // Ordering and closing
    // ------------------------------------------------------------------

    #[test]
    fn fifo_order() {
        let q: ByteBudgetQueue<Item> = ByteBudgetQueue::new(1_000);
        for id in 0..10 {
            q.try_push(Item::new(id, 10, 1));
        }
        q.close();
        let ids: Vec<u32> = std::iter::from_fn(|| q.pop()).map(|i| i.id).collect();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn close_drains_then_ends() {
        let q: ByteBudgetQueue<Item> = ByteBudgetQueue::new(100);
        q.try_push(Item::new(1, 10, 10));
        q.close();
        q.close();
        assert!(q.is_closed());
        assert_eq!(q.pop().map(|i| i.id), Some(1));
        assert_eq!(q.pop(), None);
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn push_after_close_is_refused() {
        let q: ByteBudgetQueue<Item> = ByteBudgetQueue::new(100);
        q.close();
        assert_eq!(q.try_push(Item::new(1, 1, 1)), PushOutcome::Closed);
        assert!(q.is_empty());
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let q: Arc<ByteBudgetQueue<Item>> = Arc::new(ByteBudgetQueue::new(100));
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pop())
        };
        thread::sleep(Duration::from_millis(50));
        q.close();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn blocked_consumer_receives_item() {
        let q: Arc<ByteBudgetQueue<Item>> = Arc::new(ByteBudgetQueue::new(100));
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pop())
        };
        thread::sleep(Duration::from_millis(50));
        q.try_push(Item::new(7, 1, 1));
        assert_eq!(consumer.join().unwrap().map(|i| i.id), Some(7));
    }

    #[test]
    fn concurrent_producers_respect_capacity() {
        let q: Arc<ByteBudgetQueue<Item>> = Arc::new(ByteBudgetQueue::new(5_000));
        let producers: Vec<_> = (0..8)
            .map(|t| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    let mut admitted = 0usize;
                    for i in 0..500 {
                        if q.try_push(Item::new(t * 1_000 + i, 37, 3)).is_admitted() {
                            admitted += 1;
                        }
                        assert!(q.used_bytes() <= q.capacity());
                    }
                    admitted
                })
            })
            .collect();
        let admitted: usize = producers.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, q.len());
        assert!(q.used_bytes() <= 5_000);
    }

    // ------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------

    proptest! {
        #[test]
        fn resident_cost_never_exceeds_capacity(
            capacity in 0usize..2_000,
            ops in proptest::collection::vec((1usize..500, 1usize..50, any::<bool>()), 1..200),
        ) {
            let q: ByteBudgetQueue<Item> = ByteBudgetQueue::new(capacity);
            let mut expected_used = 0usize;
            for (i, (cost, min, pop)) in ops.into_iter().enumerate() {
                if pop {
                    if !q.is_empty() {
                        let item = q.pop().unwrap();
                        expected_used -= item.cost;
                    }
                } else {
                    let outcome = q.try_push(Item::new(i as u32, cost, min.min(cost)));
                    if outcome == PushOutcome::Admitted {
                        expected_used += cost;
                    } else if outcome == PushOutcome::AdmittedDegraded {
                        expected_used += min.min(cost);
                    }
                }
                prop_assert!(q.used_bytes() <= capacity);
                prop_assert_eq!(q.used_bytes(), expected_used);
            }
        }
    }
}
