//! Per-worker scratch arena.
//!
//! Each pool worker owns one slot holding a small stack of idle buffers. A task
//! checks a buffer out of its worker's slot and the guard puts it back on drop, on
//! every exit path. Slots are only ever touched by their own worker, so the locks
//! are uncontended; the extra stack depth covers nested checkouts when a worker
//! steals another task while it waits on a join. Threads outside the pool share one
//! overflow slot.

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

pub struct BufferPool<T> {
    slots: Box<[Mutex<Vec<T>>]>,
    make: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T> BufferPool<T> {
    /// Create a pool for `workers` pool threads; buffers are built lazily by `make`.
    pub fn new(workers: usize, make: impl Fn() -> T + Send + Sync + 'static) -> Self {
        let slots = (0..workers + 1).map(|_| Mutex::new(Vec::new())).collect();
        Self {
            slots,
            make: Box::new(make),
        }
    }

    pub fn checkout(&self) -> Pooled<'_, T> {
        let slot = self.slot_index();
        let item = self.slots[slot].lock().pop().unwrap_or_else(|| (self.make)());
        Pooled {
            pool: self,
            slot,
            item: Some(item),
        }
    }

    /// Idle buffers across all slots.
    pub fn idle(&self) -> usize {
        self.slots.iter().map(|slot| slot.lock().len()).sum()
    }

    fn slot_index(&self) -> usize {
        let overflow = self.slots.len() - 1;
        match rayon::current_thread_index() {
            Some(index) if index < overflow => index,
            _ => overflow,
        }
    }

    fn checkin(&self, slot: usize, item: T) {
        self.slots[slot].lock().push(item);
    }
}

/// A checked-out buffer, returned to its slot when dropped.
pub struct Pooled<'a, T> {
    pool: &'a BufferPool<T>,
    slot: usize,
    item: Option<T>,
}

impl<T> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `Drop` takes the item.
        self.item.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<T> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.checkin(self.slot, item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn buffers_are_reused() {
        let made = Arc::new(AtomicUsize::new(0));
        let counter = made.clone();
        let pool = BufferPool::new(2, move || {
            counter.fetch_add(1, Ordering::Relaxed);
            vec![0u8; 64]
        });

        for _ in 0..10 {
            let mut buf = pool.checkout();
            buf[0] = 1;
        }
        assert_eq!(made.load(Ordering::Relaxed), 1);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn nested_checkouts_get_distinct_buffers() {
        let pool = BufferPool::new(1, || vec![0u8; 8]);
        {
            let mut outer = pool.checkout();
            let mut inner = pool.checkout();
            outer[0] = 1;
            inner[0] = 2;
            assert_eq!(outer[0], 1);
        }
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn released_on_error_path() {
        fn failing(pool: &BufferPool<Vec<u8>>) -> Result<(), &'static str> {
            let _buf = pool.checkout();
            Err("boom")
        }
        let pool = BufferPool::new(1, || vec![0u8; 8]);
        assert!(failing(&pool).is_err());
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn pool_workers_use_their_own_slot() {
        let pool = Arc::new(BufferPool::new(4, || vec![0u8; 16]));
        let workers = rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap();
        workers.broadcast(|_| {
            let _buf = pool.checkout();
        });
        // Each worker returned its buffer into its own slot; none went to overflow.
        assert_eq!(pool.slots[4].lock().len(), 0);
        assert_eq!(pool.idle(), 4);
    }
}
