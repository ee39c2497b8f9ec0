//! Pool of reusable encode buffers.
//!
//! Buffers come in power-of-ten capacities (10 bytes up to 1 MB), one
//! bounded free list per capacity. A request is served from the smallest
//! class that fits, then from the class above it, and otherwise from a new
//! allocation. Requests larger than the largest class are never pooled.

use bytes::BytesMut;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

const SMALLEST_CLASS: usize = 10;
const CLASS_COUNT: usize = 6;

/// A bounded, self-populating pool of [`BytesMut`] buffers.
#[derive(Debug)]
pub struct ByteBufferPool {
    classes: Vec<Mutex<Vec<BytesMut>>>,
    max_per_class: usize,
    outstanding: AtomicUsize,
    allocations: AtomicU64,
}

impl ByteBufferPool {
    /// Creates a pool keeping at most `max_per_class` free buffers per
    /// capacity. Zero disables pooling.
    #[must_use]
    pub fn new(max_per_class: usize) -> Self {
        Self {
            classes: (0..CLASS_COUNT).map(|_| Mutex::new(Vec::new())).collect(),
            max_per_class,
            outstanding: AtomicUsize::new(0),
            allocations: AtomicU64::new(0),
        }
    }

    /// Capacity of class `index`.
    #[must_use]
    pub const fn class_capacity(index: usize) -> usize {
        SMALLEST_CLASS * 10_usize.pow(index as u32)
    }

    fn class_for_request(min_capacity: usize) -> Option<usize> {
        (0..CLASS_COUNT).find(|&i| Self::class_capacity(i) >= min_capacity)
    }

    fn class_for_return(capacity: usize) -> Option<usize> {
        (0..CLASS_COUNT)
            .rev()
            .find(|&i| Self::class_capacity(i) <= capacity)
    }

    /// Borrows an empty buffer with at least `min_capacity` bytes of room.
    ///
    /// The buffer goes back to the pool when the guard drops, on every
    /// exit path including unwinding.
    pub fn acquire(&self, min_capacity: usize) -> PooledBuffer<'_> {
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        let (buf, pooled) = match Self::class_for_request(min_capacity) {
            Some(class) => {
                let buf = self
                    .take_from(class)
                    .or_else(|| self.take_from(class + 1))
                    .unwrap_or_else(|| self.allocate(Self::class_capacity(class)));
                (buf, true)
            }
            None => {
                tracing::debug!(min_capacity, "allocating unpooled buffer");
                (self.allocate(min_capacity), false)
            }
        };
        PooledBuffer {
            pool: self,
            buf: Some(buf),
            pooled,
        }
    }

    fn take_from(&self, class: usize) -> Option<BytesMut> {
        self.classes.get(class)?.lock().pop()
    }

    fn allocate(&self, capacity: usize) -> BytesMut {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        BytesMut::with_capacity(capacity)
    }

    fn release(&self, mut buf: BytesMut, pooled: bool) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        if !pooled {
            return;
        }
        buf.clear();
        if let Some(class) = Self::class_for_return(buf.capacity()) {
            let mut free = self.classes[class].lock();
            if free.len() < self.max_per_class {
                free.push(buf);
            }
        }
    }

    /// Buffers currently lent out.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    /// Free buffers held across all classes.
    #[must_use]
    pub fn pooled(&self) -> usize {
        self.classes.iter().map(|c| c.lock().len()).sum()
    }

    /// Buffers allocated since the pool was created.
    #[must_use]
    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }
}

/// A buffer on loan from a [`ByteBufferPool`].
#[derive(Debug)]
pub struct PooledBuffer<'a> {
    pool: &'a ByteBufferPool,
    buf: Option<BytesMut>,
    pooled: bool,
}

impl Deref for PooledBuffer<'_> {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        // Only `Drop` empties the option
        self.buf.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut BytesMut {
        self.buf.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf, self.pooled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    #[test]
    fn request_rounds_up_to_power_of_ten() {
        let pool = ByteBufferPool::new(4);
        let buf = pool.acquire(11);
        assert!(buf.capacity() >= 100);
        assert!(buf.is_empty());
        assert_eq!(pool.outstanding(), 1);
    }

    #[test]
    fn released_buffer_is_reused_cleared() {
        let pool = ByteBufferPool::new(4);
        {
            let mut buf = pool.acquire(8);
            buf.put_u64(7);
        }
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.pooled(), 1);

        let buf = pool.acquire(8);
        assert!(buf.is_empty());
        assert_eq!(pool.allocations(), 1);
    }

    #[test]
    fn falls_back_to_next_class_up() {
        let pool = ByteBufferPool::new(4);
        drop(pool.acquire(100));
        let buf = pool.acquire(10);
        assert!(buf.capacity() >= 100);
        assert_eq!(pool.allocations(), 1);
    }

    #[test]
    fn free_list_is_bounded() {
        let pool = ByteBufferPool::new(2);
        let held: Vec<_> = (0..5).map(|_| pool.acquire(10)).collect();
        drop(held);
        assert_eq!(pool.pooled(), 2);
    }

    #[test]
    fn oversized_requests_are_not_pooled() {
        let pool = ByteBufferPool::new(2);
        drop(pool.acquire(50_000_000));
        assert_eq!(pool.pooled(), 0);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn buffer_returns_on_panic() {
        let pool = ByteBufferPool::new(2);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _buf = pool.acquire(10);
            panic!("encode failed");
        }));
        assert!(result.is_err());
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.pooled(), 1);
    }
}
