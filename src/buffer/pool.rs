//! Bounded buffer pool
//!
//! A fixed number of slots, each pre-sized to the largest frame the relay
//! will ever assemble. Renting never blocks: when every slot is out, a fresh
//! buffer is allocated and simply dropped on return if the pool is full.
//!
//! Ownership does the bookkeeping. `rent` moves a `BytesMut` out of the pool
//! and `give_back` moves it in again, so a buffer cannot be returned twice or
//! touched after it was returned. Callers must still return every rented
//! buffer on every exit path; a forgotten buffer is only freed, never reused.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;
use crossbeam_queue::ArrayQueue;

/// Counters describing pool usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Rents served from a pooled slot
    pub reused: u64,
    /// Rents that had to allocate because the pool was empty or too small
    pub allocated: u64,
    /// Returned buffers dropped because the pool was full or they were undersized
    pub discarded: u64,
}

/// Pool of reusable byte buffers, safe to share between connection handlers
#[derive(Debug)]
pub struct BufferPool {
    slots: ArrayQueue<BytesMut>,
    slot_size: usize,
    reused: AtomicU64,
    allocated: AtomicU64,
    discarded: AtomicU64,
}

impl BufferPool {
    /// Create a pool with `slots` buffers of `slot_size` bytes each
    pub fn new(slots: usize, slot_size: usize) -> Self {
        let queue = ArrayQueue::new(slots.max(1));
        for _ in 0..slots {
            let _ = queue.push(BytesMut::with_capacity(slot_size));
        }

        Self {
            slots: queue,
            slot_size,
            reused: AtomicU64::new(0),
            allocated: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Size every pooled slot is allocated with
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Number of buffers currently sitting in the pool
    pub fn available(&self) -> usize {
        self.slots.len()
    }

    /// Rent an empty buffer with at least `size` bytes of capacity.
    ///
    /// The contents are unspecified beyond what the caller writes.
    pub fn rent(&self, size: usize) -> BytesMut {
        if size <= self.slot_size {
            if let Some(mut buf) = self.slots.pop() {
                buf.clear();
                self.reused.fetch_add(1, Ordering::Relaxed);
                return buf;
            }
        }

        self.allocated.fetch_add(1, Ordering::Relaxed);
        BytesMut::with_capacity(size.max(self.slot_size))
    }

    /// Hand a rented buffer back to the pool.
    ///
    /// Must be called exactly once per `rent`, after the buffer's contents are
    /// no longer needed.
    pub fn give_back(&self, mut buf: BytesMut) {
        if buf.capacity() < self.slot_size {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }

        buf.clear();
        if self.slots.push(buf).is_err() {
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Snapshot of the usage counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            reused: self.reused.load(Ordering::Relaxed),
            allocated: self.allocated.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::BufMut;

    use super::*;

    #[test]
    fn test_rent_and_give_back_reuses_slot() {
        let pool = BufferPool::new(2, 64);
        assert_eq!(pool.available(), 2);

        let mut buf = pool.rent(10);
        assert!(buf.capacity() >= 10);
        assert!(buf.is_empty());
        assert_eq!(pool.available(), 1);

        buf.put_slice(b"hello");
        pool.give_back(buf);
        assert_eq!(pool.available(), 2);

        let again = pool.rent(64);
        assert!(again.is_empty());
        assert_eq!(pool.stats().reused, 2);
        assert_eq!(pool.stats().allocated, 0);
        pool.give_back(again);
    }

    #[test]
    fn test_exhausted_pool_allocates_instead_of_blocking() {
        let pool = BufferPool::new(1, 32);

        let first = pool.rent(32);
        let second = pool.rent(32);
        assert!(second.capacity() >= 32);
        assert_eq!(pool.stats().allocated, 1);

        pool.give_back(first);
        // Pool holds one slot, the extra buffer is dropped
        pool.give_back(second);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.stats().discarded, 1);
    }

    #[test]
    fn test_oversized_rent_allocates() {
        let pool = BufferPool::new(4, 16);

        let big = pool.rent(100);
        assert!(big.capacity() >= 100);
        assert_eq!(pool.available(), 4);
        assert_eq!(pool.stats().allocated, 1);

        // Larger buffers are still welcome back once there is room
        let small = pool.rent(8);
        pool.give_back(big);
        pool.give_back(small);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn test_concurrent_rent_return() {
        let pool = Arc::new(BufferPool::new(8, 128));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let mut buf = pool.rent(128);
                        buf.put_u8(i as u8);
                        assert_eq!(buf.len(), 1);
                        pool.give_back(buf);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.reused + stats.allocated, 8000);
        assert_eq!(pool.available(), 8);
    }
}
