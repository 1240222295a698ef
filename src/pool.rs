//! Source buffer pool.
//!
//! The hardware encoder leases a payload buffer for every access unit it
//! delivers. The lease ends when the `PooledBuffer` is dropped, which happens
//! on every path through the recorder, including error paths, so the source
//! pool can never starve because of a failed write.

use bytes::BytesMut;
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::Arc;

/// Fixed-capacity pool of reusable payload buffers shared between the encoder
/// callback thread and the recorder task.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    free: Mutex<Vec<BytesMut>>,
    capacity: usize,
}

impl BufferPool {
    pub fn new(capacity: usize, buffer_bytes: usize) -> Self {
        let free = (0..capacity)
            .map(|_| BytesMut::with_capacity(buffer_bytes))
            .collect();
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(free),
                capacity,
            }),
        }
    }

    /// Lease a buffer. Falls back to a fresh allocation when the pool is
    /// drained so the encoder callback never blocks on the recorder.
    pub fn acquire(&self) -> PooledBuffer {
        let buf = self.inner.free.lock().pop().unwrap_or_default();
        PooledBuffer {
            buf,
            pool: Arc::clone(&self.inner),
        }
    }

    /// Number of buffers currently available for lease.
    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }
}

/// A leased payload buffer. Returns itself to the pool on drop.
pub struct PooledBuffer {
    buf: BytesMut,
    pool: Arc<PoolInner>,
}

impl PooledBuffer {
    /// Replace the buffer contents with `payload`.
    pub fn fill(&mut self, payload: &[u8]) {
        self.buf.clear();
        self.buf.extend_from_slice(payload);
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buf.len())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let mut free = self.pool.free.lock();
        // Overflow allocations are discarded instead of growing the pool.
        if free.len() < self.pool.capacity {
            let mut buf = std::mem::take(&mut self.buf);
            buf.clear();
            free.push(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_returns_on_drop() {
        let pool = BufferPool::new(4, 1024);
        assert_eq!(pool.available(), 4);

        let mut a = pool.acquire();
        let b = pool.acquire();
        a.fill(b"frame");
        assert_eq!(pool.available(), 2);
        assert_eq!(&*a, b"frame");

        drop(a);
        drop(b);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn test_overshoot_does_not_grow_pool() {
        let pool = BufferPool::new(2, 16);
        let leases: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
        assert_eq!(pool.available(), 0);
        drop(leases);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_returned_buffer_is_cleared() {
        let pool = BufferPool::new(1, 16);
        let mut a = pool.acquire();
        a.fill(&[1, 2, 3]);
        drop(a);
        let b = pool.acquire();
        assert!(b.is_empty());
    }
}
