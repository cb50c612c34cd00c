//! Frame Pool: a bounded LIFO free-list of packet buffers.
//!
//! Generalizes `buffer::GlobalBufferManager`'s Semaphore + RAII-permit
//! pattern from a memory-chunk counter to a packet-count counter, and
//! folds in the LIFO-reuse and hit/miss accounting of the original's
//! `CRtpFrameCache`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::packet::MAX_PACKET_SIZE;

/// Bounded pool of reusable packet byte buffers.
///
/// `acquire()` never blocks: exhaustion is reported so the caller (the
/// receiver worker) can drop the incoming datagram rather than stall, per
/// the contract in §4.1.
#[derive(Debug)]
pub struct FramePool {
    free: Mutex<Vec<BytesMut>>,
    limit: Arc<Semaphore>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// A buffer on loan from a [`FramePool`]. Returns itself to the pool's
/// free-list when dropped.
pub struct PooledFrame {
    buf: Option<BytesMut>,
    pool: Arc<FramePool>,
    _permit: OwnedSemaphorePermit,
}

impl FramePool {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::new()),
            limit: Arc::new(Semaphore::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Acquire a buffer, reused from the free-list if one is available or
    /// freshly allocated otherwise, up to the pool's high-water mark.
    ///
    /// Returns `None` if the pool is exhausted; never blocks.
    pub fn acquire(self: &Arc<Self>) -> Option<PooledFrame> {
        let permit = Arc::clone(&self.limit).try_acquire_owned().ok()?;

        let buf = {
            let mut free = self.free.lock();
            free.pop()
        };

        let buf = match buf {
            Some(mut b) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                b.clear();
                b
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                BytesMut::with_capacity(MAX_PACKET_SIZE)
            }
        };

        Some(PooledFrame {
            buf: Some(buf),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    /// Return a buffer's backing storage to the free-list. Called from
    /// [`PooledFrame::drop`]; O(1).
    fn release(&self, buf: BytesMut) {
        self.free.lock().push(buf);
    }

    /// Release all cached buffers. Safe to call even with outstanding
    /// [`PooledFrame`]s on loan; it only drops the idle free-list.
    pub fn clear(&self) {
        self.free.lock().clear();
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Percentage of `acquire()` calls satisfied from the free-list rather
    /// than by fresh allocation.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let misses = self.misses() as f64;
        if hits + misses == 0.0 {
            0.0
        } else {
            hits * 100.0 / (hits + misses)
        }
    }

    /// Number of permits currently available (capacity minus outstanding
    /// loans).
    pub fn available(&self) -> usize {
        self.limit.available_permits()
    }
}

impl PooledFrame {
    pub fn buf(&self) -> &BytesMut {
        self.buf.as_ref().expect("buffer taken before drop")
    }

    pub fn buf_mut(&mut self) -> &mut BytesMut {
        self.buf.as_mut().expect("buffer taken before drop")
    }

    pub fn into_inner(mut self) -> BytesMut {
        self.buf.take().expect("buffer taken before drop")
    }
}

impl std::fmt::Debug for PooledFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledFrame")
            .field("len", &self.buf.as_ref().map(|b| b.len()))
            .finish()
    }
}

impl Drop for PooledFrame {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}
