//! Bounded FIFO input queue: receiver worker pushes, playout worker pops.
//!
//! Mirrors `CRtpInputQueue::put()`'s drop-newest-on-overflow policy and its
//! min/max inter-arrival diagnostics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::packet::PacketBuffer;

struct Inner {
    items: VecDeque<PacketBuffer>,
    capacity: usize,
    last_arrival: Option<Instant>,
    min_interarrival: Option<Duration>,
    max_interarrival: Option<Duration>,
}

/// A bounded FIFO of packets awaiting playout-buffer processing.
///
/// Overflow policy is drop-newest: a full queue rejects the incoming
/// packet rather than evicting an older one, matching the original so
/// in-order packets already queued are never discarded to make room for
/// a late arrival.
pub struct InputQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    dropped: AtomicU64,
    enqueued: AtomicU64,
    peak_depth: AtomicU64,
}

impl InputQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                capacity,
                last_arrival: None,
                min_interarrival: None,
                max_interarrival: None,
            }),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            enqueued: AtomicU64::new(0),
            peak_depth: AtomicU64::new(0),
        }
    }

    /// Attempt to enqueue a packet, using its own recorded arrival time
    /// for the inter-arrival diagnostics. Returns `false` (dropping
    /// `packet`) if the queue is already at capacity.
    pub fn put(&self, packet: PacketBuffer) -> bool {
        let mut inner = self.inner.lock();
        if inner.items.len() >= inner.capacity {
            drop(inner);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let arrival = packet.arrival_time;
        if let Some(prev) = inner.last_arrival {
            let gap = arrival.saturating_duration_since(prev);
            inner.min_interarrival = Some(match inner.min_interarrival {
                Some(m) if m <= gap => m,
                _ => gap,
            });
            inner.max_interarrival = Some(match inner.max_interarrival {
                Some(m) if m >= gap => m,
                _ => gap,
            });
        }
        inner.last_arrival = Some(arrival);
        inner.items.push_back(packet);
        let depth = inner.items.len() as u64;
        drop(inner);

        self.enqueued.fetch_add(1, Ordering::Relaxed);
        let mut peak = self.peak_depth.load(Ordering::Relaxed);
        while depth > peak {
            match self
                .peak_depth
                .compare_exchange_weak(peak, depth, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(observed) => peak = observed,
            }
        }
        self.notify.notify_one();
        true
    }

    /// Deepest the queue has been observed since construction.
    pub fn peak_depth(&self) -> u64 {
        self.peak_depth.load(Ordering::Relaxed)
    }

    /// Pop the oldest queued packet, if any.
    pub fn try_pop(&self) -> Option<PacketBuffer> {
        self.inner.lock().items.pop_front()
    }

    /// Wait until a packet is available, then pop it.
    pub async fn pop(&self) -> PacketBuffer {
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn min_interarrival(&self) -> Option<Duration> {
        self.inner.lock().min_interarrival
    }

    pub fn max_interarrival(&self) -> Option<Duration> {
        self.inner.lock().max_interarrival
    }
}
