//! Per-camera operational counters, aggregated from the components that
//! actually own them.
//!
//! Grounded on `RtpStats`'s snapshot shape (`#[derive(Debug, Clone,
//! Default)]`, a point-in-time copy rather than a live view) trimmed to
//! the counters this pipeline exposes: reception/loss/drop counts and
//! pool/queue pressure. There is no RTCP feedback loop here, so the
//! jitter/loss/rtt/report submodules the teacher built around `RtpStats`
//! have no counterpart -- counters are reset implicitly whenever a
//! camera's receiver/queue/playout buffer is torn down and recreated.

use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::playout::PlayoutStats;
use crate::pool::FramePool;
use crate::queue::InputQueue;
use crate::receiver::Receiver;

/// Point-in-time snapshot of one camera's operational counters, matching
/// the list in §6: frames received, dropped (any reason), lost
/// (sequence-derived), invalid header, pool alloc failures, nodes
/// dropped, peak input-queue depth, min/max inter-arrival interval.
#[derive(Debug, Clone, Default)]
pub struct CameraStats {
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub frames_lost: i64,
    pub frames_invalid: u64,
    pub pool_alloc_failures: u64,
    pub nodes_dropped: u64,
    pub queue_peak_depth: u64,
    pub queue_depth: u64,
    pub min_interarrival: Option<Duration>,
    pub max_interarrival: Option<Duration>,
    pub pool_hit_ratio: f64,
    pub pool_available: usize,
}

impl CameraStats {
    /// Assemble a snapshot from the live counters of one camera's
    /// receiver, input queue and playout buffer, plus the shared frame
    /// pool's cache statistics.
    pub fn snapshot(
        receiver: &Receiver,
        queue: &InputQueue,
        playout: &PlayoutStats,
        pool: &FramePool,
    ) -> Self {
        let r = receiver.stats();

        Self {
            frames_received: r.frame_count.load(Ordering::Relaxed),
            frames_dropped: r.frame_drop.load(Ordering::Relaxed)
                + playout.frame_dropped.load(Ordering::Relaxed)
                + queue.dropped(),
            frames_lost: r.frame_lost.load(Ordering::Relaxed),
            frames_invalid: r.frame_err.load(Ordering::Relaxed),
            pool_alloc_failures: r.frame_err_mem.load(Ordering::Relaxed),
            nodes_dropped: playout.node_dropped.load(Ordering::Relaxed),
            queue_peak_depth: queue.peak_depth(),
            queue_depth: queue.len() as u64,
            min_interarrival: queue.min_interarrival(),
            max_interarrival: queue.max_interarrival(),
            pool_hit_ratio: pool.hit_ratio(),
            pool_available: pool.available(),
        }
    }
}
