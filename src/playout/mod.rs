//! Generic playout (jitter) buffer: reorders packets into access units and
//! releases them to a sink on a bounded-delay schedule.
//!
//! Grounded on `CRtpPlayoutBuffer`/`CRtpPlayoutNode`: `getInputFrames()`
//! drains the input queue into timestamp-ordered nodes, `playout()` walks
//! the node list releasing ready nodes and delaying or dropping incomplete
//! ones. The codec-specific half (`insertFrame`/`checkNodeValid`/
//! `buildCompressed`) is generalized here as the [`AccessUnitNode`] trait,
//! implemented per payload format in e.g. [`crate::playout::h264`].

pub mod h264;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::config::CameraConfig;
use crate::packet::PacketBuffer;
use crate::queue::InputQueue;
use crate::session::RtpSourceState;
use crate::types::{ExtendedTimestamp, InsertOutcome};

/// Longest this buffer will sleep waiting for the next scheduled event,
/// mirroring the original's `HR_8SEC` thread-wait ceiling.
const MAX_WAKEUP_INTERVAL: Duration = Duration::from_secs(8);

/// A fully assembled access unit ready for the sink, matching the muxer
/// boundary contract: compressed bytes, presentation time, keyframe flag.
#[derive(Debug, Clone)]
pub struct CompletedFrame {
    pub data: Bytes,
    pub presentation_time: Instant,
    pub is_idr: bool,
}

/// A payload-format-specific access unit under construction from one or
/// more RTP packets sharing an (extended) RTP timestamp.
pub trait AccessUnitNode: Send {
    /// Insert a packet belonging to this node.
    fn insert(&mut self, packet: PacketBuffer) -> InsertOutcome;
    /// Whether the node has received every packet it needs (e.g. the
    /// marker bit has been seen and all sequence numbers are contiguous).
    fn is_ready(&self) -> bool;
    fn extended_timestamp(&self) -> ExtendedTimestamp;
    fn playout_time(&self) -> Instant;
    fn set_playout_time(&mut self, at: Instant);
    fn bump_playout_time(&mut self, delta: Duration);
    fn delay_ticks(&self) -> u32;
    fn incr_delay(&mut self) -> u32;
    /// Consume the node, producing its assembled output. Only called once
    /// [`is_ready`](Self::is_ready) returns true.
    fn into_completed(self) -> CompletedFrame;
}

/// Builds new nodes and performs payload-format validation of the first
/// packet of a candidate node, mirroring `createNode`/`validateFrame`.
pub trait NodeFactory<N: AccessUnitNode> {
    fn validate(&self, packet: &PacketBuffer) -> bool;
    fn create(&mut self, packet: PacketBuffer, extended_ts: ExtendedTimestamp, playout_time: Instant) -> Option<N>;
}

/// Where completed access units go.
pub trait Sink: Send + Sync {
    fn put(&self, frame: CompletedFrame);
}

#[derive(Debug, Default)]
pub struct PlayoutStats {
    pub frame_count: AtomicU64,
    pub frame_dropped: AtomicU64,
    pub frame_late: AtomicU64,
    pub node_dropped: AtomicU64,
    pub node_max_count: AtomicU64,
}

impl PlayoutStats {
    fn note_node_count(&self, count: usize) {
        let count = count as u64;
        let mut max = self.node_max_count.load(Ordering::Relaxed);
        while count > max {
            match self.node_max_count.compare_exchange_weak(
                max,
                count,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => max = observed,
            }
        }
    }
}

/// Reorders packets drained from an [`InputQueue`] into access-unit nodes
/// of type `N`, released to a [`Sink`] once ready or once their delay
/// budget is exhausted.
pub struct PlayoutBuffer<N, F> {
    config: CameraConfig,
    factory: F,
    nodes: Vec<N>,
    session: RtpSourceState,
    /// `None` until the first node has been emitted or dropped; distinct
    /// from "last played timestamp was 0" so a legitimate emission at
    /// extended timestamp 0 still leaves the late-packet filter armed.
    last_played_timestamp: Option<ExtendedTimestamp>,
    stats: Arc<PlayoutStats>,
}

impl<N, F> PlayoutBuffer<N, F>
where
    N: AccessUnitNode,
    F: NodeFactory<N>,
{
    pub fn new(config: CameraConfig, factory: F) -> Self {
        Self {
            config,
            factory,
            nodes: Vec::new(),
            session: RtpSourceState::new(),
            last_played_timestamp: None,
            stats: Arc::new(PlayoutStats::default()),
        }
    }

    pub fn stats(&self) -> &PlayoutStats {
        &self.stats
    }

    /// A cloned handle to this buffer's counters, usable after the buffer
    /// itself has been moved into its worker task.
    pub fn stats_handle(&self) -> Arc<PlayoutStats> {
        Arc::clone(&self.stats)
    }

    /// Drain every packet currently queued, folding each into the node
    /// list in RTP-timestamp order. Grounded on `getInputFrames()`.
    pub fn get_input_frames(&mut self, queue: &InputQueue) {
        while let Some(packet) = queue.try_pop() {
            self.stats.frame_count.fetch_add(1, Ordering::Relaxed);

            let seq_outcome = self.session.update_sequence(packet.sequence());
            match seq_outcome {
                crate::session::SeqOutcome::Accepted { .. } => {}
                crate::session::SeqOutcome::Rejected => {
                    self.stats.frame_dropped.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            let extended_ts = self.session.update_timestamp(packet.timestamp());
            let arrival = packet.arrival_time;
            let _ = self
                .session
                .map_to_local(extended_ts, self.config.clock_rate, arrival);

            if let Some(last) = self.last_played_timestamp {
                if extended_ts <= last {
                    self.stats.frame_late.fetch_add(1, Ordering::Relaxed);
                    debug!(?extended_ts, ?last, "frame too late, dropped");
                    continue;
                }
            }

            if let Some(pos) = self.nodes.iter().position(|n| n.extended_timestamp() == extended_ts) {
                match self.nodes[pos].insert(packet) {
                    InsertOutcome::Inserted => {}
                    InsertOutcome::Duplicate | InsertOutcome::Unsupported => {
                        self.stats.frame_dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
                continue;
            }

            if !self.factory.validate(&packet) {
                self.stats.frame_dropped.fetch_add(1, Ordering::Relaxed);
                warn!("frame validation failed, dropped");
                continue;
            }

            let playout_time = arrival + self.config.initial_playout_offset();
            if let Some(node) = self.factory.create(packet, extended_ts, playout_time) {
                self.insert_node(node);
            } else {
                self.stats.frame_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Insert a freshly created node in ascending-timestamp order,
    /// mirroring `insertNode()`'s reverse scan.
    fn insert_node(&mut self, node: N) {
        let ts = node.extended_timestamp();
        let pos = self
            .nodes
            .iter()
            .rposition(|n| ts > n.extended_timestamp())
            .map(|p| p + 1)
            .unwrap_or(0);
        self.nodes.insert(pos, node);
        self.stats.note_node_count(self.nodes.len());
    }

    /// Release every node whose playout time has arrived, either to the
    /// sink (if ready) or to the drop counter (if its delay budget is
    /// exhausted). Grounded on `playout()`.
    pub fn playout(&mut self, sink: &dyn Sink, now: Instant) {
        while !self.nodes.is_empty() {
            if self.nodes[0].playout_time() > now {
                break;
            }

            let ready = self.nodes[0].is_ready();
            if ready {
                let node = self.nodes.remove(0);
                self.last_played_timestamp = Some(node.extended_timestamp());
                sink.put(node.into_completed());
                continue;
            }

            let delay_count = self.nodes[0].incr_delay();
            if delay_count < self.config.max_delay_slots {
                self.nodes[0].bump_playout_time(self.config.delay_tick());
                break;
            }

            let node = self.nodes.remove(0);
            self.last_played_timestamp = Some(node.extended_timestamp());
            self.stats.node_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Duration until the earliest node's playout time, capped at
    /// [`MAX_WAKEUP_INTERVAL`], matching `getNextWakeupTime()`.
    pub fn next_wakeup(&self, now: Instant) -> Duration {
        self.nodes
            .iter()
            .map(|n| n.playout_time().saturating_duration_since(now))
            .min()
            .unwrap_or(MAX_WAKEUP_INTERVAL)
            .min(MAX_WAKEUP_INTERVAL)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Runs a [`PlayoutBuffer`]'s drain/playout cycle until `shutdown` fires,
/// the async substitute for `CRtpPlayoutBuffer::threadProc`.
pub async fn run<N, F>(
    mut buffer: PlayoutBuffer<N, F>,
    queue: std::sync::Arc<InputQueue>,
    sink: std::sync::Arc<dyn Sink>,
    shutdown: std::sync::Arc<Notify>,
) where
    N: AccessUnitNode,
    F: NodeFactory<N>,
{
    loop {
        buffer.get_input_frames(&queue);
        buffer.playout(sink.as_ref(), Instant::now());

        if queue.is_empty() {
            let wakeup = buffer.next_wakeup(Instant::now());
            tokio::select! {
                _ = shutdown.notified() => break,
                _ = tokio::time::sleep(wakeup) => {}
            }
        }
    }
}
