//! RTP/H.264 multi-camera ingest pipeline: reception, reordering and
//! access-unit reassembly.
//!
//! Wire input is UDP datagrams carrying RFC 3550 RTP with the RFC 6184
//! H.264 payload format (Single NAL, FU-A, in-band SPS/PPS). Each camera
//! gets a [`Receiver`] (bound socket), an [`queue::InputQueue`], a
//! [`PlayoutBuffer`] and a [`sink::Sink`]; [`Pipeline`] wires one camera's
//! worth of these together the way the (excluded) control plane's
//! `start`/`stop` commands expect.

pub mod config;
pub mod error;
pub mod h264;
pub mod logging;
pub mod packet;
pub mod playout;
pub mod pool;
pub mod queue;
pub mod receiver;
pub mod session;
pub mod sink;
pub mod stats;
pub mod time;
pub mod types;

pub use config::{CameraConfig, PoolConfig};
pub use error::{Error, Result};
pub use playout::h264::H264NodeFactory;
pub use playout::PlayoutBuffer;
pub use receiver::{Receiver, ReceiverPool};
pub use stats::CameraStats;
pub use types::{CameraId, ExtendedSeq, ExtendedTimestamp};

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::playout::{PlayoutStats, Sink};
use crate::queue::InputQueue;

/// One camera's worth of receiver registration, input queue, playout
/// worker and sink, started and stopped together.
pub struct Pipeline {
    camera: CameraConfig,
    queue: Arc<InputQueue>,
    receiver_pool: Arc<ReceiverPool>,
    sink: Arc<dyn Sink>,
    playout_stats: Mutex<Option<Arc<PlayoutStats>>>,
    playout_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<Notify>,
}

impl Pipeline {
    pub fn new(camera: CameraConfig, receiver_pool: Arc<ReceiverPool>, sink: Arc<dyn Sink>) -> Result<Self> {
        camera.validate()?;
        let queue = Arc::new(InputQueue::new(camera.queue_capacity));
        Ok(Self {
            camera,
            queue,
            receiver_pool,
            sink,
            playout_stats: Mutex::new(None),
            playout_task: Mutex::new(None),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Register this camera's channel with the receiver pool and start
    /// its playout worker.
    pub async fn start(&self) -> Result<()> {
        self.receiver_pool.insert_channel(
            self.camera.bind_address,
            self.camera.payload_type,
            Arc::clone(&self.queue),
        );
        self.receiver_pool.init().await?;

        let factory = H264NodeFactory::new();
        let buffer = PlayoutBuffer::new(self.camera.clone(), factory);
        *self.playout_stats.lock() = Some(buffer.stats_handle());

        let queue = Arc::clone(&self.queue);
        let sink = Arc::clone(&self.sink);
        let shutdown = Arc::clone(&self.shutdown);
        let handle = tokio::spawn(playout::run(buffer, queue, sink, shutdown));
        *self.playout_task.lock() = Some(handle);
        Ok(())
    }

    /// Stop the playout worker and unregister this camera's channel.
    pub async fn stop(&self) {
        self.shutdown.notify_waiters();

        let handle = self.playout_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        self.receiver_pool
            .remove_channel(self.camera.bind_address, self.camera.payload_type)
            .await;
        *self.playout_stats.lock() = None;
    }

    pub fn camera(&self) -> &CameraConfig {
        &self.camera
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Aggregated operational counters for this camera, `None` before
    /// [`Self::start`] or after [`Self::stop`].
    pub fn stats(&self) -> Option<CameraStats> {
        let receiver = self.receiver_pool.get_receiver(self.camera.bind_address)?;
        let playout_stats = self.playout_stats.lock().clone()?;
        Some(CameraStats::snapshot(
            &receiver,
            &self.queue,
            &playout_stats,
            self.receiver_pool.frame_pool(),
        ))
    }
}
