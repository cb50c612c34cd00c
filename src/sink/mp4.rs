//! MP4 muxer boundary: gates on the first IDR frame, then hands
//! `(compressed_buffer, presentation_time, is_idr)` tuples onward.
//!
//! Grounded on `CMp4Recorder::processVideoFrame`'s `m_hrPts` lead-frame
//! drop gate: nothing crosses the boundary until the first IDR frame
//! arrives, and every frame after that is forwarded regardless of its own
//! keyframe status. The muxer itself is out of scope; [`MuxerHandoff`] is
//! the seam.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::{SinkProcessor, SinkWorker};
use crate::playout::{CompletedFrame, Sink};

/// Invoked with each tuple once the lead-frame gate has opened. Stands in
/// for the handoff into the (out-of-scope) MP4 muxer.
pub type MuxerHandoff = Box<dyn Fn(CompletedFrame) + Send + Sync>;

struct Mp4Processor {
    started: AtomicBool,
    dropped_lead: AtomicU64,
    handoff: MuxerHandoff,
}

impl SinkProcessor for Mp4Processor {
    fn process(&self, frame: CompletedFrame) {
        if !self.started.load(Ordering::Relaxed) {
            if !frame.is_idr {
                self.dropped_lead.fetch_add(1, Ordering::Relaxed);
                return;
            }
            self.started.store(true, Ordering::Relaxed);
        }
        (self.handoff)(frame);
    }
}

/// Muxer-boundary sink: drops every frame until the first IDR, then
/// forwards all subsequent frames verbatim.
pub struct Mp4Sink {
    worker: Arc<SinkWorker<Mp4Processor>>,
}

impl Mp4Sink {
    pub fn new(handoff: MuxerHandoff) -> Self {
        let worker = SinkWorker::new(Mp4Processor {
            started: AtomicBool::new(false),
            dropped_lead: AtomicU64::new(0),
            handoff,
        });
        worker.start();
        Self { worker }
    }

    pub async fn terminate(&self) {
        self.worker.terminate().await;
    }

    pub fn dropped_lead_frames(&self) -> u64 {
        self.worker.processor().dropped_lead.load(Ordering::Relaxed)
    }
}

impl Sink for Mp4Sink {
    fn put(&self, frame: CompletedFrame) {
        self.worker.put(frame);
    }
}
