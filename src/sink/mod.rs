//! Sink worker plumbing shared by every concrete sink.
//!
//! Grounded on `CVideoSinkV`: `put()` enqueues a node and wakes the
//! worker, `threadProc()` drains nodes in arrival order calling
//! `processNode()`, `terminate()` stops the worker and clears any
//! unprocessed nodes. [`SinkProcessor`] generalizes `processNode()` so
//! concrete sinks ([`file::FileSink`], [`mp4::Mp4Sink`]) only need to
//! supply the processing step.

pub mod file;
pub mod mp4;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::playout::{CompletedFrame, Sink};

/// Longest the worker idles with an empty queue before re-checking the
/// termination flag, mirroring `VIDEO_SINKV_IDLE`.
const IDLE_TIMEOUT: Duration = Duration::from_secs(8);

/// The sink-specific half of handling a completed access unit: write to a
/// file, hand off to a muxer, etc. Expected to return promptly; the
/// worker has no other progress to make while `process` runs.
pub trait SinkProcessor: Send + Sync + 'static {
    fn process(&self, frame: CompletedFrame);
}

#[derive(Debug, Default)]
pub struct SinkStats {
    pub nodes: AtomicU64,
}

/// Node queue plus dedicated worker task, reused by every concrete sink.
pub struct SinkWorker<P> {
    processor: Arc<P>,
    queue: Mutex<VecDeque<CompletedFrame>>,
    notify: Notify,
    done: AtomicBool,
    stats: SinkStats,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<P: SinkProcessor> SinkWorker<P> {
    pub fn new(processor: P) -> Arc<Self> {
        Arc::new(Self {
            processor: Arc::new(processor),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            done: AtomicBool::new(false),
            stats: SinkStats::default(),
            task: Mutex::new(None),
        })
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn stats(&self) -> &SinkStats {
        &self.stats
    }

    pub fn start(self: &Arc<Self>) {
        self.done.store(false, Ordering::Relaxed);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run().await });
        *self.task.lock() = Some(handle);
    }

    pub async fn terminate(&self) {
        self.done.store(true, Ordering::Relaxed);
        self.notify.notify_waiters();

        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.queue.lock().clear();
    }

    fn pop(&self) -> Option<CompletedFrame> {
        self.queue.lock().pop_front()
    }

    async fn run(self: Arc<Self>) {
        loop {
            while let Some(frame) = self.pop() {
                self.processor.process(frame);
            }

            if self.done.load(Ordering::Relaxed) {
                break;
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(IDLE_TIMEOUT) => {}
            }

            if self.done.load(Ordering::Relaxed) && self.queue.lock().is_empty() {
                break;
            }
        }
    }
}

impl<P: SinkProcessor> Sink for SinkWorker<P> {
    fn put(&self, frame: CompletedFrame) {
        if self.done.load(Ordering::Relaxed) {
            return;
        }
        self.queue.lock().push_back(frame);
        self.stats.nodes.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
    }
}
