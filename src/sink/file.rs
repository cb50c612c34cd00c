//! File sink: concatenates access units into one Annex-B byte stream.
//!
//! Grounded on the storage-sink contract in the original's `media_sink`/
//! `store` layer: the output file is created with truncate, written
//! append-only as nodes arrive, and closed on terminate. One file per
//! camera.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use super::{SinkProcessor, SinkWorker};
use crate::error::{Error, Result};
use crate::playout::{CompletedFrame, Sink};

struct FileProcessor {
    path: PathBuf,
    file: Mutex<File>,
}

impl SinkProcessor for FileProcessor {
    fn process(&self, frame: CompletedFrame) {
        let mut file = self.file.lock();
        if let Err(err) = file.write_all(&frame.data) {
            warn!(path = %self.path.display(), %err, "file sink write failed");
        }
    }
}

/// Concatenates completed access units into a single Annex-B byte stream.
pub struct FileSink {
    worker: Arc<SinkWorker<FileProcessor>>,
}

impl FileSink {
    /// Create (truncating any existing contents) the output file and
    /// start the sink worker.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| Error::SinkOpen {
                path: path.clone(),
                source,
            })?;

        let worker = SinkWorker::new(FileProcessor {
            path,
            file: Mutex::new(file),
        });
        worker.start();
        Ok(Self { worker })
    }

    pub async fn terminate(&self) {
        self.worker.terminate().await;
    }

    pub fn node_count(&self) -> u64 {
        self.worker.stats().nodes.load(Ordering::Relaxed)
    }
}

impl Sink for FileSink {
    fn put(&self, frame: CompletedFrame) {
        self.worker.put(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn concatenates_frames_in_arrival_order() {
        let path = std::env::temp_dir().join(format!("rtp_ingest_sink_test_{}.h264", std::process::id()));
        let sink = FileSink::open(&path).unwrap();

        sink.put(CompletedFrame {
            data: bytes::Bytes::from_static(&[0, 0, 0, 1, 0x65]),
            presentation_time: Instant::now(),
            is_idr: true,
        });
        sink.put(CompletedFrame {
            data: bytes::Bytes::from_static(&[0, 0, 0, 1, 0x41]),
            presentation_time: Instant::now(),
            is_idr: false,
        });

        sink.terminate().await;

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(contents, vec![0, 0, 0, 1, 0x65, 0, 0, 0, 1, 0x41]);
        assert_eq!(sink.node_count(), 2);
        std::fs::remove_file(&path).ok();
    }
}
