//! UDP RTP receiver: one bound socket feeding zero or more payload-type
//! routed input queues.
//!
//! Grounded on `CRtpReceiver`: `threadProc()`'s acquire/receive/validate/
//! queue loop, `validateFrame()`'s network-to-host conversion (delegated
//! here to [`crate::packet::PacketBuffer::from_datagram`]), and
//! `queueFrame()`'s payload-type lookup. The receiver-level coarse loss
//! counter (`m_nLastSeq`/`m_nFrameLost`) is independent of the per-source
//! [`crate::session::RtpSourceState`] tracking that happens later in the
//! playout buffer -- this one is a cheap running diagnostic, not a
//! correctness mechanism.

pub mod pool;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use pool::ReceiverPool;

use crate::error::{Error, Result};
use crate::packet::{PacketBuffer, MAX_PACKET_SIZE};
use crate::pool::FramePool;
use crate::queue::InputQueue;

/// Coarse receiver-level counters, distinct from the per-camera
/// [`crate::playout::PlayoutStats`] and the per-queue overflow counters.
#[derive(Debug, Default)]
pub struct ReceiverStats {
    pub frame_count: AtomicU64,
    pub frame_drop: AtomicU64,
    pub frame_err: AtomicU64,
    pub frame_err_mem: AtomicU64,
    pub frame_lost: AtomicI64,
}

/// Receives RTP datagrams on one bound UDP socket and routes them to the
/// input queue registered for their payload type.
pub struct Receiver {
    bind_address: SocketAddr,
    pool: Arc<FramePool>,
    channels: Mutex<HashMap<u8, Arc<InputQueue>>>,
    last_seq: Mutex<Option<u16>>,
    local_addr: Mutex<Option<SocketAddr>>,
    stats: ReceiverStats,
    done: AtomicBool,
    shutdown: Notify,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Receiver {
    pub fn new(bind_address: SocketAddr, pool: Arc<FramePool>) -> Self {
        Self {
            bind_address,
            pool,
            channels: Mutex::new(HashMap::new()),
            last_seq: Mutex::new(None),
            local_addr: Mutex::new(None),
            stats: ReceiverStats::default(),
            done: AtomicBool::new(false),
            shutdown: Notify::new(),
            task: Mutex::new(None),
        }
    }

    pub fn bind_address(&self) -> SocketAddr {
        self.bind_address
    }

    /// Actual bound local address, available once [`Self::init`] succeeds
    /// (useful in tests where `bind_address` is an ephemeral `:0` port).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    /// Register an input queue for a payload type. A duplicate
    /// registration is ignored, mirroring `insertChannel`'s
    /// duplicate-ignored log line.
    pub fn insert_channel(&self, payload_type: u8, queue: Arc<InputQueue>) {
        let mut channels = self.channels.lock();
        if channels.contains_key(&payload_type) {
            debug!(bind = %self.bind_address, payload_type, "duplicate playout channel ignored");
        } else {
            channels.insert(payload_type, queue);
        }
    }

    /// Unregister a payload type's queue. Returns `true` if one was
    /// removed.
    pub fn remove_channel(&self, payload_type: u8) -> bool {
        self.channels.lock().remove(&payload_type).is_some()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    /// Bind the socket and spawn the receive worker.
    pub async fn init(self: &Arc<Self>, receive_timeout: Duration) -> Result<()> {
        let socket =
            UdpSocket::bind(self.bind_address)
                .await
                .map_err(|source| Error::Bind {
                    addr: self.bind_address,
                    source,
                })?;
        *self.local_addr.lock() = socket.local_addr().ok();
        debug!(bind = %self.bind_address, "rtp receiver listening");

        self.done.store(false, Ordering::Relaxed);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run(socket, receive_timeout).await });
        *self.task.lock() = Some(handle);
        Ok(())
    }

    /// Signal the worker to stop and wait for it to exit.
    pub async fn terminate(&self) {
        self.done.store(true, Ordering::Relaxed);
        self.shutdown.notify_waiters();

        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn run(self: Arc<Self>, socket: UdpSocket, receive_timeout: Duration) {
        loop {
            if self.done.load(Ordering::Relaxed) {
                break;
            }

            let mut frame = match self.pool.acquire() {
                Some(frame) => frame,
                None => {
                    self.stats.frame_err_mem.fetch_add(1, Ordering::Relaxed);
                    tokio::select! {
                        _ = self.shutdown.notified() => break,
                        _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                    }
                    continue;
                }
            };

            frame.buf_mut().resize(MAX_PACKET_SIZE, 0);
            let recv = tokio::select! {
                _ = self.shutdown.notified() => break,
                res = tokio::time::timeout(receive_timeout, socket.recv_from(frame.buf_mut())) => res,
            };

            match recv {
                Ok(Ok((len, _src))) => {
                    frame.buf_mut().truncate(len);
                    let arrival = Instant::now();
                    match PacketBuffer::from_datagram(frame, arrival) {
                        Ok(packet) => {
                            self.track_loss(packet.sequence());
                            self.queue_frame(packet);
                        }
                        Err(err) => {
                            self.stats.frame_err.fetch_add(1, Ordering::Relaxed);
                            debug!(%err, "dropped invalid rtp frame");
                        }
                    }
                }
                Ok(Err(err)) => {
                    self.stats.frame_err.fetch_add(1, Ordering::Relaxed);
                    warn!(%err, "rtp socket receive failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(_timeout) => {}
            }
        }
    }

    /// Cheap running loss estimate over the raw (non-extended) sequence
    /// number, independent of the per-source probation state machine.
    fn track_loss(&self, seq: u16) {
        let mut last = self.last_seq.lock();
        if let Some(prev) = *last {
            let expected = prev.wrapping_add(1);
            if seq != expected {
                let delta = seq.wrapping_sub(expected) as i16;
                self.stats.frame_lost.fetch_add(delta as i64, Ordering::Relaxed);
            }
        }
        *last = Some(seq);
    }

    fn queue_frame(&self, packet: PacketBuffer) {
        let queue = self.channels.lock().get(&packet.payload_type()).cloned();
        match queue {
            Some(queue) => {
                self.stats.frame_count.fetch_add(1, Ordering::Relaxed);
                queue.put(packet);
            }
            None => {
                self.stats.frame_drop.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rtp_packet(payload_type: u8, seq: u16, ts: u32) -> Vec<u8> {
        let mut word0: u32 = 2u32 << 30;
        word0 |= (payload_type as u32) << 16;
        word0 |= seq as u32;

        let mut buf = Vec::with_capacity(16);
        buf.extend_from_slice(&word0.to_be_bytes());
        buf.extend_from_slice(&ts.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&[0x67, 0x42, 0x00, 0x1f]);
        buf
    }

    #[tokio::test]
    async fn routes_packet_to_registered_queue() {
        let pool = FramePool::new(4);
        let queue = Arc::new(InputQueue::new(4));
        let receiver = Arc::new(Receiver::new("127.0.0.1:0".parse().unwrap(), pool));
        receiver.insert_channel(96, Arc::clone(&queue));
        receiver.init(Duration::from_secs(2)).await.unwrap();

        let addr = receiver.local_addr().unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(&rtp_packet(96, 7, 3600), addr)
            .await
            .unwrap();

        for _ in 0..50 {
            if !queue.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let packet = queue.try_pop().expect("packet should have been routed");
        assert_eq!(packet.sequence(), 7);
        assert_eq!(receiver.stats().frame_count.load(Ordering::Relaxed), 1);

        receiver.terminate().await;
    }

    #[tokio::test]
    async fn unregistered_payload_type_is_dropped() {
        let pool = FramePool::new(4);
        let receiver = Arc::new(Receiver::new("127.0.0.1:0".parse().unwrap(), pool));
        receiver.init(Duration::from_secs(2)).await.unwrap();

        let addr = receiver.local_addr().unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(&rtp_packet(97, 1, 3600), addr)
            .await
            .unwrap();

        for _ in 0..50 {
            if receiver.stats().frame_drop.load(Ordering::Relaxed) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(receiver.stats().frame_drop.load(Ordering::Relaxed), 1);
        receiver.terminate().await;
    }
}
