//! Pool of [`Receiver`]s keyed by bind address, sharing one [`FramePool`].
//!
//! Grounded on `CRtpReceiverPool`: one receiver per distinct bind address,
//! created lazily on the first channel registered against it and torn down
//! once its last channel is removed.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use super::Receiver;
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::pool::FramePool;
use crate::queue::InputQueue;

pub struct ReceiverPool {
    frame_pool: Arc<FramePool>,
    receivers: Mutex<HashMap<SocketAddr, Arc<Receiver>>>,
    receive_timeout: Duration,
    receiving: AtomicBool,
}

impl ReceiverPool {
    pub fn new(config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            frame_pool: FramePool::new(config.frame_pool_capacity),
            receivers: Mutex::new(HashMap::new()),
            receive_timeout: config.receive_timeout,
            receiving: AtomicBool::new(false),
        })
    }

    pub fn frame_pool(&self) -> &Arc<FramePool> {
        &self.frame_pool
    }

    pub fn is_receiving(&self) -> bool {
        self.receiving.load(Ordering::Relaxed)
    }

    /// Look up the receiver bound at `bind_address`, if one has been
    /// registered. Non-mutating, unlike [`Self::insert_channel`].
    pub fn get_receiver(&self, bind_address: SocketAddr) -> Option<Arc<Receiver>> {
        self.receivers.lock().get(&bind_address).cloned()
    }

    /// Register a channel for `payload_type` at `bind_address`, creating
    /// the receiver for that address if it doesn't exist yet.
    pub fn insert_channel(
        &self,
        bind_address: SocketAddr,
        payload_type: u8,
        queue: Arc<InputQueue>,
    ) -> Arc<Receiver> {
        let mut receivers = self.receivers.lock();
        let receiver = receivers
            .entry(bind_address)
            .or_insert_with(|| Arc::new(Receiver::new(bind_address, Arc::clone(&self.frame_pool))))
            .clone();
        receiver.insert_channel(payload_type, Arc::clone(&queue));
        receiver
    }

    /// Unregister a channel. If it was the receiver's last channel, the
    /// receiver is terminated and dropped from the pool.
    pub async fn remove_channel(&self, bind_address: SocketAddr, payload_type: u8) {
        let drained = {
            let mut receivers = self.receivers.lock();
            match receivers.get(&bind_address) {
                Some(receiver) => {
                    receiver.remove_channel(payload_type);
                    if receiver.channel_count() == 0 {
                        let receiver = Arc::clone(receiver);
                        receivers.remove(&bind_address);
                        Some(receiver)
                    } else {
                        None
                    }
                }
                None => None,
            }
        };

        if let Some(receiver) = drained {
            receiver.terminate().await;
        }
    }

    /// Start every registered receiver. Succeeds if at least one bound
    /// successfully, matching `CRtpReceiverPool::init()`'s "best effort
    /// across receivers" contract.
    pub async fn init(&self) -> Result<()> {
        let receivers: Vec<Arc<Receiver>> = self.receivers.lock().values().cloned().collect();
        let mut successes = 0;
        for receiver in &receivers {
            match receiver.init(self.receive_timeout).await {
                Ok(()) => successes += 1,
                Err(err) => warn!(bind = %receiver.bind_address(), %err, "receiver failed to start"),
            }
        }

        self.receiving.store(successes > 0, Ordering::Relaxed);
        if successes > 0 || receivers.is_empty() {
            Ok(())
        } else {
            Err(Error::AllReceiversFailed {
                pool: "receiver_pool".into(),
            })
        }
    }

    /// Stop every receiver.
    pub async fn terminate(&self) {
        let receivers: Vec<Arc<Receiver>> = self.receivers.lock().values().cloned().collect();
        for receiver in &receivers {
            receiver.terminate().await;
        }
        self.receiving.store(false, Ordering::Relaxed);
    }

    pub fn receiver_count(&self) -> usize {
        self.receivers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lazily_creates_and_tears_down_receivers() {
        let pool = ReceiverPool::new(PoolConfig::default());
        let queue = Arc::new(InputQueue::new(4));
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();

        pool.insert_channel(addr, 96, Arc::clone(&queue));
        assert_eq!(pool.receiver_count(), 1);

        pool.init().await.unwrap();
        assert!(pool.is_receiving());

        pool.remove_channel(addr, 96).await;
        assert_eq!(pool.receiver_count(), 0);
    }
}
