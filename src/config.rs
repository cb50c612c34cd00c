//! Per-camera and pool-wide configuration.
//!
//! Mirrors the control-plane call shape described in the external
//! interfaces: one call per camera delivering bind address, payload type,
//! fps, clock rate and delay tolerance. The control plane itself (RTSP/SDP
//! negotiation) is out of scope; this is just the data it is expected to
//! hand the core.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::CameraId;

/// Default RTP payload type used for H.264 video (RFC 3551 leaves 96-127
/// to dynamic assignment; 96 is the conventional first choice).
pub const DEFAULT_PAYLOAD_TYPE: u8 = 96;

/// Default video capture rate.
pub const DEFAULT_FPS: u32 = 25;

/// Default H.264 RTP clock rate (RFC 6184 mandates 90 kHz).
pub const DEFAULT_CLOCK_RATE: u32 = crate::time::clock_rates::VIDEO_90KHZ;

/// Default number of half-frame delay ticks tolerated before a node is
/// dropped as incomplete.
pub const DEFAULT_MAX_DELAY_SLOTS: u32 = 4;

/// Default input-queue capacity (packets).
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default frame pool high-water mark (packets).
pub const DEFAULT_POOL_CAPACITY: usize = 1000;

/// Per-camera configuration, as delivered by the (excluded) control plane.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CameraConfig {
    pub camera_id: CameraId,
    pub bind_address: SocketAddr,
    pub payload_type: u8,
    pub fps: u32,
    pub clock_rate: u32,
    pub max_delay_slots: u32,
    pub queue_capacity: usize,
}

impl CameraConfig {
    pub fn new(camera_id: impl Into<CameraId>, bind_address: SocketAddr) -> Self {
        Self {
            camera_id: camera_id.into(),
            bind_address,
            payload_type: DEFAULT_PAYLOAD_TYPE,
            fps: DEFAULT_FPS,
            clock_rate: DEFAULT_CLOCK_RATE,
            max_delay_slots: DEFAULT_MAX_DELAY_SLOTS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn with_payload_type(mut self, payload_type: u8) -> Self {
        self.payload_type = payload_type;
        self
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_clock_rate(mut self, clock_rate: u32) -> Self {
        self.clock_rate = clock_rate;
        self
    }

    pub fn with_max_delay_slots(mut self, slots: u32) -> Self {
        self.max_delay_slots = slots;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Validate the configuration, mirroring the original's
    /// `shell_assert(nMaxDelay >= 0 && nMaxDelay <= m_nFps*2)` invariant.
    pub fn validate(&self) -> Result<()> {
        if self.fps == 0 {
            return Err(Error::Config("fps must be non-zero".into()));
        }
        if self.clock_rate == 0 {
            return Err(Error::Config("clock_rate must be non-zero".into()));
        }
        if self.payload_type > 0x7f {
            return Err(Error::Config("payload_type must fit in 7 bits".into()));
        }
        if self.max_delay_slots > self.fps * 2 {
            return Err(Error::Config(format!(
                "max_delay_slots ({}) must be <= 2 * fps ({})",
                self.max_delay_slots,
                self.fps * 2
            )));
        }
        Ok(())
    }

    /// Duration of one playout deadline tick: `1 / (2 * fps)` seconds,
    /// per the spec's explicit resolution of the source's undocumented
    /// "maxDelay" units.
    pub fn delay_tick(&self) -> Duration {
        Duration::from_secs_f64(1.0 / (2.0 * self.fps as f64))
    }

    /// Scheduled playout time offset for a freshly created node:
    /// `1 / fps` seconds after arrival of its first packet.
    pub fn initial_playout_offset(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps as f64)
    }
}

/// Pool-wide settings shared by every camera registered with a
/// [`crate::receiver::ReceiverPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub frame_pool_capacity: usize,
    pub receive_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            frame_pool_capacity: DEFAULT_POOL_CAPACITY,
            receive_timeout: Duration::from_secs(16),
        }
    }
}

impl PoolConfig {
    pub fn with_frame_pool_capacity(mut self, capacity: usize) -> Self {
        self.frame_pool_capacity = capacity;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }
}
