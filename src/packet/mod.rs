//! RTP packet buffer: the unit of ownership handed between pool, receiver,
//! input queue and access-unit node.

pub mod header;

use std::time::Instant;

pub use header::{decode_and_validate, HeaderError, RtpHeader, FIXED_HEADER_LEN, RTP_VERSION};

use crate::pool::PooledFrame;

/// Maximum RTP datagram size this crate accepts, matching the ~2 KiB
/// ceiling from the external interfaces section.
pub const MAX_PACKET_SIZE: usize = 2048;

/// A single RTP packet, exclusively owned by whichever collaborator
/// currently holds it (pool, receiver, input queue, or access-unit node).
///
/// Wraps a [`PooledFrame`] rather than a bare buffer: returning a packet to
/// its pool is modeled as the `PooledFrame`'s `Drop` impl running when this
/// value (or whatever owns it) goes out of scope, rather than as a
/// reference-counted "owner field" check. Rust's ownership system makes the
/// "buffer owned by exactly one collaborator" invariant a compile-time
/// property instead of a runtime assertion.
#[derive(Debug)]
pub struct PacketBuffer {
    frame: PooledFrame,
    /// Real length after stripping any RTP padding trailer.
    pub real_length: usize,
    /// Monotonic arrival time, microsecond-resolution in practice (the
    /// resolution `Instant` actually offers on the platform).
    pub arrival_time: Instant,
    pub header: RtpHeader,
}

impl PacketBuffer {
    /// Construct a buffer directly from a received datagram, decoding and
    /// validating its header in the process.
    pub fn from_datagram(mut frame: PooledFrame, arrival_time: Instant) -> Result<Self, HeaderError> {
        let (header, real_length) = decode_and_validate(frame.buf_mut())?;
        Ok(Self {
            frame,
            real_length,
            arrival_time,
            header,
        })
    }

    /// Payload bytes, i.e. everything past the fixed/CSRC/extension header
    /// and before any padding trailer.
    pub fn payload(&self) -> &[u8] {
        &self.frame.buf()[self.header.payload_offset..self.real_length]
    }

    pub fn sequence(&self) -> u16 {
        self.header.sequence
    }

    pub fn timestamp(&self) -> u32 {
        self.header.timestamp
    }

    pub fn marker(&self) -> bool {
        self.header.marker
    }

    pub fn payload_type(&self) -> u8 {
        self.header.payload_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::FramePool;

    fn raw_packet(seq: u16, ts: u32, marker: bool, payload: &[u8]) -> PooledFrame {
        let pool = FramePool::new(1);
        let mut frame = pool.acquire().unwrap();

        let mut word0: u32 = (RTP_VERSION as u32) << 30;
        if marker {
            word0 |= 1 << 23;
        }
        word0 |= 96u32 << 16;
        word0 |= seq as u32;

        let buf = frame.buf_mut();
        buf.extend_from_slice(&word0.to_be_bytes());
        buf.extend_from_slice(&ts.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(payload);
        frame
    }

    #[test]
    fn exposes_payload_after_fixed_header() {
        let raw = raw_packet(42, 3600, true, &[0x67, 0x42, 0x00, 0x1f]);
        let buf = PacketBuffer::from_datagram(raw, Instant::now()).unwrap();
        assert_eq!(buf.payload(), &[0x67, 0x42, 0x00, 0x1f]);
        assert_eq!(buf.sequence(), 42);
        assert_eq!(buf.timestamp(), 3600);
        assert!(buf.marker());
    }
}
