//! H.264 access-unit assembly: groups packets sharing an RTP timestamp
//! into one node, validates FU-A fragment ordering, and flattens the
//! result into an Annex-B byte stream.
//!
//! Grounded on `CRtpPlayoutNodeH264`/`CRtpPlayoutBufferH264`:
//! `insertFrame()`'s SPS/PPS capture and last-frame detection,
//! `checkNodeValid()`'s sequence-contiguity + FU-A start/end bookkeeping,
//! and `buildCompressed()`'s Annex-B assembly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use crate::h264::{
    self, FuHeader, NalHeader, NAL_TYPE_FU_A, NAL_TYPE_IDR_SLICE, NAL_TYPE_PIC_PARAM,
    NAL_TYPE_SEQ_PARAM,
};
use crate::packet::PacketBuffer;
use crate::playout::{AccessUnitNode, CompletedFrame, NodeFactory};
use crate::types::{ExtendedTimestamp, InsertOutcome};

const ANNEXB_START: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Shared in-band SPS/PPS cache for a single H.264 source, truncating
/// (never rejecting) oversized parameter sets.
#[derive(Debug, Default)]
pub struct ParamSetCache {
    sps: Vec<u8>,
    pps: Vec<u8>,
}

impl ParamSetCache {
    pub fn set_sps(&mut self, data: &[u8]) {
        let n = data.len().min(h264::MAX_PARAM_SET_SIZE);
        self.sps = data[..n].to_vec();
    }

    pub fn set_pps(&mut self, data: &[u8]) {
        let n = data.len().min(h264::MAX_PARAM_SET_SIZE);
        self.pps = data[..n].to_vec();
    }

    fn write_into(&self, out: &mut BytesMut) {
        if !self.sps.is_empty() {
            out.extend_from_slice(&ANNEXB_START);
            out.extend_from_slice(&self.sps);
        }
        if !self.pps.is_empty() {
            out.extend_from_slice(&ANNEXB_START);
            out.extend_from_slice(&self.pps);
        }
    }

    fn byte_len(&self) -> usize {
        let mut len = self.sps.len() + self.pps.len();
        if !self.sps.is_empty() {
            len += 4;
        }
        if !self.pps.is_empty() {
            len += 4;
        }
        len
    }
}

mod flag {
    pub const LAST: u8 = 1;
    pub const PARAMS: u8 = 2;
    pub const READY: u8 = 8;
}

/// One H.264 access unit under construction (or already assembled).
pub struct H264Node {
    params: Arc<Mutex<ParamSetCache>>,
    unsupported: Arc<AtomicU64>,
    packets: Vec<PacketBuffer>,
    flags: u8,
    extended_ts: ExtendedTimestamp,
    playout_time: Instant,
    delay_ticks: u32,
    compressed: Option<(Bytes, bool)>,
}

impl H264Node {
    fn new(
        params: Arc<Mutex<ParamSetCache>>,
        unsupported: Arc<AtomicU64>,
        extended_ts: ExtendedTimestamp,
        playout_time: Instant,
    ) -> Self {
        Self {
            params,
            unsupported,
            packets: Vec::new(),
            flags: 0,
            extended_ts,
            playout_time,
            delay_ticks: 0,
            compressed: None,
        }
    }

    /// Insert in sequence-number order, rejecting duplicates; mirrors
    /// `CRtpPlayoutNode::insertFrame`'s descending scan.
    fn insert_ordered(&mut self, packet: PacketBuffer) -> InsertOutcome {
        let seq = packet.sequence();
        for (i, existing) in self.packets.iter().enumerate().rev() {
            let existing_seq = existing.sequence();
            if seq == existing_seq {
                return InsertOutcome::Duplicate;
            }
            if seq > existing_seq {
                self.packets.insert(i + 1, packet);
                return InsertOutcome::Inserted;
            }
        }
        self.packets.insert(0, packet);
        InsertOutcome::Inserted
    }

    fn check_valid(&self) -> bool {
        if self.flags & flag::LAST == 0 {
            return false;
        }

        let mut fua_start = false;
        let mut fua_end = false;
        let mut next_seq = self.packets[0].sequence();

        for packet in &self.packets {
            if packet.sequence() != next_seq {
                return false;
            }
            next_seq = next_seq.wrapping_add(1);

            let payload = packet.payload();
            if payload.is_empty() {
                return false;
            }
            let nal = NalHeader::parse(payload[0]);

            if nal.nal_unit_type == NAL_TYPE_FU_A {
                if payload.len() < 2 {
                    return false;
                }
                let fu = FuHeader::parse(payload[1]);
                if fu.start {
                    if fua_start || fua_end {
                        return false;
                    }
                    fua_start = true;
                } else if fu.end {
                    if !fua_start || fua_end {
                        return false;
                    }
                    fua_end = true;
                } else if !fua_start || fua_end {
                    return false;
                }
            }
        }

        fua_start == fua_end
    }

    /// Flatten the node's packets into an Annex-B byte stream. Mirrors
    /// `buildCompressed()`; returns `None` if an unsupported aggregation/
    /// fragmentation shape is encountered, incrementing the shared
    /// unsupported-frame counter the way `incrUnsupportedFrame()` does.
    fn build_compressed(&mut self) {
        let params = self.params.lock();
        let mut out = BytesMut::with_capacity(params.byte_len() + self.packets.len() * 8);
        let mut is_idr = false;

        if self.flags & flag::PARAMS == 0 {
            params.write_into(&mut out);
        }
        drop(params);

        let mut need_separator = self.flags & flag::PARAMS == 0 && !out.is_empty();

        for packet in &self.packets {
            let payload = packet.payload();
            let nal = NalHeader::parse(payload[0]);

            if h264::is_unsupported_shape(nal.nal_unit_type) {
                self.unsupported.fetch_add(1, Ordering::Relaxed);
                return;
            }

            if nal.nal_unit_type == NAL_TYPE_FU_A {
                let fu = FuHeader::parse(payload[1]);
                if fu.start {
                    out.extend_from_slice(&ANNEXB_START);
                    let reconstructed = NalHeader {
                        forbidden_zero_bit: nal.forbidden_zero_bit,
                        nal_ref_idc: nal.nal_ref_idc,
                        nal_unit_type: fu.nal_type,
                    };
                    out.extend_from_slice(&[reconstructed.encode()]);
                    if reconstructed.nal_unit_type == NAL_TYPE_IDR_SLICE {
                        is_idr = true;
                    }
                    need_separator = false;
                }
                if need_separator {
                    out.extend_from_slice(&ANNEXB_START);
                    need_separator = false;
                }
                out.extend_from_slice(&payload[2..]);
            } else {
                out.extend_from_slice(&ANNEXB_START);
                need_separator = false;
                out.extend_from_slice(payload);
                if nal.nal_unit_type == NAL_TYPE_IDR_SLICE {
                    is_idr = true;
                }
            }
        }

        self.compressed = Some((out.freeze(), is_idr));
        self.flags |= flag::READY;
    }
}

impl AccessUnitNode for H264Node {
    fn insert(&mut self, packet: PacketBuffer) -> InsertOutcome {
        let payload = packet.payload();
        if payload.is_empty() {
            return InsertOutcome::Unsupported;
        }
        let nal = NalHeader::parse(payload[0]);
        let nal_type = nal.nal_unit_type;
        let marker = packet.marker();

        let outcome = self.insert_ordered(packet);
        if outcome != InsertOutcome::Inserted {
            return outcome;
        }

        if nal_type == NAL_TYPE_SEQ_PARAM {
            self.params.lock().set_sps(payload);
            self.flags |= flag::PARAMS;
        } else if nal_type == NAL_TYPE_PIC_PARAM {
            self.params.lock().set_pps(payload);
            self.flags |= flag::PARAMS;
        }

        if (h264::is_slice(nal_type) || h264::is_rtp_aggregation_or_fragmentation(nal_type)) && marker {
            self.flags |= flag::LAST;
        }

        if self.check_valid() {
            self.build_compressed();
        }

        InsertOutcome::Inserted
    }

    fn is_ready(&self) -> bool {
        self.flags & flag::READY != 0
    }

    fn extended_timestamp(&self) -> ExtendedTimestamp {
        self.extended_ts
    }

    fn playout_time(&self) -> Instant {
        self.playout_time
    }

    fn set_playout_time(&mut self, at: Instant) {
        self.playout_time = at;
    }

    fn bump_playout_time(&mut self, delta: Duration) {
        self.playout_time += delta;
    }

    fn delay_ticks(&self) -> u32 {
        self.delay_ticks
    }

    fn incr_delay(&mut self) -> u32 {
        let value = self.delay_ticks;
        self.delay_ticks += 1;
        value
    }

    fn into_completed(self) -> CompletedFrame {
        let (data, is_idr) = self.compressed.expect("into_completed called before ready");
        CompletedFrame {
            data,
            presentation_time: self
                .packets
                .first()
                .map(|p| p.arrival_time)
                .unwrap_or(self.playout_time),
            is_idr,
        }
    }
}

/// Builds [`H264Node`]s and rejects the RTP aggregation/fragmentation
/// shapes this crate does not support, mirroring `validateFrame()`.
pub struct H264NodeFactory {
    params: Arc<Mutex<ParamSetCache>>,
    unsupported: Arc<AtomicU64>,
}

impl H264NodeFactory {
    pub fn new() -> Self {
        Self {
            params: Arc::new(Mutex::new(ParamSetCache::default())),
            unsupported: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn unsupported_frames(&self) -> u64 {
        self.unsupported.load(Ordering::Relaxed)
    }
}

impl Default for H264NodeFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeFactory<H264Node> for H264NodeFactory {
    fn validate(&self, packet: &PacketBuffer) -> bool {
        let payload = packet.payload();
        if payload.is_empty() {
            return false;
        }
        let nal = NalHeader::parse(payload[0]);
        if h264::is_unsupported_shape(nal.nal_unit_type) {
            return false;
        }
        if nal.nal_unit_type == NAL_TYPE_FU_A && payload.len() < 2 {
            return false;
        }
        true
    }

    fn create(&mut self, packet: PacketBuffer, extended_ts: ExtendedTimestamp, playout_time: Instant) -> Option<H264Node> {
        let mut node = H264Node::new(
            Arc::clone(&self.params),
            Arc::clone(&self.unsupported),
            extended_ts,
            playout_time,
        );
        match node.insert(packet) {
            InsertOutcome::Inserted => Some(node),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::FramePool;

    fn build_nal(pool: &std::sync::Arc<FramePool>, seq: u16, ts: u32, marker: bool, nal_byte: u8, rbsp: &[u8]) -> PacketBuffer {
        let mut frame = pool.acquire().unwrap();
        let mut word0: u32 = 2u32 << 30;
        if marker {
            word0 |= 1 << 23;
        }
        word0 |= 96u32 << 16;
        word0 |= seq as u32;
        let buf = frame.buf_mut();
        buf.extend_from_slice(&word0.to_be_bytes());
        buf.extend_from_slice(&ts.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&[nal_byte]);
        buf.extend_from_slice(rbsp);
        PacketBuffer::from_datagram(frame, Instant::now()).unwrap()
    }

    #[test]
    fn single_nal_node_becomes_ready_on_marker() {
        let pool = FramePool::new(8);
        let mut factory = H264NodeFactory::new();
        let pkt = build_nal(&pool, 1, 3600, true, 0x65, &[0xaa, 0xbb]);
        let node = factory.create(pkt, ExtendedTimestamp(3600), Instant::now()).unwrap();
        assert!(node.is_ready());
        let completed = node.into_completed();
        assert!(completed.is_idr);
        assert_eq!(&completed.data[..4], &ANNEXB_START);
        assert_eq!(&completed.data[4..], &[0x65, 0xaa, 0xbb]);
    }

    fn build_fua(
        pool: &std::sync::Arc<FramePool>,
        seq: u16,
        ts: u32,
        marker: bool,
        fu_header: u8,
        indicator: u8,
        data: &[u8],
    ) -> PacketBuffer {
        let mut frame = pool.acquire().unwrap();
        let mut word0: u32 = 2u32 << 30;
        if marker {
            word0 |= 1 << 23;
        }
        word0 |= 96u32 << 16;
        word0 |= seq as u32;
        let buf = frame.buf_mut();
        buf.extend_from_slice(&word0.to_be_bytes());
        buf.extend_from_slice(&ts.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&[indicator, fu_header]);
        buf.extend_from_slice(data);
        PacketBuffer::from_datagram(frame, Instant::now()).unwrap()
    }

    #[test]
    fn fua_fragments_reassemble_in_order() {
        let pool = FramePool::new(8);
        let mut factory = H264NodeFactory::new();

        // FU indicator byte: nal_ref_idc=3 in bits 6..5, type field (unused by
        // FU-A reassembly) carries FU_A itself.
        let indicator = (3u8 << 5) | NAL_TYPE_FU_A;
        let start_hdr = 0b1000_0000 | NAL_TYPE_IDR_SLICE;
        let end_hdr = 0b0100_0000 | NAL_TYPE_IDR_SLICE;

        let start_pkt = build_fua(&pool, 10, 7200, false, start_hdr, indicator, &[0x11, 0x22]);
        let mut node = factory.create(start_pkt, ExtendedTimestamp(7200), Instant::now()).unwrap();
        assert!(!node.is_ready());

        let end_pkt = build_fua(&pool, 11, 7200, true, end_hdr, indicator, &[0x33]);
        assert_eq!(node.insert(end_pkt), InsertOutcome::Inserted);
        assert!(node.is_ready());

        let completed = node.into_completed();
        assert!(completed.is_idr);
        assert_eq!(&completed.data[..4], &ANNEXB_START);
        assert_eq!(completed.data[4], (3u8 << 5) | NAL_TYPE_IDR_SLICE);
        assert_eq!(&completed.data[5..], &[0x11, 0x22, 0x33]);
    }
}
