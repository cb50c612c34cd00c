//! RTP source state machine: sequence-number and timestamp wrap tracking,
//! bootstrap probation, and sender-restart re-sync.
//!
//! A direct generalization of `rtp_update_seq`/`rtp_init_seq`/
//! `rtp_boot_source` (for sequence numbers) plus an analogous tracker for
//! the 32-bit RTP timestamp, since the same dropout/misorder reasoning
//! applies to both wrapping counters.

use std::time::Instant;

use crate::types::{ExtendedSeq, ExtendedTimestamp};

/// Number of consecutive in-order packets required before a source is
/// considered valid (bootstrap gate).
pub const MIN_SEQUENTIAL: u16 = 2;

/// Largest forward sequence jump accepted as an ordinary gap (loss).
pub const MAX_DROPOUT: u32 = 3000;

/// Largest backward jump accepted as reordering rather than a restart.
pub const MAX_MISORDER: u32 = 100;

const RTP_SEQ_MOD: u32 = 1 << 16;

/// Analogous constants for the 32-bit RTP timestamp, scaled by the ratio
/// between the sequence-number dropout window and the clock rate assumed
/// by the source (25 fps @ 90 kHz, i.e. 3600 ticks/frame): `MAX_DROPOUT /
/// 25 * 90_000`.
pub const MAX_DROPOUT_TIMELINE: u64 = MAX_DROPOUT as u64 / 25 * 90_000;
const RTP_TIMELINE_MOD: u64 = 1u64 << 32;

/// Outcome of feeding a packet's sequence number through [`RtpSourceState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqOutcome {
    /// Packet accepted; `extended` carries its wrap-resolved sequence.
    Accepted { extended: ExtendedSeq },
    /// Packet rejected: still on probation, a large jump pending
    /// confirmation, or the source has not bootstrapped yet.
    Rejected,
}

/// Per-source sequence number and timestamp tracking, mirroring
/// `rtp_source_t`'s `base_seq`/`max_seq`/`bad_seq`/`cycles`/`probation`
/// fields (the jitter/transit fields belong to RTCP reception-report
/// computation and are out of scope here).
#[derive(Debug)]
pub struct RtpSourceState {
    base_seq: u16,
    max_seq: u16,
    bad_seq: u32,
    cycles: u64,
    probation: u16,
    received: u64,
    bootstrapped: bool,

    max_ts: u32,
    time_cycles: u64,
    ts_bootstrapped: bool,

    /// Wall-clock instant and extended timestamp of the first packet seen,
    /// anchoring the RTP-timestamp-to-wall-clock mapping.
    epoch: Option<(Instant, ExtendedTimestamp)>,

    /// Minimum observed `arrival - map_to_local(extended_timestamp)`,
    /// tracking the sender/receiver clock offset the way
    /// `getInputFrames()` narrows `hrClockOffset` over time: the smallest
    /// observed gap is the best estimate of pure network transit delay,
    /// since jitter can only add to it, never subtract.
    clock_offset_min: Option<std::time::Duration>,
}

impl RtpSourceState {
    pub fn new() -> Self {
        Self {
            base_seq: 0,
            max_seq: 0,
            bad_seq: RTP_SEQ_MOD + 1,
            cycles: 0,
            probation: MIN_SEQUENTIAL,
            received: 0,
            bootstrapped: false,

            max_ts: 0,
            time_cycles: 0,
            ts_bootstrapped: false,

            epoch: None,
            clock_offset_min: None,
        }
    }

    fn init_seq(&mut self, seq: u16) {
        self.base_seq = seq;
        self.max_seq = seq;
        self.bad_seq = RTP_SEQ_MOD + 1;
        self.cycles = 0;
        self.received = 0;
    }

    /// Feed a newly arrived packet's raw sequence number through the
    /// state machine, updating `cycles` before any extended value is
    /// computed or returned -- there is no path that reads a stale
    /// extended sequence for the packet that triggered the cycle bump.
    pub fn update_sequence(&mut self, seq: u16) -> SeqOutcome {
        if !self.bootstrapped {
            self.init_seq(seq);
            self.max_seq = seq.wrapping_sub(1);
            self.probation = MIN_SEQUENTIAL;
            self.bootstrapped = true;
        }

        let udelta = seq.wrapping_sub(self.max_seq) as u32;

        if self.probation > 0 {
            if seq == self.max_seq.wrapping_add(1) {
                self.probation -= 1;
                self.max_seq = seq;
                if self.probation == 0 {
                    self.init_seq(seq);
                    self.received += 1;
                    return SeqOutcome::Accepted {
                        extended: self.extended_seq(seq),
                    };
                }
            } else {
                self.probation = MIN_SEQUENTIAL - 1;
                self.max_seq = seq;
            }
            return SeqOutcome::Rejected;
        }

        if udelta < MAX_DROPOUT {
            if seq < self.max_seq {
                self.cycles += RTP_SEQ_MOD as u64;
            }
            self.max_seq = seq;
        } else if udelta <= RTP_SEQ_MOD - MAX_MISORDER {
            if seq as u32 == self.bad_seq {
                self.init_seq(seq);
            } else {
                self.bad_seq = (seq as u32 + 1) & (RTP_SEQ_MOD - 1);
                return SeqOutcome::Rejected;
            }
        }
        // else: duplicate or reordered packet within the misorder window;
        // fall through and accept using the current cycle count.

        self.received += 1;
        SeqOutcome::Accepted {
            extended: self.extended_seq(seq),
        }
    }

    fn extended_seq(&self, seq: u16) -> ExtendedSeq {
        ExtendedSeq(self.cycles + seq as u64)
    }

    /// Track a packet's raw RTP timestamp through an analogous wrap
    /// tracker, returning its extended (wrap-resolved) value. Unlike
    /// sequence numbers, and matching `getInputFrames()`'s inline timeline
    /// tracking exactly, there is no misorder/restart handling here: a
    /// forward delta within [`MAX_DROPOUT_TIMELINE`] bumps the cycle count
    /// on wraparound, anything else leaves the cycle count untouched.
    pub fn update_timestamp(&mut self, ts: u32) -> ExtendedTimestamp {
        if !self.ts_bootstrapped {
            self.max_ts = ts;
            self.time_cycles = 0;
            self.ts_bootstrapped = true;
            return self.extended_timestamp(ts);
        }

        let udelta = ts.wrapping_sub(self.max_ts) as u64;

        if udelta < MAX_DROPOUT_TIMELINE {
            if ts < self.max_ts {
                self.time_cycles += RTP_TIMELINE_MOD;
            }
            self.max_ts = ts;
        }

        self.extended_timestamp(ts)
    }

    fn extended_timestamp(&self, ts: u32) -> ExtendedTimestamp {
        ExtendedTimestamp(self.time_cycles + ts as u64)
    }

    /// Map an extended RTP timestamp to the local wall-clock instant it
    /// corresponds to, anchoring on the first packet observed and scaling
    /// by the stream's clock rate via [`crate::time::ticks_to_duration`].
    /// Also folds the packet's actual arrival time into the running
    /// clock-offset estimate.
    pub fn map_to_local(&mut self, extended_ts: ExtendedTimestamp, clock_rate: u32, arrival: Instant) -> Instant {
        let (epoch_instant, epoch_ts) = *self.epoch.get_or_insert((arrival, extended_ts));

        let delta_ticks = extended_ts.0.saturating_sub(epoch_ts.0);
        let offset = crate::time::ticks_to_duration(delta_ticks, clock_rate);
        let mapped = epoch_instant + offset;

        let transit = arrival.saturating_duration_since(mapped);
        self.note_clock_offset(transit);

        mapped
    }

    fn note_clock_offset(&mut self, observed: std::time::Duration) {
        self.clock_offset_min = Some(match self.clock_offset_min {
            Some(min) if min <= observed => min,
            _ => observed,
        });
    }

    pub fn clock_offset(&self) -> Option<std::time::Duration> {
        self.clock_offset_min
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn base_seq(&self) -> u16 {
        self.base_seq
    }
}

impl Default for RtpSourceState {
    fn default() -> Self {
        Self::new()
    }
}
