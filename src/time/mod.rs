//! Clock-rate conversion between RTP ticks and wall-clock durations.
//!
//! Grounded on the teacher's `rtp_timestamp_to_duration`, generalized from a
//! 32-bit wire timestamp to the 64-bit extended tick deltas
//! [`crate::session::RtpSourceState::map_to_local`] works with, since those
//! deltas can exceed `u32::MAX` over a long-running stream.

use std::time::Duration;

/// Convert a tick count at `clock_rate` Hz into a [`Duration`].
pub fn ticks_to_duration(ticks: u64, clock_rate: u32) -> Duration {
    if clock_rate == 0 {
        return Duration::from_secs(0);
    }

    let clock_rate = clock_rate as u64;
    let seconds = ticks / clock_rate;
    let remainder = ticks % clock_rate;
    let nanos = (remainder * 1_000_000_000) / clock_rate;

    Duration::new(seconds, nanos as u32)
}

/// Clock rates this pipeline's payload formats run at.
pub mod clock_rates {
    /// G.711, G.726, G.729 (8kHz)
    pub const AUDIO_8KHZ: u32 = 8000;

    /// G.722 (16kHz)
    pub const AUDIO_16KHZ: u32 = 16000;

    /// Opus, AAC (48kHz)
    pub const AUDIO_48KHZ: u32 = 48000;

    /// H.264 and most other RTP video payloads (90kHz)
    pub const VIDEO_90KHZ: u32 = 90000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_whole_seconds() {
        assert_eq!(ticks_to_duration(48000, 48000), Duration::from_secs(1));
        assert_eq!(ticks_to_duration(90000, 90000), Duration::from_secs(1));
    }

    #[test]
    fn converts_sub_second_remainder() {
        // 1000 samples at 8kHz = 125ms
        let d = ticks_to_duration(1000, 8000);
        assert_eq!(d.as_millis(), 125);
    }

    #[test]
    fn handles_tick_counts_beyond_u32_range() {
        // A delta that would overflow a 32-bit RTP timestamp but is a
        // perfectly ordinary extended-timestamp delta over a long session.
        let ticks = (u32::MAX as u64) * 4;
        let d = ticks_to_duration(ticks, clock_rates::VIDEO_90KHZ);
        assert_eq!(d.as_secs(), ticks / 90_000);
    }

    #[test]
    fn zero_clock_rate_yields_zero_duration() {
        assert_eq!(ticks_to_duration(1000, 0), Duration::from_secs(0));
    }
}
