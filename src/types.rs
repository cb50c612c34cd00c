//! Core newtypes shared across the pipeline.

use std::fmt;

/// 16-bit on-the-wire RTP sequence number.
pub type RtpSequenceNumber = u16;

/// 32-bit on-the-wire RTP timestamp.
pub type RtpTimestamp = u32;

/// 64-bit sequence number with wrap cycles resolved.
///
/// See [`crate::session::RtpSourceState`] for how `cycles` is folded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExtendedSeq(pub u64);

impl fmt::Display for ExtendedSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 64-bit RTP timestamp with wrap cycles resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExtendedTimestamp(pub u64);

impl fmt::Display for ExtendedTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a camera/stream for configuration and counter reporting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CameraId(pub String);

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CameraId {
    fn from(s: &str) -> Self {
        CameraId(s.to_owned())
    }
}

impl From<String> for CameraId {
    fn from(s: String) -> Self {
        CameraId(s)
    }
}

/// Result of inserting a packet into an in-progress access-unit node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Packet accepted; node may or may not be ready yet.
    Inserted,
    /// Packet's sequence number duplicates one already in the node.
    Duplicate,
    /// Packet carries an unsupported NAL shape; node is unaffected.
    Unsupported,
}
