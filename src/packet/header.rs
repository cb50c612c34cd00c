//! RTP header decode/validate.
//!
//! Bit layout follows RFC 3550 §5.1, mirroring the original's packed
//! `rtp_head_t` plus `RTP_HEAD_*` accessor macros: the first 32-bit word
//! packs version/padding/extension/CSRC-count/marker/payload-type/sequence,
//! followed by the 32-bit timestamp, 32-bit SSRC, and `cc` 32-bit CSRC
//! identifiers.

pub const RTP_VERSION: u8 = 2;
pub const FIXED_HEADER_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    /// Offset (from the start of the packet) where the payload begins,
    /// i.e. past the fixed header, CSRC list and extension header if any.
    pub payload_offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("packet too short for fixed RTP header")]
    TooShort,
    #[error("declared CSRC list exceeds packet length")]
    CsrcOverflow,
    #[error("declared extension header exceeds packet length")]
    ExtensionOverflow,
    #[error("RTP version {0} is not supported")]
    BadVersion(u8),
    #[error("declared padding length exceeds packet length")]
    PaddingOverflow,
}

/// Decode and validate an RTP header in place, converting all multi-byte
/// fields from network to host byte order.
///
/// `buf` is mutated: the first word and the timestamp/SSRC/CSRC/extension
/// words are byte-swapped in place, mirroring
/// `CRtpReceiver::validateFrame()`'s network-to-host conversion. Returns the
/// decoded header and the real payload length (padding trailer excluded).
pub fn decode_and_validate(buf: &mut [u8]) -> Result<(RtpHeader, usize), HeaderError> {
    if buf.len() < FIXED_HEADER_LEN {
        return Err(HeaderError::TooShort);
    }

    let word0 = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    buf[0..4].copy_from_slice(&word0.to_ne_bytes());

    let version = ((word0 >> 30) & 0x3) as u8;
    let padding = ((word0 >> 29) & 0x1) != 0;
    let extension = ((word0 >> 28) & 0x1) != 0;
    let csrc_count = ((word0 >> 24) & 0xf) as u8;
    let marker = ((word0 >> 23) & 0x1) != 0;
    let payload_type = ((word0 >> 16) & 0x7f) as u8;
    let sequence = (word0 & 0xffff) as u16;

    let timestamp_be = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
    buf[4..8].copy_from_slice(&timestamp_be.to_ne_bytes());
    let timestamp = timestamp_be;

    let ssrc_be = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
    buf[8..12].copy_from_slice(&ssrc_be.to_ne_bytes());
    let ssrc = ssrc_be;

    let mut header_len = FIXED_HEADER_LEN;

    if csrc_count > 0 {
        header_len += csrc_count as usize * 4;
        if buf.len() < header_len {
            return Err(HeaderError::CsrcOverflow);
        }
        for i in 0..csrc_count as usize {
            let off = FIXED_HEADER_LEN + i * 4;
            let word = u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
            buf[off..off + 4].copy_from_slice(&word.to_ne_bytes());
        }
    }

    if extension {
        if buf.len() < header_len + 4 {
            return Err(HeaderError::ExtensionOverflow);
        }
        let ext_word = u32::from_be_bytes([
            buf[header_len],
            buf[header_len + 1],
            buf[header_len + 2],
            buf[header_len + 3],
        ]);
        buf[header_len..header_len + 4].copy_from_slice(&ext_word.to_ne_bytes());
        let ext_words = (ext_word & 0xffff) as usize;
        header_len += (ext_words + 1) * 4;
        if buf.len() < header_len {
            return Err(HeaderError::ExtensionOverflow);
        }
        for i in 0..ext_words {
            let off = FIXED_HEADER_LEN + 4 + i * 4;
            let word = u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
            buf[off..off + 4].copy_from_slice(&word.to_ne_bytes());
        }
    }

    let mut real_length = buf.len();
    if padding {
        let pad_count = buf[real_length - 1] as usize;
        if real_length < header_len + pad_count {
            return Err(HeaderError::PaddingOverflow);
        }
        real_length -= pad_count;
    }

    if version != RTP_VERSION {
        return Err(HeaderError::BadVersion(version));
    }

    Ok((
        RtpHeader {
            version,
            padding,
            extension,
            csrc_count,
            marker,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            payload_offset: header_len,
        },
        real_length,
    ))
}
