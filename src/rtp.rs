//! RTP framing for A2DP media packets

use bytes::{BufMut, BytesMut};
use thiserror::Error;

/// Dynamic payload type used for A2DP audio
pub const PAYLOAD_TYPE_MEDIA: u8 = 96;

/// RTP decode errors
#[derive(Debug, Error)]
pub enum RtpError {
    /// Packet shorter than the fixed header plus its CSRC list
    #[error("RTP packet too short: need {needed} bytes, have {have}")]
    PacketTooShort {
        /// Bytes required by the header
        needed: usize,
        /// Bytes available
        have: usize,
    },
}

/// RTP header (12 bytes plus optional CSRC entries)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    /// Version (2 bits, always 2 on transmit)
    pub version: u8,
    /// Padding flag
    pub padding: bool,
    /// Extension flag
    pub extension: bool,
    /// CSRC count (4 bits)
    pub csrc_count: u8,
    /// Marker bit; on AAC transmit set on every fragment but the last
    pub marker: bool,
    /// Payload type (7 bits)
    pub payload_type: u8,
    /// Sequence number
    pub sequence: u16,
    /// Media timestamp
    pub timestamp: u32,
    /// Synchronization source; receivers must not rely on its value
    pub ssrc: u32,
}

impl RtpHeader {
    /// Fixed header size, excluding CSRC entries
    pub const SIZE: usize = 12;

    /// Create a media packet header.
    #[must_use]
    pub fn new_media(sequence: u16, timestamp: u32, marker: bool) -> Self {
        Self {
            version: 2,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker,
            payload_type: PAYLOAD_TYPE_MEDIA,
            sequence,
            timestamp,
            ssrc: 0,
        }
    }

    /// Offset of the payload within the packet, past the CSRC list.
    #[must_use]
    pub fn payload_offset(&self) -> usize {
        Self::SIZE + usize::from(self.csrc_count) * 4
    }

    /// Encode the fixed header.
    #[must_use]
    pub fn encode(&self) -> [u8; 12] {
        let mut buf = [0u8; 12];

        // Byte 0: V(2) | P(1) | X(1) | CC(4)
        buf[0] = (self.version << 6)
            | (u8::from(self.padding) << 5)
            | (u8::from(self.extension) << 4)
            | (self.csrc_count & 0x0F);

        // Byte 1: M(1) | PT(7)
        buf[1] = (u8::from(self.marker) << 7) | (self.payload_type & 0x7F);

        buf[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        buf
    }

    /// Decode a header from the start of `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`RtpError::PacketTooShort`] if `buf` cannot hold the fixed
    /// header and the CSRC list it declares.
    pub fn decode(buf: &[u8]) -> Result<Self, RtpError> {
        if buf.len() < Self::SIZE {
            return Err(RtpError::PacketTooShort {
                needed: Self::SIZE,
                have: buf.len(),
            });
        }

        let header = Self {
            version: (buf[0] >> 6) & 0x03,
            padding: (buf[0] >> 5) & 0x01 != 0,
            extension: (buf[0] >> 4) & 0x01 != 0,
            csrc_count: buf[0] & 0x0F,
            marker: (buf[1] >> 7) & 0x01 != 0,
            payload_type: buf[1] & 0x7F,
            sequence: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        };

        if buf.len() < header.payload_offset() {
            return Err(RtpError::PacketTooShort {
                needed: header.payload_offset(),
                have: buf.len(),
            });
        }

        Ok(header)
    }
}

/// SBC media payload header: one byte carrying the frame count in the low
/// nibble, fragmentation bits unused by this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbcPayloadHeader {
    /// Number of SBC frames in this packet (0-15)
    pub frame_count: u8,
}

impl SbcPayloadHeader {
    /// Payload header size
    pub const SIZE: usize = 1;

    /// Encode to the wire byte.
    #[must_use]
    pub fn encode(self) -> u8 {
        self.frame_count & 0x0F
    }

    /// Decode from the wire byte.
    #[must_use]
    pub fn decode(byte: u8) -> Self {
        Self {
            frame_count: byte & 0x0F,
        }
    }
}

/// Transmit-side RTP state: sequence and timestamp with their documented
/// wrapping behavior.
#[derive(Debug)]
pub struct RtpStream {
    sequence: u16,
    timestamp: u32,
}

impl RtpStream {
    /// Create a stream with random initial sequence and timestamp.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sequence: rand::random(),
            timestamp: rand::random(),
        }
    }

    /// Create a stream with fixed initial values.
    #[must_use]
    pub fn with_initial(sequence: u16, timestamp: u32) -> Self {
        Self {
            sequence,
            timestamp,
        }
    }

    /// Current timestamp.
    #[must_use]
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Advance the timestamp by a playback duration reported by the pacer.
    pub fn advance_timestamp(&mut self, duration: u32) {
        self.timestamp = self.timestamp.wrapping_add(duration);
    }

    /// Produce the header for the next transmitted packet, incrementing
    /// the sequence number.
    pub fn next_header(&mut self, marker: bool) -> RtpHeader {
        self.sequence = self.sequence.wrapping_add(1);
        RtpHeader::new_media(self.sequence, self.timestamp, marker)
    }

    /// Assemble a packet from the next header and a payload, with an
    /// optional payload header byte in between.
    pub fn packet(&mut self, marker: bool, payload_header: Option<u8>, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::with_capacity(
            RtpHeader::SIZE + usize::from(payload_header.is_some()) + payload.len(),
        );
        buf.put_slice(&self.next_header(marker).encode());
        if let Some(byte) = payload_header {
            buf.put_u8(byte);
        }
        buf.put_slice(payload);
        buf
    }
}

impl Default for RtpStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a media payload into MTU-bounded fragments, pairing each with
/// its marker bit: set on every fragment except the last, so receivers
/// can concatenate by sequence number until an unmarked packet arrives.
///
/// A payload that fits into one packet yields a single unmarked
/// fragment.
pub fn fragment(payload: &[u8], max_len: usize) -> impl Iterator<Item = (&[u8], bool)> {
    let max_len = max_len.max(1);
    let mut rest = payload;
    let mut done = payload.is_empty();
    std::iter::from_fn(move || {
        if done {
            return None;
        }
        let len = rest.len().min(max_len);
        let (chunk, tail) = rest.split_at(len);
        rest = tail;
        done = rest.is_empty();
        Some((chunk, !done))
    })
}
