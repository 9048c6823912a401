//! Native SBC and mSBC codec
//!
//! Implements the low-complexity subband codec used by A2DP (4 or 8
//! subbands, loudness or SNR bit allocation, all four channel modes) and
//! its fixed wideband-speech parameterization mSBC (16 kHz mono,
//! 15 blocks, 8 subbands, bitpool 26).
//!
//! PCM crosses the codec boundary as interleaved s16le bytes, the same
//! representation the transport pipes carry.

mod allocation;
mod bitstream;
mod decoder;
mod encoder;
mod filterbank;
mod tables;

pub use decoder::SbcDecoder;
pub use encoder::SbcEncoder;

use thiserror::Error;

/// SBC syncword for A2DP frames
const SYNCWORD: u8 = 0x9C;
/// SBC syncword for mSBC frames
const SYNCWORD_MSBC: u8 = 0xAD;

/// Codec errors
#[derive(Debug, Error)]
pub enum SbcError {
    /// Input buffer cannot hold a whole frame or PCM block
    #[error("input too short: need {needed} bytes, have {have}")]
    InputTooShort {
        /// Bytes required
        needed: usize,
        /// Bytes available
        have: usize,
    },

    /// Output buffer cannot hold the produced data
    #[error("output too short: need {needed} bytes, have {have}")]
    OutputTooShort {
        /// Bytes required
        needed: usize,
        /// Bytes available
        have: usize,
    },

    /// Frame does not start with the expected syncword
    #[error("bad syncword: 0x{0:02X}")]
    BadSync(u8),

    /// Frame header CRC mismatch
    #[error("frame CRC mismatch")]
    BadCrc,

    /// Frame header disagrees with the negotiated stream parameters
    #[error("frame header does not match the stream configuration")]
    HeaderMismatch,

    /// Parameter combination outside the supported ranges
    #[error("invalid codec parameters: {0}")]
    InvalidParameters(&'static str),
}

/// Sampling frequency, in header encoding order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Frequency {
    /// 16 kHz
    Hz16000 = 0,
    /// 32 kHz
    Hz32000 = 1,
    /// 44.1 kHz
    Hz44100 = 2,
    /// 48 kHz
    Hz48000 = 3,
}

impl Frequency {
    /// The frequency in Hz.
    #[must_use]
    pub fn hz(self) -> u32 {
        match self {
            Self::Hz16000 => 16_000,
            Self::Hz32000 => 32_000,
            Self::Hz44100 => 44_100,
            Self::Hz48000 => 48_000,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Self::Hz16000,
            1 => Self::Hz32000,
            2 => Self::Hz44100,
            _ => Self::Hz48000,
        }
    }
}

/// Channel mode, in header encoding order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelMode {
    /// One channel
    Mono = 0,
    /// Two independently coded channels
    DualChannel = 1,
    /// Two channels, shared bitpool
    Stereo = 2,
    /// Two channels, shared bitpool, per-subband mid/side coding
    JointStereo = 3,
}

impl ChannelMode {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Self::Mono,
            1 => Self::DualChannel,
            2 => Self::Stereo,
            _ => Self::JointStereo,
        }
    }
}

/// Bit allocation method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Allocation {
    /// Psychoacoustic loudness offsets
    Loudness = 0,
    /// Signal-to-noise ratio
    Snr = 1,
}

/// Stream parameters shared by the encoder and decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbcParams {
    /// Sampling frequency
    pub frequency: Frequency,
    /// Blocks per frame: 4, 8, 12 or 16 (mSBC: 15)
    pub blocks: u8,
    /// Subbands per channel: 4 or 8
    pub subbands: u8,
    /// Channel mode
    pub mode: ChannelMode,
    /// Bit allocation method
    pub allocation: Allocation,
    /// Bitpool value
    pub bitpool: u8,
    /// Use the mSBC frame layout (0xAD syncword, reserved header fields)
    pub msbc: bool,
}

impl SbcParams {
    /// The fixed mSBC parameter set.
    #[must_use]
    pub fn msbc() -> Self {
        Self {
            frequency: Frequency::Hz16000,
            blocks: 15,
            subbands: 8,
            mode: ChannelMode::Mono,
            allocation: Allocation::Loudness,
            bitpool: 26,
            msbc: true,
        }
    }

    /// Validate the parameter combination.
    ///
    /// # Errors
    ///
    /// [`SbcError::InvalidParameters`] for values outside the coded ranges.
    pub fn validate(&self) -> Result<(), SbcError> {
        if self.msbc {
            return if *self == Self::msbc() {
                Ok(())
            } else {
                Err(SbcError::InvalidParameters("mSBC parameters are fixed"))
            };
        }
        if !matches!(self.blocks, 4 | 8 | 12 | 16) {
            return Err(SbcError::InvalidParameters("blocks must be 4, 8, 12 or 16"));
        }
        if !matches!(self.subbands, 4 | 8) {
            return Err(SbcError::InvalidParameters("subbands must be 4 or 8"));
        }
        if self.bitpool < 2 || self.bitpool > 250 {
            return Err(SbcError::InvalidParameters("bitpool out of range"));
        }
        Ok(())
    }

    /// Number of coded channels.
    #[must_use]
    pub fn channels(&self) -> usize {
        match self.mode {
            ChannelMode::Mono => 1,
            _ => 2,
        }
    }

    /// PCM bytes consumed or produced per frame.
    #[must_use]
    pub fn codesize(&self) -> usize {
        usize::from(self.blocks) * usize::from(self.subbands) * self.channels() * 2
    }

    /// Encoded frame length in bytes.
    #[must_use]
    pub fn frame_length(&self) -> usize {
        let blocks = usize::from(self.blocks);
        let subbands = usize::from(self.subbands);
        let channels = self.channels();
        let bitpool = usize::from(self.bitpool);

        let data_bits = match self.mode {
            ChannelMode::Mono | ChannelMode::DualChannel => blocks * channels * bitpool,
            ChannelMode::Stereo => blocks * bitpool,
            ChannelMode::JointStereo => subbands + blocks * bitpool,
        };

        4 + (4 * subbands * channels) / 8 + (data_bits + 7) / 8
    }

    fn header_byte(&self) -> u8 {
        let blocks_bits = match self.blocks {
            4 => 0u8,
            8 => 1,
            12 => 2,
            _ => 3,
        };
        let subbands_bit = u8::from(self.subbands == 8);
        ((self.frequency as u8) << 6)
            | (blocks_bits << 4)
            | ((self.mode as u8) << 2)
            | ((self.allocation as u8) << 1)
            | subbands_bit
    }

    fn matches_header(&self, byte: u8, bitpool: u8) -> bool {
        byte == self.header_byte() && bitpool == self.bitpool
    }

    fn syncword(&self) -> u8 {
        if self.msbc {
            SYNCWORD_MSBC
        } else {
            SYNCWORD
        }
    }

    fn frequency_index(&self) -> usize {
        self.frequency as usize
    }
}
