//! A2DP codec capability elements
//!
//! The negotiated configuration arrives from the signaling layer as an
//! opaque blob; these parsers turn it into codec parameters. The SBC
//! element is 4 bytes, the AAC element 6 bytes, both with one bit set
//! per selectable field.

use crate::error::{EngineError, Result};
use crate::sbc::{Allocation, ChannelMode, Frequency, SbcParams};

/// A2DP codec identifier for SBC
pub const CODEC_SBC: u8 = 0x00;
/// A2DP codec identifier for MPEG-2/4 AAC
pub const CODEC_AAC: u8 = 0x02;

mod sbc_bits {
    pub const FREQ_16000: u8 = 1 << 7;
    pub const FREQ_32000: u8 = 1 << 6;
    pub const FREQ_44100: u8 = 1 << 5;
    pub const FREQ_48000: u8 = 1 << 4;

    pub const MONO: u8 = 1 << 3;
    pub const DUAL_CHANNEL: u8 = 1 << 2;
    pub const STEREO: u8 = 1 << 1;

    pub const BLOCKS_4: u8 = 1 << 7;
    pub const BLOCKS_8: u8 = 1 << 6;
    pub const BLOCKS_12: u8 = 1 << 5;

    pub const SUBBANDS_4: u8 = 1 << 3;

    pub const ALLOCATION_SNR: u8 = 1 << 1;
}

/// Parse an SBC configuration element into stream parameters.
///
/// The bitpool is taken from the negotiated maximum.
///
/// # Errors
///
/// [`EngineError::UnsupportedConfiguration`] if the element is shorter
/// than 4 bytes or carries an invalid bitpool.
pub fn sbc_params(caps: &[u8]) -> Result<SbcParams> {
    use sbc_bits as bits;

    if caps.len() < 4 {
        return Err(EngineError::UnsupportedConfiguration {
            message: format!("SBC element too short: {} bytes", caps.len()),
        });
    }

    let frequency = if caps[0] & bits::FREQ_16000 != 0 {
        Frequency::Hz16000
    } else if caps[0] & bits::FREQ_32000 != 0 {
        Frequency::Hz32000
    } else if caps[0] & bits::FREQ_44100 != 0 {
        Frequency::Hz44100
    } else if caps[0] & bits::FREQ_48000 != 0 {
        Frequency::Hz48000
    } else {
        return Err(EngineError::UnsupportedConfiguration {
            message: "SBC element selects no sampling frequency".into(),
        });
    };

    let mode = if caps[0] & bits::MONO != 0 {
        ChannelMode::Mono
    } else if caps[0] & bits::DUAL_CHANNEL != 0 {
        ChannelMode::DualChannel
    } else if caps[0] & bits::STEREO != 0 {
        ChannelMode::Stereo
    } else {
        ChannelMode::JointStereo
    };

    let blocks = if caps[1] & bits::BLOCKS_4 != 0 {
        4
    } else if caps[1] & bits::BLOCKS_8 != 0 {
        8
    } else if caps[1] & bits::BLOCKS_12 != 0 {
        12
    } else {
        16
    };

    let subbands = if caps[1] & bits::SUBBANDS_4 != 0 { 4 } else { 8 };

    let allocation = if caps[1] & bits::ALLOCATION_SNR != 0 {
        Allocation::Snr
    } else {
        Allocation::Loudness
    };

    let params = SbcParams {
        frequency,
        blocks,
        subbands,
        mode,
        allocation,
        bitpool: caps[3],
        msbc: false,
    };
    params
        .validate()
        .map_err(|e| EngineError::UnsupportedConfiguration {
            message: e.to_string(),
        })?;
    Ok(params)
}

/// AAC audio object type from the configuration element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacObjectType {
    /// MPEG-2 AAC Low Complexity
    Mpeg2Lc,
    /// MPEG-4 AAC Low Complexity
    Mpeg4Lc,
    /// MPEG-4 AAC Long Term Prediction
    Mpeg4Ltp,
    /// MPEG-4 AAC Scalable
    Mpeg4Sca,
}

/// Parsed AAC configuration element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AacConfig {
    /// Audio object type
    pub object_type: AacObjectType,
    /// Sampling frequency in Hz
    pub sampling: u32,
    /// Channel count (1 or 2)
    pub channels: u8,
    /// Peer allows variable bitrate
    pub vbr: bool,
    /// Peak bitrate in bits per second
    pub bitrate: u32,
}

const AAC_FREQUENCIES: [(u16, u32); 12] = [
    (1 << 11, 8_000),
    (1 << 10, 11_025),
    (1 << 9, 12_000),
    (1 << 8, 16_000),
    (1 << 7, 22_050),
    (1 << 6, 24_000),
    (1 << 5, 32_000),
    (1 << 4, 44_100),
    (1 << 3, 48_000),
    (1 << 2, 64_000),
    (1 << 1, 88_200),
    (1 << 0, 96_000),
];

/// Parse an AAC configuration element.
///
/// # Errors
///
/// [`EngineError::UnsupportedConfiguration`] for short elements or ones
/// selecting no frequency or channel count.
pub fn aac_config(caps: &[u8]) -> Result<AacConfig> {
    if caps.len() < 6 {
        return Err(EngineError::UnsupportedConfiguration {
            message: format!("AAC element too short: {} bytes", caps.len()),
        });
    }

    let object_type = if caps[0] & 0x80 != 0 {
        AacObjectType::Mpeg2Lc
    } else if caps[0] & 0x40 != 0 {
        AacObjectType::Mpeg4Lc
    } else if caps[0] & 0x20 != 0 {
        AacObjectType::Mpeg4Ltp
    } else if caps[0] & 0x10 != 0 {
        AacObjectType::Mpeg4Sca
    } else {
        return Err(EngineError::UnsupportedConfiguration {
            message: "AAC element selects no object type".into(),
        });
    };

    let frequency_bits = (u16::from(caps[1]) << 4) | (u16::from(caps[2]) >> 4);
    let sampling = AAC_FREQUENCIES
        .iter()
        .find(|(bit, _)| frequency_bits & bit != 0)
        .map(|&(_, hz)| hz)
        .ok_or_else(|| EngineError::UnsupportedConfiguration {
            message: "AAC element selects no sampling frequency".into(),
        })?;

    let channels = if caps[2] & 0x08 != 0 {
        1
    } else if caps[2] & 0x04 != 0 {
        2
    } else {
        return Err(EngineError::UnsupportedConfiguration {
            message: "AAC element selects no channel count".into(),
        });
    };

    let vbr = caps[3] & 0x80 != 0;
    let bitrate =
        (u32::from(caps[3] & 0x7F) << 16) | (u32::from(caps[4]) << 8) | u32::from(caps[5]);

    Ok(AacConfig {
        object_type,
        sampling,
        channels,
        vbr,
        bitrate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_high_quality_sbc_configuration() {
        // 44.1 kHz joint stereo, 16 blocks, 8 subbands, loudness, bitpool 53
        let caps = [0x21, 0x15, 2, 53];
        let params = sbc_params(&caps).unwrap();
        assert_eq!(params.frequency, Frequency::Hz44100);
        assert_eq!(params.mode, ChannelMode::JointStereo);
        assert_eq!(params.blocks, 16);
        assert_eq!(params.subbands, 8);
        assert_eq!(params.allocation, Allocation::Loudness);
        assert_eq!(params.bitpool, 53);
    }

    #[test]
    fn parses_mono_sbc_configuration() {
        // 48 kHz mono, 8 blocks, 4 subbands, SNR
        let caps = [0x18, 0x4A, 2, 31];
        let params = sbc_params(&caps).unwrap();
        assert_eq!(params.frequency, Frequency::Hz48000);
        assert_eq!(params.mode, ChannelMode::Mono);
        assert_eq!(params.blocks, 8);
        assert_eq!(params.subbands, 4);
        assert_eq!(params.allocation, Allocation::Snr);
    }

    #[test]
    fn rejects_empty_sbc_frequency() {
        let caps = [0x01, 0x15, 2, 53];
        assert!(sbc_params(&caps).is_err());
    }

    #[test]
    fn parses_aac_configuration() {
        // MPEG-4 LC, 44.1 kHz, stereo, VBR, 320 kbit/s
        let caps = [0x40, 0x01, 0x04, 0x84, 0xE2, 0x00];
        let config = aac_config(&caps).unwrap();
        assert_eq!(config.object_type, AacObjectType::Mpeg4Lc);
        assert_eq!(config.sampling, 44_100);
        assert_eq!(config.channels, 2);
        assert!(config.vbr);
        assert_eq!(config.bitrate, (0x04 << 16) | 0xE200);
    }

    #[test]
    fn rejects_short_aac_element() {
        assert!(aac_config(&[0x40, 0x01]).is_err());
    }
}
