//! SBC frame encoder

use super::allocation::calculate_bits;
use super::bitstream::{crc8, BitWriter};
use super::filterbank::Analyzer;
use super::{ChannelMode, SbcError, SbcParams};

/// Smallest scale factor such that every sample fits below
/// `2^(scale_factor + 1)`.
pub(super) fn scale_factor(max: f64) -> u8 {
    let mut sf = 0u8;
    while sf < 15 && max >= f64::from(1u32 << (sf + 1)) {
        sf += 1;
    }
    sf
}

fn quantize(sample: f64, sf: u8, bits: u8) -> u32 {
    let levels = f64::from((1u32 << bits) - 1);
    let scale = f64::from(1u32 << (u32::from(sf) + 1));
    let q = ((sample / scale + 1.0) * levels / 2.0).floor();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        q.clamp(0.0, levels) as u32
    }
}

/// Streaming SBC encoder.
///
/// Consumes exactly one PCM block (`codesize()` bytes of interleaved
/// s16le samples) per call and produces one frame.
pub struct SbcEncoder {
    params: SbcParams,
    analyzer: Analyzer,
    /// Subband samples of the current frame, `[block][channel][subband]`
    samples: Vec<f64>,
}

impl SbcEncoder {
    /// Create an encoder for the given stream parameters.
    ///
    /// # Errors
    ///
    /// [`SbcError::InvalidParameters`] for unsupported combinations.
    pub fn new(params: SbcParams) -> Result<Self, SbcError> {
        params.validate()?;
        Ok(Self::unchecked(params))
    }

    /// Create an mSBC encoder.
    #[must_use]
    pub fn msbc() -> Self {
        Self::unchecked(SbcParams::msbc())
    }

    fn unchecked(params: SbcParams) -> Self {
        let capacity = usize::from(params.blocks) * params.channels() * usize::from(params.subbands);
        Self {
            params,
            analyzer: Analyzer::new(usize::from(params.subbands)),
            samples: vec![0.0; capacity],
        }
    }

    /// Stream parameters.
    #[must_use]
    pub fn params(&self) -> &SbcParams {
        &self.params
    }

    /// Encoded frame length in bytes.
    #[must_use]
    pub fn frame_length(&self) -> usize {
        self.params.frame_length()
    }

    /// PCM bytes consumed per frame.
    #[must_use]
    pub fn codesize(&self) -> usize {
        self.params.codesize()
    }

    fn index(&self, block: usize, channel: usize, subband: usize) -> usize {
        (block * self.params.channels() + channel) * usize::from(self.params.subbands) + subband
    }

    /// Encode one frame.
    ///
    /// Returns `(consumed_pcm_bytes, frame_bytes)`.
    ///
    /// # Errors
    ///
    /// [`SbcError::InputTooShort`] if `input` holds less than one PCM
    /// block, [`SbcError::OutputTooShort`] if `output` cannot hold the
    /// frame.
    pub fn encode(&mut self, input: &[u8], output: &mut [u8]) -> Result<(usize, usize), SbcError> {
        let codesize = self.codesize();
        let frame_length = self.frame_length();
        if input.len() < codesize {
            return Err(SbcError::InputTooShort {
                needed: codesize,
                have: input.len(),
            });
        }
        if output.len() < frame_length {
            return Err(SbcError::OutputTooShort {
                needed: frame_length,
                have: output.len(),
            });
        }

        let blocks = usize::from(self.params.blocks);
        let subbands = usize::from(self.params.subbands);
        let channels = self.params.channels();

        // subband analysis, block by block
        let mut block_pcm = [0.0f64; 8];
        let mut block_sb = [0.0f64; 8];
        for blk in 0..blocks {
            for ch in 0..channels {
                for s in 0..subbands {
                    let at = ((blk * subbands + s) * channels + ch) * 2;
                    block_pcm[s] = f64::from(i16::from_le_bytes([input[at], input[at + 1]]));
                }
                self.analyzer
                    .analyze(ch, &block_pcm[..subbands], &mut block_sb[..subbands]);
                for s in 0..subbands {
                    let at = self.index(blk, ch, s);
                    self.samples[at] = block_sb[s];
                }
            }
        }

        // per-subband mid/side decision
        let mut join = [false; 8];
        if self.params.mode == ChannelMode::JointStereo {
            for sb in 0..subbands - 1 {
                let mut max = [0.0f64; 4]; // left, right, mid, side
                for blk in 0..blocks {
                    let left = self.samples[self.index(blk, 0, sb)];
                    let right = self.samples[self.index(blk, 1, sb)];
                    max[0] = max[0].max(left.abs());
                    max[1] = max[1].max(right.abs());
                    max[2] = max[2].max(((left + right) / 2.0).abs());
                    max[3] = max[3].max(((left - right) / 2.0).abs());
                }
                let direct = u32::from(scale_factor(max[0])) + u32::from(scale_factor(max[1]));
                let joint = u32::from(scale_factor(max[2])) + u32::from(scale_factor(max[3]));
                if joint < direct {
                    join[sb] = true;
                    for blk in 0..blocks {
                        let left = self.samples[self.index(blk, 0, sb)];
                        let right = self.samples[self.index(blk, 1, sb)];
                        let idx0 = self.index(blk, 0, sb);
                        let idx1 = self.index(blk, 1, sb);
                        self.samples[idx0] = (left + right) / 2.0;
                        self.samples[idx1] = (left - right) / 2.0;
                    }
                }
            }
        }

        // scale factors and bit allocation
        let mut scale_factors = [[0u8; 8]; 2];
        for ch in 0..channels {
            for sb in 0..subbands {
                let mut max = 0.0f64;
                for blk in 0..blocks {
                    max = max.max(self.samples[self.index(blk, ch, sb)].abs());
                }
                scale_factors[ch][sb] = scale_factor(max);
            }
        }
        let bits = calculate_bits(&self.params, &scale_factors);

        // frame header
        output[..frame_length].fill(0);
        output[0] = self.params.syncword();
        if !self.params.msbc {
            output[1] = self.params.header_byte();
            output[2] = self.params.bitpool;
        }

        // join flags, scale factors and audio samples
        let mut writer = BitWriter::new(&mut output[4..frame_length]);
        if self.params.mode == ChannelMode::JointStereo {
            for sb in 0..subbands {
                writer.write_bits(u32::from(join[sb]), 1)?;
            }
        }
        for ch in 0..channels {
            for sb in 0..subbands {
                writer.write_bits(u32::from(scale_factors[ch][sb]), 4)?;
            }
        }
        for blk in 0..blocks {
            for ch in 0..channels {
                for sb in 0..subbands {
                    let width = bits[ch][sb];
                    if width > 0 {
                        let q = quantize(
                            self.samples[self.index(blk, ch, sb)],
                            scale_factors[ch][sb],
                            width,
                        );
                        writer.write_bits(q, u32::from(width))?;
                    }
                }
            }
        }
        writer.byte_align()?;

        // CRC over the two header bytes, join flags and scale factors
        let mut crc_data = [0u8; 16];
        crc_data[0] = output[1];
        crc_data[1] = output[2];
        let mut crc_bits = 16;
        {
            let mut crc_writer = BitWriter::new(&mut crc_data[2..]);
            if self.params.mode == ChannelMode::JointStereo {
                for sb in 0..subbands {
                    crc_writer.write_bits(u32::from(join[sb]), 1)?;
                }
            }
            for ch in 0..channels {
                for sb in 0..subbands {
                    crc_writer.write_bits(u32::from(scale_factors[ch][sb]), 4)?;
                }
            }
            crc_bits += crc_writer.position();
        }
        output[3] = crc8(&crc_data, crc_bits);

        Ok((codesize, frame_length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sbc::{Allocation, Frequency};

    #[test]
    fn msbc_frame_shape() {
        let mut encoder = SbcEncoder::msbc();
        let pcm = vec![0u8; encoder.codesize()];
        let mut frame = vec![0u8; encoder.frame_length()];

        let (consumed, written) = encoder.encode(&pcm, &mut frame).unwrap();
        assert_eq!(consumed, 240);
        assert_eq!(written, 57);
        assert_eq!(frame[0], 0xAD);
        assert_eq!(frame[1], 0x00);
        assert_eq!(frame[2], 0x00);
    }

    #[test]
    fn a2dp_frame_starts_with_syncword() {
        let params = SbcParams {
            frequency: Frequency::Hz44100,
            blocks: 16,
            subbands: 8,
            mode: ChannelMode::JointStereo,
            allocation: Allocation::Loudness,
            bitpool: 53,
            msbc: false,
        };
        let mut encoder = SbcEncoder::new(params).unwrap();
        let pcm = vec![0u8; encoder.codesize()];
        let mut frame = vec![0u8; encoder.frame_length()];

        let (_, written) = encoder.encode(&pcm, &mut frame).unwrap();
        assert_eq!(written, 119);
        assert_eq!(frame[0], 0x9C);
        assert_eq!(frame[2], 53);
    }

    #[test]
    fn rejects_short_buffers() {
        let mut encoder = SbcEncoder::msbc();
        let pcm = vec![0u8; encoder.codesize()];
        let mut small = [0u8; 16];
        assert!(matches!(
            encoder.encode(&pcm, &mut small),
            Err(SbcError::OutputTooShort { .. })
        ));
        let mut frame = vec![0u8; 57];
        assert!(matches!(
            encoder.encode(&pcm[..100], &mut frame),
            Err(SbcError::InputTooShort { .. })
        ));
    }
}
