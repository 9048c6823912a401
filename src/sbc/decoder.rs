//! SBC frame decoder

use super::allocation::calculate_bits;
use super::bitstream::{crc8, BitReader, BitWriter};
use super::filterbank::Synthesizer;
use super::{ChannelMode, SbcError, SbcParams};

fn dequantize(q: u32, sf: u8, bits: u8) -> f64 {
    let levels = f64::from((1u32 << bits) - 1);
    let scale = f64::from(1u32 << (u32::from(sf) + 1));
    scale * ((f64::from(2 * q + 1)) / levels - 1.0)
}

/// Streaming SBC decoder.
///
/// Consumes exactly one frame per call and produces one PCM block of
/// interleaved s16le samples.
pub struct SbcDecoder {
    params: SbcParams,
    synthesizer: Synthesizer,
    /// Subband samples of the current frame, `[block][channel][subband]`
    samples: Vec<f64>,
}

impl SbcDecoder {
    /// Create a decoder for the given stream parameters.
    ///
    /// # Errors
    ///
    /// [`SbcError::InvalidParameters`] for unsupported combinations.
    pub fn new(params: SbcParams) -> Result<Self, SbcError> {
        params.validate()?;
        Ok(Self::unchecked(params))
    }

    /// Create an mSBC decoder.
    #[must_use]
    pub fn msbc() -> Self {
        Self::unchecked(SbcParams::msbc())
    }

    fn unchecked(params: SbcParams) -> Self {
        let capacity = usize::from(params.blocks) * params.channels() * usize::from(params.subbands);
        Self {
            params,
            synthesizer: Synthesizer::new(usize::from(params.subbands)),
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

    /// PCM bytes produced per frame.
    #[must_use]
    pub fn codesize(&self) -> usize {
        self.params.codesize()
    }

    fn index(&self, block: usize, channel: usize, subband: usize) -> usize {
        (block * self.params.channels() + channel) * usize::from(self.params.subbands) + subband
    }

    /// Decode one frame from the start of `input`.
    ///
    /// Returns `(consumed_frame_bytes, pcm_bytes_written)`.
    ///
    /// # Errors
    ///
    /// [`SbcError::BadSync`] / [`SbcError::HeaderMismatch`] /
    /// [`SbcError::BadCrc`] for damaged frames, the buffer errors for
    /// short inputs or outputs.
    pub fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<(usize, usize), SbcError> {
        let frame_length = self.frame_length();
        let codesize = self.codesize();
        if input.len() < frame_length {
            return Err(SbcError::InputTooShort {
                needed: frame_length,
                have: input.len(),
            });
        }
        if output.len() < codesize {
            return Err(SbcError::OutputTooShort {
                needed: codesize,
                have: output.len(),
            });
        }

        if input[0] != self.params.syncword() {
            return Err(SbcError::BadSync(input[0]));
        }
        if !self.params.msbc && !self.params.matches_header(input[1], input[2]) {
            return Err(SbcError::HeaderMismatch);
        }

        let blocks = usize::from(self.params.blocks);
        let subbands = usize::from(self.params.subbands);
        let channels = self.params.channels();

        let mut reader = BitReader::new(&input[4..frame_length]);

        let mut join = [false; 8];
        if self.params.mode == ChannelMode::JointStereo {
            for flag in join.iter_mut().take(subbands) {
                *flag = reader.read_bits(1)? != 0;
            }
        }

        let mut scale_factors = [[0u8; 8]; 2];
        for ch in 0..channels {
            for sb in 0..subbands {
                #[allow(clippy::cast_possible_truncation)]
                {
                    scale_factors[ch][sb] = reader.read_bits(4)? as u8;
                }
            }
        }

        // verify the header CRC before trusting the payload
        let mut crc_data = [0u8; 16];
        crc_data[0] = input[1];
        crc_data[1] = input[2];
        let mut crc_bits = 16;
        {
            let mut crc_writer = BitWriter::new(&mut crc_data[2..]);
            if self.params.mode == ChannelMode::JointStereo {
                for &flag in join.iter().take(subbands) {
                    crc_writer.write_bits(u32::from(flag), 1)?;
                }
            }
            for ch in 0..channels {
                for sb in 0..subbands {
                    crc_writer.write_bits(u32::from(scale_factors[ch][sb]), 4)?;
                }
            }
            crc_bits += crc_writer.position();
        }
        if crc8(&crc_data, crc_bits) != input[3] {
            return Err(SbcError::BadCrc);
        }

        let bits = calculate_bits(&self.params, &scale_factors);

        for blk in 0..blocks {
            for ch in 0..channels {
                for sb in 0..subbands {
                    let width = bits[ch][sb];
                    let at = self.index(blk, ch, sb);
                    self.samples[at] = if width > 0 {
                        dequantize(reader.read_bits(u32::from(width))?, scale_factors[ch][sb], width)
                    } else {
                        0.0
                    };
                }
            }
        }

        // undo per-subband mid/side coding
        if self.params.mode == ChannelMode::JointStereo {
            for sb in 0..subbands {
                if !join[sb] {
                    continue;
                }
                for blk in 0..blocks {
                    let mid = self.samples[self.index(blk, 0, sb)];
                    let side = self.samples[self.index(blk, 1, sb)];
                    let idx0 = self.index(blk, 0, sb);
                    let idx1 = self.index(blk, 1, sb);
                    self.samples[idx0] = mid + side;
                    self.samples[idx1] = mid - side;
                }
            }
        }

        // subband synthesis, block by block
        let mut block_sb = [0.0f64; 8];
        let mut block_pcm = [0.0f64; 8];
        for blk in 0..blocks {
            for ch in 0..channels {
                for sb in 0..subbands {
                    block_sb[sb] = self.samples[self.index(blk, ch, sb)];
                }
                self.synthesizer
                    .synthesize(ch, &block_sb[..subbands], &mut block_pcm[..subbands]);
                for (s, &sample) in block_pcm.iter().take(subbands).enumerate() {
                    #[allow(clippy::cast_possible_truncation)]
                    let value = sample
                        .round()
                        .clamp(f64::from(i16::MIN), f64::from(i16::MAX))
                        as i16;
                    let at = ((blk * subbands + s) * channels + ch) * 2;
                    output[at..at + 2].copy_from_slice(&value.to_le_bytes());
                }
            }
        }

        Ok((frame_length, codesize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sbc::{Allocation, Frequency, SbcEncoder};

    fn sine_pcm(len: usize, channels: usize, freq: f64, rate: f64) -> Vec<u8> {
        let mut pcm = Vec::with_capacity(len * channels * 2);
        for n in 0..len {
            for ch in 0..channels {
                let phase = 2.0 * std::f64::consts::PI * freq * (ch + 1) as f64 * n as f64 / rate;
                #[allow(clippy::cast_possible_truncation)]
                let sample = (phase.sin() * 12_000.0) as i16;
                pcm.extend_from_slice(&sample.to_le_bytes());
            }
        }
        pcm
    }

    /// Relative L2 error between the codec output and the source signal,
    /// minimized over the filterbank delay and output polarity.
    fn round_trip_error(params: SbcParams, pcm: &[u8]) -> f64 {
        let mut encoder = SbcEncoder::new(params).unwrap();
        let mut decoder = SbcDecoder::new(params).unwrap();

        let mut decoded = Vec::with_capacity(pcm.len());
        let mut frame = vec![0u8; params.frame_length()];
        let mut block = vec![0u8; params.codesize()];
        for chunk in pcm.chunks_exact(params.codesize()) {
            encoder.encode(chunk, &mut frame).unwrap();
            let (consumed, written) = decoder.decode(&frame, &mut block).unwrap();
            assert_eq!(consumed, params.frame_length());
            assert_eq!(written, params.codesize());
            decoded.extend_from_slice(&block);
        }

        let to_samples = |bytes: &[u8]| -> Vec<f64> {
            bytes
                .chunks_exact(2)
                .map(|c| f64::from(i16::from_le_bytes([c[0], c[1]])))
                .collect()
        };
        let input = to_samples(pcm);
        let output = to_samples(&decoded);

        let channels = params.channels();
        let nominal = (10 * usize::from(params.subbands) - usize::from(params.subbands) + 1)
            * channels;
        let skip = 8 * usize::from(params.subbands) * channels;
        let span = input.len() - nominal - skip;

        let mut best = f64::INFINITY;
        let window = 2 * usize::from(params.subbands) * channels;
        for delay in (nominal - window..=nominal + window).step_by(channels) {
            for sign in [1.0, -1.0] {
                let mut err = 0.0;
                let mut pow = 0.0;
                for n in skip..span {
                    let diff = sign * output[n + delay] - input[n];
                    err += diff * diff;
                    pow += input[n] * input[n];
                }
                best = best.min((err / pow).sqrt());
            }
        }
        best
    }

    #[test]
    fn msbc_round_trip_is_transparent_enough() {
        let params = SbcParams::msbc();
        let pcm = sine_pcm(240 / 2 * 60, 1, 997.0, 16_000.0);
        let err = round_trip_error(params, &pcm);
        assert!(err < 0.1, "relative error {err}");
    }

    #[test]
    fn a2dp_stereo_round_trip_is_transparent_enough() {
        let params = SbcParams {
            frequency: Frequency::Hz44100,
            blocks: 16,
            subbands: 8,
            mode: ChannelMode::JointStereo,
            allocation: Allocation::Loudness,
            bitpool: 53,
            msbc: false,
        };
        let pcm = sine_pcm(128 * 40, 2, 1_000.0, 44_100.0);
        let err = round_trip_error(params, &pcm);
        assert!(err < 0.1, "relative error {err}");
    }

    #[test]
    fn a2dp_mono_snr_round_trip() {
        let params = SbcParams {
            frequency: Frequency::Hz48000,
            blocks: 16,
            subbands: 4,
            mode: ChannelMode::Mono,
            allocation: Allocation::Snr,
            bitpool: 31,
            msbc: false,
        };
        let pcm = sine_pcm(64 * 80, 1, 1_000.0, 48_000.0);
        let err = round_trip_error(params, &pcm);
        assert!(err < 0.1, "relative error {err}");
    }

    #[test]
    fn rejects_bad_syncword() {
        let mut decoder = SbcDecoder::msbc();
        let mut frame = [0u8; 57];
        frame[0] = 0x9C;
        let mut pcm = [0u8; 240];
        assert!(matches!(
            decoder.decode(&frame, &mut pcm),
            Err(SbcError::BadSync(0x9C))
        ));
    }

    #[test]
    fn rejects_corrupted_scale_factors() {
        let mut encoder = SbcEncoder::msbc();
        let mut decoder = SbcDecoder::msbc();
        let pcm = sine_pcm(120, 1, 440.0, 16_000.0);
        let mut frame = vec![0u8; 57];
        encoder.encode(&pcm, &mut frame).unwrap();

        frame[5] ^= 0xFF; // scale factor area
        let mut out = [0u8; 240];
        assert!(matches!(
            decoder.decode(&frame, &mut out),
            Err(SbcError::BadCrc)
        ));
    }

    #[test]
    fn rejects_mismatched_header() {
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
        let mut decoder = SbcDecoder::new(params).unwrap();

        let pcm = vec![0u8; params.codesize()];
        let mut frame = vec![0u8; params.frame_length()];
        encoder.encode(&pcm, &mut frame).unwrap();

        frame[2] = 35; // different bitpool than negotiated
        let mut out = vec![0u8; params.codesize()];
        assert!(matches!(
            decoder.decode(&frame, &mut out),
            Err(SbcError::HeaderMismatch)
        ));
    }
}
