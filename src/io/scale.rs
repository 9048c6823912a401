//! Volume scaling of interleaved s16le PCM buffers

/// Map a 7-bit transport volume to a linear scale factor.
///
/// The volume range \[0, 127\] spans -64 dB to 0 dB; muted channels scale
/// to zero.
#[must_use]
pub fn volume_to_scale(volume: u8, muted: bool) -> f64 {
    if muted {
        return 0.0;
    }
    let volume = f64::from(volume.min(127));
    10f64.powf((-64.0 + 64.0 * volume / 127.0) / 20.0)
}

/// Scale an interleaved s16le buffer channel-wise.
///
/// For stereo buffers `ch1_scale` applies to odd-indexed samples and
/// `ch2_scale` to even-indexed ones; mono buffers use `ch1_scale` only.
/// Results saturate at the 16-bit range.
pub fn scale_s16le(buffer: &mut [u8], channels: usize, ch1_scale: f64, ch2_scale: f64) {
    for (i, sample) in buffer.chunks_exact_mut(2).enumerate() {
        let scale = if channels == 1 || i % 2 == 1 {
            ch1_scale
        } else {
            ch2_scale
        };
        let value = i16::from_le_bytes([sample[0], sample[1]]);
        #[allow(clippy::cast_possible_truncation)]
        let scaled = (f64::from(value) * scale).round().clamp(
            f64::from(i16::MIN),
            f64::from(i16::MAX),
        ) as i16;
        sample.copy_from_slice(&scaled.to_le_bytes());
    }
}
