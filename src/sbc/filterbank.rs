//! Polyphase analysis and synthesis filterbanks
//!
//! The 4- and 8-subband filterbanks follow the cosine-modulated
//! structure of the codec: a 10-block prototype window over 40 or 80
//! samples combined with an M x 2M modulation matrix.

use super::tables::{PROTO_4_40, PROTO_8_80};

/// Per-channel analysis state for up to 8 subbands.
pub struct Analyzer {
    subbands: usize,
    /// Sample history, newest sample first
    x: [[f64; 80]; 2],
    /// Modulation matrix: `matrix[sb][i] = cos((2 sb + 1)(i - M/2) pi / 2M)`
    matrix: Vec<[f64; 16]>,
}

impl Analyzer {
    /// Create an analyzer for 4 or 8 subbands.
    pub fn new(subbands: usize) -> Self {
        let m = subbands as f64;
        let matrix = (0..subbands)
            .map(|sb| {
                let mut row = [0.0; 16];
                for (i, value) in row.iter_mut().enumerate().take(2 * subbands) {
                    let angle = (2.0 * sb as f64 + 1.0) * (i as f64 - m / 2.0)
                        * std::f64::consts::PI
                        / (2.0 * m);
                    *value = angle.cos();
                }
                row
            })
            .collect();
        Self {
            subbands,
            x: [[0.0; 80]; 2],
            matrix,
        }
    }

    fn window(&self) -> &'static [f64] {
        if self.subbands == 8 {
            &PROTO_8_80
        } else {
            &PROTO_4_40
        }
    }

    /// Feed one block of `subbands` samples for `channel` and produce the
    /// subband samples.
    pub fn analyze(&mut self, channel: usize, input: &[f64], output: &mut [f64]) {
        let m = self.subbands;
        let taps = 10 * m;
        let window = self.window();
        let x = &mut self.x[channel];

        // shift history and insert the new samples, newest first
        x.copy_within(0..taps - m, m);
        for (i, slot) in x.iter_mut().take(m).enumerate() {
            *slot = input[m - 1 - i];
        }

        // windowing and partial sums over the 5 polyphase segments
        let mut y = [0.0f64; 16];
        for (i, slot) in y.iter_mut().enumerate().take(2 * m) {
            let mut acc = 0.0;
            for j in 0..5 {
                acc += window[i + 2 * m * j] * x[i + 2 * m * j];
            }
            *slot = acc;
        }

        // cosine modulation
        for (sb, out) in output.iter_mut().enumerate().take(m) {
            let row = &self.matrix[sb];
            *out = (0..2 * m).map(|i| row[i] * y[i]).sum();
        }
    }
}

/// Per-channel synthesis state for up to 8 subbands.
pub struct Synthesizer {
    subbands: usize,
    /// Reconstruction history
    v: [[f64; 160]; 2],
    /// Modulation matrix: `matrix[i][sb] = cos((i + M/2)(2 sb + 1) pi / 2M)`
    matrix: Vec<[f64; 8]>,
}

impl Synthesizer {
    /// Create a synthesizer for 4 or 8 subbands.
    pub fn new(subbands: usize) -> Self {
        let m = subbands as f64;
        let matrix = (0..2 * subbands)
            .map(|i| {
                let mut row = [0.0; 8];
                for (sb, value) in row.iter_mut().enumerate().take(subbands) {
                    let angle = (i as f64 + m / 2.0) * (2.0 * sb as f64 + 1.0)
                        * std::f64::consts::PI
                        / (2.0 * m);
                    *value = angle.cos();
                }
                row
            })
            .collect();
        Self {
            subbands,
            v: [[0.0; 160]; 2],
            matrix,
        }
    }

    fn window(&self) -> &'static [f64] {
        if self.subbands == 8 {
            &PROTO_8_80
        } else {
            &PROTO_4_40
        }
    }

    /// Consume one block of subband samples for `channel` and produce
    /// `subbands` PCM samples.
    pub fn synthesize(&mut self, channel: usize, input: &[f64], output: &mut [f64]) {
        let m = self.subbands;
        let window = self.window();
        let v = &mut self.v[channel];

        // shift the reconstruction history by 2M
        v.copy_within(0..20 * m - 2 * m, 2 * m);
        for (i, row) in self.matrix.iter().enumerate().take(2 * m) {
            v[i] = (0..m).map(|sb| row[sb] * input[sb]).sum();
        }

        // build the windowed vector: 10M values drawn from alternating
        // half-blocks of the history
        let mut w = [0.0f64; 80];
        for i in 0..5 {
            for j in 0..m {
                w[i * 2 * m + j] = v[i * 4 * m + j] * window[i * 2 * m + j];
                w[i * 2 * m + m + j] = v[i * 4 * m + 3 * m + j] * window[i * 2 * m + m + j];
            }
        }

        // overlap-add, with the window gain folded in
        let gain = m as f64;
        for (j, out) in output.iter_mut().enumerate().take(m) {
            *out = gain * (0..10).map(|i| w[j + m * i]).sum::<f64>();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Push a signal through analysis and synthesis and report the
    /// relative L2 error over the steady-state region. The filterbank
    /// chain delays the signal by roughly `10 M - M + 1` samples and may
    /// invert its polarity; the error is taken over the best alignment
    /// within a small window around the nominal delay.
    fn round_trip_error(subbands: usize, signal: &[f64]) -> f64 {
        let mut analyzer = Analyzer::new(subbands);
        let mut synthesizer = Synthesizer::new(subbands);

        let mut output = Vec::with_capacity(signal.len());
        let mut sb = vec![0.0; subbands];
        let mut pcm = vec![0.0; subbands];
        for block in signal.chunks_exact(subbands) {
            analyzer.analyze(0, block, &mut sb);
            synthesizer.synthesize(0, &sb, &mut pcm);
            output.extend_from_slice(&pcm);
        }

        let nominal = 10 * subbands - subbands + 1;
        let skip = 4 * subbands;
        let span = signal.len() - nominal - 8 * subbands;

        let mut best = f64::INFINITY;
        for delay in nominal.saturating_sub(2 * subbands)..=nominal + 2 * subbands {
            for sign in [1.0, -1.0] {
                let mut err = 0.0;
                let mut pow = 0.0;
                for n in skip..span {
                    let diff = sign * output[n + delay] - signal[n];
                    err += diff * diff;
                    pow += signal[n] * signal[n];
                }
                best = best.min((err / pow).sqrt());
            }
        }
        best
    }

    fn sine(len: usize, freq: f64, rate: f64, amplitude: f64) -> Vec<f64> {
        (0..len)
            .map(|n| amplitude * (2.0 * std::f64::consts::PI * freq * n as f64 / rate).sin())
            .collect()
    }

    #[test]
    fn eight_band_reconstruction_is_close() {
        let signal = sine(8 * 200, 1_000.0, 16_000.0, 10_000.0);
        let err = round_trip_error(8, &signal);
        assert!(err < 0.05, "relative error {err}");
    }

    #[test]
    fn four_band_reconstruction_is_close() {
        let signal = sine(4 * 200, 1_000.0, 16_000.0, 10_000.0);
        let err = round_trip_error(4, &signal);
        assert!(err < 0.05, "relative error {err}");
    }
}
