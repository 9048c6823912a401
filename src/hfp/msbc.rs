//! mSBC framing for the SCO voice path
//!
//! Wraps every 57-byte mSBC frame in a 2-byte H2 synchronization header
//! and recovers frame alignment on the receive side by scanning for the
//! H2/syncword pattern byte by byte.

use crate::sbc::{SbcDecoder, SbcEncoder};

/// H2 synchronization header length
pub const H2_HEADER_LEN: usize = 2;
/// mSBC payload length
pub const MSBC_FRAME_LEN: usize = 57;
/// One H2-framed mSBC frame on the wire
pub const H2_FRAME_LEN: usize = H2_HEADER_LEN + MSBC_FRAME_LEN;
/// PCM bytes per mSBC frame (120 samples at 16 kHz mono)
pub const MSBC_PCM_LEN: usize = 240;
/// SCO sockets accept data in 24-byte chunks even though the reported
/// MTU is larger
pub const MSBC_WIRE_CHUNK: usize = 24;
/// Frames accumulated before the first transmission
pub const MSBC_PREBUFFER_FRAMES: usize = 1;

const H2_HEADER_0: u8 = 0x01;
/// Second H2 byte for sequence numbers 0 to 3
const H2_SEQUENCE: [u8; 4] = [0x08, 0x38, 0xC8, 0xF8];
/// mSBC frame syncword
const MSBC_SYNCWORD: u8 = 0xAD;

const DEC_BUFFER_SIZE: usize = H2_FRAME_LEN * 2;
const ENC_BUFFER_SIZE: usize = H2_FRAME_LEN * 4;
const ENC_PCM_BUFFER_SIZE: usize = MSBC_PCM_LEN * 4;

/// Dual-direction mSBC state: decoder with its byte-aligned input ring
/// and encoder with its frame-aligned output ring.
pub struct MsbcState {
    decoder: SbcDecoder,
    dec_buffer: Vec<u8>,

    encoder: SbcEncoder,
    enc_buffer: Vec<u8>,
    enc_pcm: Vec<u8>,
    /// H2 sequence counter of the next encoded frame
    seq: u8,
    /// Prebuffer latch, set once the first frames went out
    first_frame_sent: bool,
}

impl MsbcState {
    /// Fresh codec state; created anew whenever the voice path is
    /// (re)activated.
    #[must_use]
    pub fn new() -> Self {
        Self {
            decoder: SbcDecoder::msbc(),
            dec_buffer: Vec::with_capacity(DEC_BUFFER_SIZE),
            encoder: SbcEncoder::msbc(),
            enc_buffer: Vec::with_capacity(ENC_BUFFER_SIZE),
            enc_pcm: Vec::with_capacity(ENC_PCM_BUFFER_SIZE),
            seq: 0,
            first_frame_sent: false,
        }
    }

    // ===== decode direction =====

    /// Free space in the decoder input buffer.
    #[must_use]
    pub fn dec_free(&self) -> usize {
        DEC_BUFFER_SIZE - self.dec_buffer.len()
    }

    /// Append raw SCO bytes to the decoder input buffer.
    pub fn push_encoded(&mut self, data: &[u8]) {
        let take = data.len().min(self.dec_free());
        self.dec_buffer.extend_from_slice(&data[..take]);
    }

    /// Drop all pending decoder input (microphone pipe not attached).
    pub fn clear_decoder(&mut self) {
        self.dec_buffer.clear();
    }

    /// Scan the input buffer for H2-framed mSBC frames and decode them,
    /// appending PCM to `out`. Unaligned bytes are skipped one at a time;
    /// a codec error drops the whole buffer.
    pub fn decode_frames(&mut self, out: &mut Vec<u8>) {
        let mut pos = 0usize;
        let mut pcm = [0u8; MSBC_PCM_LEN];

        while self.dec_buffer.len() - pos >= H2_FRAME_LEN {
            if self.dec_buffer[pos] == H2_HEADER_0
                && self.dec_buffer[pos + 2] == MSBC_SYNCWORD
            {
                let frame = &self.dec_buffer[pos + H2_HEADER_LEN..pos + H2_FRAME_LEN];
                match self.decoder.decode(frame, &mut pcm) {
                    Ok((consumed, written)) => {
                        out.extend_from_slice(&pcm[..written]);
                        pos += consumed + H2_HEADER_LEN;
                    }
                    Err(e) => {
                        tracing::error!("mSBC decoding error: {e}");
                        self.dec_buffer.clear();
                        return;
                    }
                }
            } else {
                pos += 1;
            }
        }
        self.dec_buffer.drain(..pos);
    }

    // ===== encode direction =====

    /// Free space in the encoder PCM buffer.
    #[must_use]
    pub fn enc_pcm_free(&self) -> usize {
        ENC_PCM_BUFFER_SIZE - self.enc_pcm.len()
    }

    /// Whether the encoded ring can take another H2 frame.
    #[must_use]
    pub fn has_room_for_frame(&self) -> bool {
        ENC_BUFFER_SIZE - self.enc_buffer.len() >= H2_FRAME_LEN
    }

    /// Append speaker PCM to the encoder input buffer.
    pub fn push_pcm(&mut self, data: &[u8]) {
        let take = data.len().min(self.enc_pcm_free());
        self.enc_pcm.extend_from_slice(&data[..take]);
    }

    /// Encode as many H2-framed mSBC frames as input and output space
    /// allow.
    pub fn encode_pending(&mut self) {
        let mut consumed = 0usize;
        let mut frame = [0u8; MSBC_FRAME_LEN];

        while self.enc_pcm.len() - consumed >= MSBC_PCM_LEN && self.has_room_for_frame() {
            match self
                .encoder
                .encode(&self.enc_pcm[consumed..], &mut frame)
            {
                Ok((pcm_used, written)) => {
                    self.enc_buffer.push(H2_HEADER_0);
                    self.enc_buffer.push(H2_SEQUENCE[usize::from(self.seq)]);
                    self.enc_buffer.extend_from_slice(&frame[..written]);
                    self.seq = (self.seq + 1) % 4;
                    consumed += pcm_used;
                }
                Err(e) => {
                    tracing::error!("Unable to encode mSBC: {e}");
                    consumed += MSBC_PCM_LEN;
                }
            }
        }
        self.enc_pcm.drain(..consumed);
    }

    /// Bytes waiting in the encoded ring.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.enc_buffer.len()
    }

    /// Take `len` encoded bytes for transmission, or `None` when fewer
    /// are buffered.
    pub fn pop_encoded(&mut self, len: usize) -> Option<Vec<u8>> {
        if self.enc_buffer.len() < len {
            return None;
        }
        Some(self.enc_buffer.drain(..len).collect())
    }

    /// Whether the initial prebuffer has been transmitted.
    #[must_use]
    pub fn first_frame_sent(&self) -> bool {
        self.first_frame_sent
    }

    /// Latch the prebuffer as transmitted.
    pub fn set_first_frame_sent(&mut self) {
        self.first_frame_sent = true;
    }
}

impl Default for MsbcState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_pcm(samples: usize) -> Vec<u8> {
        (0..samples)
            .flat_map(|n| {
                let phase = 2.0 * std::f64::consts::PI * 440.0 * n as f64 / 16_000.0;
                #[allow(clippy::cast_possible_truncation)]
                let sample = (phase.sin() * 10_000.0) as i16;
                sample.to_le_bytes()
            })
            .collect()
    }

    #[test]
    fn h2_sequence_cycles() {
        let mut state = MsbcState::new();
        let pcm = sine_pcm(120 * 8);

        let mut headers = Vec::new();
        for block in pcm.chunks_exact(MSBC_PCM_LEN) {
            state.push_pcm(block);
            state.encode_pending();
            while let Some(frame) = state.pop_encoded(H2_FRAME_LEN) {
                assert_eq!(frame.len(), H2_FRAME_LEN);
                assert_eq!(frame[0], 0x01);
                assert_eq!(frame[2], 0xAD);
                headers.push(frame[1]);
            }
        }

        assert_eq!(
            headers,
            vec![0x08, 0x38, 0xC8, 0xF8, 0x08, 0x38, 0xC8, 0xF8]
        );
    }

    #[test]
    fn encode_decode_round_trip_with_offset_garbage() {
        let mut state = MsbcState::new();
        let pcm = sine_pcm(120 * 4);

        state.push_pcm(&pcm);
        state.encode_pending();

        // receive with a misaligned prefix
        state.push_encoded(&[0x55, 0x00, 0x17]);
        let mut decoded = Vec::new();
        while let Some(frame) = state.pop_encoded(H2_FRAME_LEN) {
            state.push_encoded(&frame);
            state.decode_frames(&mut decoded);
        }

        assert_eq!(decoded.len(), 4 * MSBC_PCM_LEN);
    }

    #[test]
    fn corrupt_frame_drops_buffer() {
        let mut sender = MsbcState::new();
        sender.push_pcm(&[0u8; MSBC_PCM_LEN]);
        sender.encode_pending();
        let mut frame = sender.pop_encoded(H2_FRAME_LEN).unwrap();
        frame[6] ^= 0xFF; // scale factor area, the CRC no longer matches

        let mut state = MsbcState::new();
        state.push_encoded(&frame);
        let mut decoded = Vec::new();
        state.decode_frames(&mut decoded);

        assert!(decoded.is_empty());
        assert_eq!(state.dec_free(), DEC_BUFFER_SIZE);
    }

    #[test]
    fn input_buffers_are_bounded() {
        let mut state = MsbcState::new();
        state.push_pcm(&vec![0u8; ENC_PCM_BUFFER_SIZE * 2]);
        assert_eq!(state.enc_pcm_free(), 0);

        state.push_encoded(&vec![0x55u8; DEC_BUFFER_SIZE * 2]);
        assert_eq!(state.dec_free(), 0);
    }

    #[test]
    fn prebuffer_latch() {
        let mut state = MsbcState::new();
        assert!(!state.first_frame_sent());
        state.set_first_frame_sent();
        assert!(state.first_frame_sent());
    }
}
