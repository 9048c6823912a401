//! SCO voice worker: CVSD passthrough or H2-framed mSBC
//!
//! Multiplexes the Bluetooth SCO socket with the speaker and microphone
//! PCM pipes. While neither pipe is attached the radio SCO link is
//! released to free Bluetooth bandwidth; the microphone signal keeps
//! flowing otherwise and is discarded when nobody reads it.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::hfp::msbc::{MsbcState, MSBC_PREBUFFER_FRAMES, MSBC_WIRE_CHUNK};
use crate::io::IoSync;
use crate::pcm::Pcm;
use crate::transport::{ReleaseGuard, ScoCodec, Transport};

/// Read speaker PCM: whatever is available when feeding the mSBC
/// encoder, one whole MTU-sized block for transparent CVSD. Returns the
/// number of bytes read.
async fn read_speaker(pcm: &Pcm, some: bool, cap: usize, buffer: &mut [u8]) -> Result<usize> {
    if some {
        pcm.read_some(&mut buffer[..cap]).await
    } else {
        pcm.read(&mut buffer[..cap]).await.map(|samples| samples * 2)
    }
}

async fn write_wire_chunk<S>(bt: &mut S, state: &mut MsbcState)
where
    S: AsyncWrite + Unpin,
{
    let Some(chunk) = state.pop_encoded(MSBC_WIRE_CHUNK) else {
        tracing::warn!("Encoded data underflow");
        return;
    };
    if let Err(e) = bt.write_all(&chunk).await {
        tracing::warn!("Could not write to mSBC socket: {e}");
    }
}

/// Run the SCO worker.
///
/// # Errors
///
/// [`crate::error::EngineError::ProfileMismatch`] when the transport is
/// not a SCO one; socket loss is a clean exit.
pub async fn run<S>(transport: Arc<Transport>, mut bt: S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let _guard = ReleaseGuard(&transport);
    let sco = transport.sco_data()?;

    // these have to be bigger than the SCO MTU
    let mut bt_buffer = vec![0u8; 512];
    let mut pcm_buffer = vec![0u8; 512];

    let mut msbc: Option<MsbcState> = None;
    let mut io_sync = IoSync::new(sco.codec().sampling());
    let mut spk_open = false;
    let mut mic_open = false;
    // flow control: one speaker read per SCO exchange when encoding
    let mut spk_armed = true;

    tracing::debug!("Starting IO loop: {:?}", transport.profile());
    loop {
        let use_msbc = sco.codec() == ScoCodec::Msbc;
        let spk_cap = if use_msbc {
            msbc.as_ref().map_or(0, MsbcState::enc_pcm_free)
        } else {
            transport.mtu_write()
        }
        .min(pcm_buffer.len());
        let spk_ready = spk_open && spk_cap > 0 && (!use_msbc || spk_armed);

        tokio::select! {
            biased;
            () = transport.event() => {
                // try to open both directions; missing endpoints are fine
                spk_open = sco.spk_pcm.open_read().await.is_ok();
                mic_open = sco.mic_pcm.open_write().await.is_ok();

                if !spk_open && !mic_open {
                    // nobody is transferring audio, free the radio
                    // bandwidth until a pipe is attached again
                    sco.request_link(false);
                    io_sync.reset();
                } else {
                    sco.request_link(true);
                    if sco.codec() == ScoCodec::Msbc {
                        msbc = Some(MsbcState::new());
                        spk_armed = true;
                    }
                    io_sync.set_sampling(sco.codec().sampling());
                }
            }

            res = bt.read(&mut bt_buffer) => {
                let len = match res {
                    Ok(0) => {
                        tracing::debug!("SCO socket has been closed");
                        transport.mark_bt_closed();
                        return Ok(());
                    }
                    Ok(len) => len,
                    Err(e) => {
                        tracing::debug!("SCO read error: {e}");
                        continue;
                    }
                };

                if use_msbc {
                    let state = msbc.get_or_insert_with(MsbcState::new);
                    state.push_encoded(&bt_buffer[..len]);

                    if mic_open {
                        let mut decoded = Vec::new();
                        state.decode_frames(&mut decoded);
                        if !decoded.is_empty() {
                            match sco.mic_pcm.write(&decoded).await {
                                Ok(0) => mic_open = false,
                                Ok(_) => {}
                                Err(e) => tracing::error!("PCM pipe write error: {e}"),
                            }
                        }
                    } else {
                        // drop microphone data while nobody reads it
                        state.clear_decoder();
                    }

                    // synchronize transmission to the receive cadence
                    if spk_open {
                        if state.first_frame_sent() {
                            let mut budget = len;
                            while budget >= MSBC_WIRE_CHUNK
                                && state.encoded_len() >= MSBC_WIRE_CHUNK
                            {
                                write_wire_chunk(&mut bt, state).await;
                                budget -= MSBC_WIRE_CHUNK;
                            }
                        } else if state.encoded_len()
                            >= MSBC_PREBUFFER_FRAMES * MSBC_WIRE_CHUNK
                        {
                            tracing::debug!("Sending mSBC prebuffer");
                            for _ in 0..MSBC_PREBUFFER_FRAMES {
                                write_wire_chunk(&mut bt, state).await;
                            }
                            state.set_first_frame_sent();
                        }
                        if state.has_room_for_frame() {
                            spk_armed = true;
                        }
                    }
                } else {
                    // transparent CVSD: the payload is raw 8 kHz PCM
                    if transport.mtu_write() == 0 {
                        // detect the usable MTU from the first packet
                        transport.set_mtu(len, len);
                    }
                    if mic_open {
                        match sco.mic_pcm.write(&bt_buffer[..len]).await {
                            Ok(0) => mic_open = false,
                            Ok(_) => {}
                            Err(e) => tracing::error!("PCM pipe write error: {e}"),
                        }
                    }
                }
            }

            res = read_speaker(&sco.spk_pcm, use_msbc, spk_cap, &mut pcm_buffer),
                if spk_ready =>
            {
                let len = res?;
                if len == 0 {
                    spk_open = false;
                    continue;
                }

                if use_msbc {
                    if let Some(state) = msbc.as_mut() {
                        state.push_pcm(&pcm_buffer[..len]);
                        state.encode_pending();
                        // stop reading until the encoder ring has room again
                        spk_armed = false;
                    }
                } else {
                    if let Err(e) = bt.write_all(&pcm_buffer[..len]).await {
                        tracing::error!("SCO socket write error: {e}");
                        continue;
                    }
                    #[allow(clippy::cast_possible_truncation)]
                    io_sync.sync((len / 2) as u32).await;
                }
            }
        }
    }
}
