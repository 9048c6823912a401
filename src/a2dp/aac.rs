//! A2DP streaming over MPEG-4 AAC, backed by libfdk-aac

use std::sync::Arc;

use fdk_aac::dec;
use fdk_aac::enc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::a2dp::caps::{self, AacObjectType};
use crate::error::{EngineError, Result};
use crate::io::{scale_s16le, volume_to_scale, IoSync};
use crate::rtp::{RtpHeader, RtpStream, PAYLOAD_TYPE_MEDIA};
use crate::transport::{ReleaseGuard, Transport, TransportState};

/// Samples per channel in one AAC-LC frame
const AAC_FRAME_SAMPLES: usize = 1024;

fn is_bt_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::NotConnected
    )
}

fn encoder_bitrate(transport: &Transport, config: &caps::AacConfig) -> enc::BitRate {
    if config.vbr {
        match transport.config().aac_vbr_mode {
            1 => return enc::BitRate::VbrVeryLow,
            2 => return enc::BitRate::VbrLow,
            3 => return enc::BitRate::VbrMedium,
            4 => return enc::BitRate::VbrHigh,
            5 => return enc::BitRate::VbrVeryHigh,
            _ => {}
        }
    }
    enc::BitRate::Cbr(config.bitrate)
}

fn new_encoder(transport: &Transport, config: &caps::AacConfig) -> Result<enc::Encoder> {
    let audio_object_type = match config.object_type {
        // the legacy MPEG-2 profile maps onto the same low-complexity tool
        // set in the encoder library
        AacObjectType::Mpeg2Lc | AacObjectType::Mpeg4Lc => {
            enc::AudioObjectType::Mpeg4LowComplexity
        }
        other => {
            return Err(EngineError::UnsupportedConfiguration {
                message: format!("AAC object type not supported by the encoder: {other:?}"),
            })
        }
    };

    let channels = match config.channels {
        1 => enc::ChannelMode::Mono,
        2 => enc::ChannelMode::Stereo,
        n => {
            return Err(EngineError::UnsupportedConfiguration {
                message: format!("AAC channel count not supported: {n}"),
            })
        }
    };

    if transport.config().aac_afterburner {
        tracing::debug!("Enabling AAC afterburner");
    }

    let params = enc::EncoderParams {
        bit_rate: encoder_bitrate(transport, config),
        sample_rate: config.sampling,
        transport: enc::Transport::Raw,
        channels,
        audio_object_type,
    };
    enc::Encoder::new(params).map_err(|e| EngineError::Aac {
        message: format!("encoder initialization failed: {e:?}"),
    })
}

/// Run the A2DP source worker: PCM pipe in, AAC-in-RTP out.
///
/// Encoded frames larger than the writing MTU are fragmented across
/// consecutive RTP packets; the marker bit is set on every fragment but
/// the last one.
///
/// # Errors
///
/// Fatal initialization and I/O failures; peer disconnection is a clean
/// exit.
pub async fn run_source<S>(transport: Arc<Transport>, mut bt: S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let _guard = ReleaseGuard(&transport);
    let a2dp = transport.a2dp_data()?;

    let config = caps::aac_config(transport.codec_config())?;
    let mut encoder = new_encoder(&transport, &config)?;
    let channels = usize::from(config.channels);

    let mtu_write = transport.mtu_write().max(RtpHeader::SIZE + 1);
    let payload_len_max = mtu_write - RtpHeader::SIZE;

    let in_buffer_size = AAC_FRAME_SAMPLES * channels;
    let mut in_buffer = vec![0i16; in_buffer_size];
    // worst-case AAC output, 6144 bits per channel
    let mut out_buffer = vec![0u8; 1024 * channels];
    let mut byte_buffer = vec![0u8; in_buffer_size * 2];
    let mut pending = 0usize;

    let mut rtp = RtpStream::new();
    let mut io_sync = IoSync::new(config.sampling);

    a2dp.pcm.open_read().await?;

    tracing::debug!("Starting IO loop: A2DP source (AAC)");
    loop {
        let samples = tokio::select! {
            biased;
            () = transport.event() => {
                io_sync.reset();
                continue;
            }
            res = a2dp.pcm.read(&mut byte_buffer[pending * 2..]),
                if transport.state() == TransportState::Active =>
            {
                res?
            }
        };
        if samples == 0 {
            return Ok(());
        }

        io_sync.mark();

        if !transport.config().a2dp_volume {
            let (v1, m1) = a2dp.ch1();
            let (v2, m2) = a2dp.ch2();
            scale_s16le(
                &mut byte_buffer[pending * 2..(pending + samples) * 2],
                channels,
                volume_to_scale(v1, m1),
                volume_to_scale(v2, m2),
            );
        }

        for (slot, bytes) in in_buffer[pending..pending + samples]
            .iter_mut()
            .zip(byte_buffer[pending * 2..(pending + samples) * 2].chunks_exact(2))
        {
            *slot = i16::from_le_bytes([bytes[0], bytes[1]]);
        }

        let mut available = pending + samples;
        let mut head = 0usize;

        while available > 0 {
            let info = match encoder.encode(&in_buffer[head..head + available], &mut out_buffer) {
                Ok(info) => info,
                Err(e) => {
                    tracing::error!("AAC encoding error: {e:?}");
                    break;
                }
            };
            if info.output_size > 0 {
                // fragment the audioMuxElement across RTP packets when it
                // exceeds the writing MTU
                if info.output_size > payload_len_max {
                    tracing::debug!(
                        "Payload fragmentation: extra {} bytes",
                        info.output_size - payload_len_max
                    );
                }
                for (chunk, marker) in crate::rtp::fragment(&out_buffer[..info.output_size], payload_len_max) {
                    let packet = rtp.packet(marker, None, chunk);
                    if let Err(e) = bt.write_all(&packet).await {
                        if is_bt_disconnect(&e) {
                            tracing::debug!("BT socket disconnected");
                            return Ok(());
                        }
                        tracing::error!("BT socket write error: {e}");
                        break;
                    }
                }
            }

            head += info.input_consumed;
            available -= info.input_consumed;

            #[allow(clippy::cast_possible_truncation)]
            let frames = (info.input_consumed / channels) as u32;
            rtp.advance_timestamp(io_sync.sync(frames).await);

            if info.input_consumed == 0 {
                // the encoder is stalled; wait for more input
                break;
            }
        }

        // carry unconsumed samples over to the next iteration
        if available > 0 && head > 0 {
            in_buffer.copy_within(head..head + available, 0);
        }
        pending = available;
    }
}

/// Run the A2DP sink worker: AAC-in-RTP in, PCM pipe out.
///
/// # Errors
///
/// Fatal initialization failures; peer disconnection is a clean exit.
pub async fn run_sink<S>(transport: Arc<Transport>, mut bt: S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let _guard = ReleaseGuard(&transport);
    let a2dp = transport.a2dp_data()?;

    let mtu_read = transport.mtu_read();
    if mtu_read == 0 {
        return Err(EngineError::InvalidMtu {
            direction: "reading",
            value: mtu_read,
        });
    }

    let config = caps::aac_config(transport.codec_config())?;
    let channels = usize::from(config.channels);

    // the RTP payload carries the encoder's raw access units with no
    // per-frame sync header, so the decoder must use the same framing
    let mut decoder = dec::Decoder::new(dec::Transport::Raw);
    let mut in_buffer = vec![0u8; mtu_read];
    let mut pcm_buffer = vec![0i16; 2048 * channels];
    let mut out_bytes = vec![0u8; pcm_buffer.len() * 2];

    tracing::debug!("Starting IO loop: A2DP sink (AAC)");
    loop {
        let len = tokio::select! {
            biased;
            () = transport.event() => continue,
            res = bt.read(&mut in_buffer),
                if transport.state() == TransportState::Active =>
            {
                match res {
                    Ok(len) => len,
                    Err(e) => {
                        tracing::debug!("BT read error: {e}");
                        continue;
                    }
                }
            }
        };
        if len == 0 {
            tracing::debug!("BT socket has been closed");
            transport.mark_bt_closed();
            return Ok(());
        }

        match a2dp.pcm.open_write().await {
            Ok(()) => {}
            Err(EngineError::PcmNotRequested) => continue,
            Err(e) => {
                tracing::error!("Couldn't open PCM pipe: {e}");
                continue;
            }
        }

        let header = match RtpHeader::decode(&in_buffer[..len]) {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!("Invalid RTP packet: {e}");
                continue;
            }
        };
        if header.payload_type != PAYLOAD_TYPE_MEDIA {
            tracing::warn!("Unsupported RTP payload type: {}", header.payload_type);
            continue;
        }

        let payload = &in_buffer[header.payload_offset()..len];
        if let Err(e) = decoder.fill(payload) {
            tracing::error!("AAC buffer fill error: {e:?}");
            continue;
        }
        if let Err(e) = decoder.decode_frame(&mut pcm_buffer) {
            tracing::error!("AAC decode frame error: {e:?}");
            continue;
        }

        let info = decoder.stream_info();
        let samples = info.frameSize as usize * info.numChannels as usize;
        if samples == 0 || samples > pcm_buffer.len() {
            continue;
        }

        for (bytes, sample) in out_bytes.chunks_exact_mut(2).zip(&pcm_buffer[..samples]) {
            bytes.copy_from_slice(&sample.to_le_bytes());
        }
        if a2dp.pcm.write(&out_bytes[..samples * 2]).await.is_err() {
            tracing::error!("PCM pipe write error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::pcm::Pcm;
    use crate::transport::Profile;

    fn aac_transport(vbr_mode: u8) -> Arc<Transport> {
        let config = Arc::new(Config {
            aac_vbr_mode: vbr_mode,
            ..Config::default()
        });
        Transport::a2dp(
            Profile::A2dpSource,
            caps::CODEC_AAC,
            vec![0x40, 0x01, 0x04, 0x84, 0xE2, 0x00],
            config,
            Pcm::new(),
        )
    }

    #[test]
    fn vbr_mode_selection() {
        let config = caps::aac_config(&[0x40, 0x01, 0x04, 0x84, 0xE2, 0x00]).unwrap();
        assert!(matches!(
            encoder_bitrate(&aac_transport(3), &config),
            enc::BitRate::VbrMedium
        ));
        // VBR bit set but no VBR mode configured: fall back to CBR
        assert!(matches!(
            encoder_bitrate(&aac_transport(0), &config),
            enc::BitRate::Cbr(320_000)
        ));
    }
}
