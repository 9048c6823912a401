//! A2DP streaming over the SBC codec

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::a2dp::caps;
use crate::error::Result;
use crate::io::{scale_s16le, volume_to_scale, IoSync};
use crate::rtp::{RtpHeader, RtpStream, SbcPayloadHeader, PAYLOAD_TYPE_MEDIA};
use crate::sbc::{SbcDecoder, SbcEncoder};
use crate::transport::{ReleaseGuard, Transport, TransportState};

fn is_bt_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::NotConnected
    )
}

/// Run the A2DP source worker: PCM pipe in, SBC-in-RTP out.
///
/// Returns when the PCM endpoint or the Bluetooth peer goes away; the
/// transport release callback fires on every exit path.
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

    let params = caps::sbc_params(transport.codec_config())?;
    let mut encoder = SbcEncoder::new(params)?;
    let codesize = encoder.codesize();
    let frame_length = encoder.frame_length();
    let channels = params.channels();

    // the writing MTU must hold the RTP header, the payload header and at
    // least one frame
    let min_mtu = RtpHeader::SIZE + SbcPayloadHeader::SIZE + frame_length;
    let mut mtu_write = transport.mtu_write();
    if mtu_write < min_mtu {
        tracing::warn!(
            "Writing MTU too small for one single SBC frame: {mtu_write} < {min_mtu}"
        );
        mtu_write = min_mtu;
    }

    let in_buffer_size = codesize * (mtu_write / frame_length);
    let mut in_buffer = vec![0u8; in_buffer_size];
    // bytes carried over from the previous iteration
    let mut pending = 0usize;

    let mut rtp = RtpStream::new();
    let mut io_sync = IoSync::new(params.frequency.hz());

    a2dp.pcm.open_read().await?;

    tracing::debug!("Starting IO loop: A2DP source (SBC)");
    loop {
        let samples = tokio::select! {
            biased;
            () = transport.event() => {
                io_sync.reset();
                continue;
            }
            res = a2dp.pcm.read(&mut in_buffer[pending..]),
                if transport.state() == TransportState::Active =>
            {
                res?
            }
        };
        if samples == 0 {
            // PCM endpoint closed; its release already fired
            return Ok(());
        }

        io_sync.mark();

        if !transport.config().a2dp_volume {
            let (v1, m1) = a2dp.ch1();
            let (v2, m2) = a2dp.ch2();
            scale_s16le(
                &mut in_buffer[pending..pending + samples * 2],
                channels,
                volume_to_scale(v1, m1),
                volume_to_scale(v2, m2),
            );
        }

        let available = pending + samples * 2;
        let mut input = 0usize;

        // encode and transfer everything the buffer holds
        while available - input >= codesize {
            let mut payload = vec![0u8; mtu_write - RtpHeader::SIZE - SbcPayloadHeader::SIZE];
            let mut payload_len = 0usize;
            let mut pcm_frames = 0u32;
            let mut sbc_frames = 0u8;

            // pack as many frames as the packet can carry
            while available - input >= codesize
                && payload.len() - payload_len >= frame_length
                && sbc_frames < 15
            {
                match encoder.encode(&in_buffer[input..available], &mut payload[payload_len..]) {
                    Ok((consumed, written)) => {
                        input += consumed;
                        payload_len += written;
                        pcm_frames += (consumed / channels / 2) as u32;
                        sbc_frames += 1;
                    }
                    Err(e) => {
                        tracing::error!("SBC encoding error: {e}");
                        break;
                    }
                }
            }
            if sbc_frames == 0 {
                break;
            }

            let header = SbcPayloadHeader {
                frame_count: sbc_frames,
            };
            let packet = rtp.packet(false, Some(header.encode()), &payload[..payload_len]);

            if let Err(e) = bt.write_all(&packet).await {
                if is_bt_disconnect(&e) {
                    tracing::debug!("BT socket disconnected");
                    return Ok(());
                }
                tracing::error!("BT socket write error: {e}");
            }

            // keep a constant bit rate and take the timestamp of the next
            // RTP frame from the pacer
            rtp.advance_timestamp(io_sync.sync(pcm_frames).await);
        }

        // move unprocessed samples to the front of the linear buffer
        let leftover = available - input;
        if leftover > 0 && input > 0 {
            in_buffer.copy_within(input..available, 0);
        }
        pending = leftover;
    }
}

/// Run the A2DP sink worker: SBC-in-RTP in, PCM pipe out.
///
/// # Errors
///
/// Fatal initialization failures ([`crate::error::EngineError::InvalidMtu`]
/// for an unset reading MTU); peer disconnection is a clean exit.
pub async fn run_sink<S>(transport: Arc<Transport>, mut bt: S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let _guard = ReleaseGuard(&transport);
    let a2dp = transport.a2dp_data()?;

    let mtu_read = transport.mtu_read();
    if mtu_read == 0 {
        return Err(crate::error::EngineError::InvalidMtu {
            direction: "reading",
            value: mtu_read,
        });
    }

    let params = caps::sbc_params(transport.codec_config())?;
    let mut decoder = SbcDecoder::new(params)?;
    let codesize = decoder.codesize();
    let frame_length = decoder.frame_length();

    let mut in_buffer = vec![0u8; mtu_read];
    let mut out_buffer = vec![0u8; codesize * (mtu_read / frame_length + 1)];

    tracing::debug!("Starting IO loop: A2DP sink (SBC)");
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
            // the peer stack closed the connection on its own
            tracing::debug!("BT socket has been closed");
            transport.mark_bt_closed();
            return Ok(());
        }

        match a2dp.pcm.open_write().await {
            Ok(()) => {}
            Err(crate::error::EngineError::PcmNotRequested) => continue,
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

        let payload_at = header.payload_offset();
        if len <= payload_at + SbcPayloadHeader::SIZE {
            tracing::warn!("RTP packet carries no SBC payload");
            continue;
        }
        let mut frames = SbcPayloadHeader::decode(in_buffer[payload_at]).frame_count;

        let mut input = payload_at + SbcPayloadHeader::SIZE;
        let mut produced = 0usize;
        while frames > 0 && len - input >= frame_length {
            match decoder.decode(&in_buffer[input..len], &mut out_buffer[produced..]) {
                Ok((consumed, written)) => {
                    input += consumed;
                    produced += written;
                    frames -= 1;
                }
                Err(e) => {
                    tracing::error!("SBC decoding error: {e}");
                    break;
                }
            }
        }
        if frames > 0 {
            tracing::debug!("RTP payload ended {frames} frames early");
        }

        if produced > 0 && a2dp.pcm.write(&out_buffer[..produced]).await.is_err() {
            tracing::error!("PCM pipe write error");
        }
    }
}
