//! A2DP SBC worker integration: source packetization and sink playback
//! driven over in-memory streams.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use bluealsa::a2dp::{self, CODEC_SBC};
use bluealsa::rtp::{RtpHeader, SbcPayloadHeader};
use bluealsa::{Config, Pcm, PcmStream, Profile, Transport, TransportState};

/// 44.1 kHz joint stereo, 16 blocks, 8 subbands, loudness, bitpool 53:
/// 119-byte frames from 512-byte PCM blocks
const SBC_CAPS: [u8; 4] = [0x21, 0x15, 2, 53];
const FRAME_LENGTH: usize = 119;
const CODESIZE: usize = 512;
const MTU: usize = 672;

/// PCM block the source worker consumes per iteration: the input buffer
/// holds as many codec blocks as frames fit the MTU.
const READ_QUANTUM: usize = CODESIZE * (MTU / FRAME_LENGTH);

fn sine_stereo(bytes: usize) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(bytes);
    let mut n = 0u32;
    while pcm.len() < bytes {
        let phase = 2.0 * std::f64::consts::PI * 440.0 * f64::from(n) / 44_100.0;
        let sample = (phase.sin() * 12_000.0) as i16;
        pcm.extend_from_slice(&sample.to_le_bytes());
        pcm.extend_from_slice(&sample.to_le_bytes());
        n += 1;
    }
    pcm
}

fn source_setup() -> (
    Arc<Transport>,
    tokio::io::DuplexStream,
    tokio::io::DuplexStream,
) {
    let transport = Transport::a2dp(
        Profile::A2dpSource,
        CODEC_SBC,
        SBC_CAPS.to_vec(),
        Arc::new(Config::default()),
        Pcm::new(),
    );
    transport.set_mtu(MTU, MTU);
    transport.set_state(TransportState::Active);
    let (near, far) = tokio::io::duplex(1 << 16);
    (transport, near, far)
}

#[tokio::test]
async fn source_packs_frames_into_single_rtp_packets() {
    let (transport, bt_near, mut bt_far) = source_setup();

    let (pcm_near, mut pcm_far) = tokio::io::duplex(1 << 16);
    transport
        .a2dp_data()
        .unwrap()
        .pcm
        .install(PcmStream::Mem(pcm_near))
        .await;

    let worker = tokio::spawn(a2dp::sbc::run_source(transport.clone(), bt_near));

    // two full reader quanta produce two packets
    pcm_far.write_all(&sine_stereo(READ_QUANTUM)).await.unwrap();
    pcm_far.write_all(&sine_stereo(READ_QUANTUM)).await.unwrap();

    let frames_per_packet = (READ_QUANTUM / CODESIZE) as u8;
    let packet_len = RtpHeader::SIZE + 1 + usize::from(frames_per_packet) * FRAME_LENGTH;

    let mut first = vec![0u8; packet_len];
    bt_far.read_exact(&mut first).await.unwrap();
    let mut second = vec![0u8; packet_len];
    bt_far.read_exact(&mut second).await.unwrap();

    let first_header = RtpHeader::decode(&first).unwrap();
    let second_header = RtpHeader::decode(&second).unwrap();

    assert_eq!(first_header.version, 2);
    assert_eq!(first_header.payload_type, 96);
    assert!(!first_header.marker);
    assert_eq!(
        second_header.sequence,
        first_header.sequence.wrapping_add(1)
    );

    let payload = SbcPayloadHeader::decode(first[RtpHeader::SIZE]);
    assert_eq!(payload.frame_count, frames_per_packet);
    // every SBC frame starts with its syncword
    assert_eq!(first[RtpHeader::SIZE + 1], 0x9C);

    // the pacer keeps the timestamp advancing with the transmitted frames
    assert!(second_header.timestamp != first_header.timestamp);

    drop(pcm_far);
    worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn source_releases_on_pcm_eof() {
    let (transport, bt_near, _bt_far) = source_setup();

    let (pcm_near, pcm_far) = tokio::io::duplex(1 << 16);
    transport
        .a2dp_data()
        .unwrap()
        .pcm
        .install(PcmStream::Mem(pcm_near))
        .await;

    let released = Arc::new(AtomicUsize::new(0));
    let flag = released.clone();
    transport.on_release(Box::new(move || {
        flag.fetch_add(1, Ordering::SeqCst);
    }));

    let worker = tokio::spawn(a2dp::sbc::run_source(transport.clone(), bt_near));

    // the writer goes away without sending anything
    drop(pcm_far);

    worker.await.unwrap().unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert!(!transport.a2dp_data().unwrap().pcm.is_open().await);
}

#[tokio::test]
async fn sink_decodes_packets_to_pcm() {
    let pcm = Pcm::new();
    let (pcm_near, mut pcm_far) = tokio::io::duplex(1 << 16);
    pcm.install(PcmStream::Mem(pcm_near)).await;

    let transport = Transport::a2dp(
        Profile::A2dpSink,
        CODEC_SBC,
        SBC_CAPS.to_vec(),
        Arc::new(Config::default()),
        pcm,
    );
    transport.set_mtu(MTU, MTU);
    transport.set_state(TransportState::Active);

    let (bt_near, mut bt_far) = tokio::io::duplex(1 << 16);
    let worker = tokio::spawn(a2dp::sbc::run_sink(transport.clone(), bt_near));

    // produce one valid packet with the crate's own encoder
    let params = bluealsa::sbc::SbcParams {
        frequency: bluealsa::sbc::Frequency::Hz44100,
        blocks: 16,
        subbands: 8,
        mode: bluealsa::sbc::ChannelMode::JointStereo,
        allocation: bluealsa::sbc::Allocation::Loudness,
        bitpool: 53,
        msbc: false,
    };
    let mut encoder = bluealsa::sbc::SbcEncoder::new(params).unwrap();
    let pcm_in = sine_stereo(CODESIZE * 3);
    let mut packet = Vec::new();
    packet.extend_from_slice(&RtpHeader::new_media(7, 0, false).encode());
    packet.push(SbcPayloadHeader { frame_count: 3 }.encode());
    let mut frame = vec![0u8; FRAME_LENGTH];
    for block in pcm_in.chunks_exact(CODESIZE) {
        encoder.encode(block, &mut frame).unwrap();
        packet.extend_from_slice(&frame);
    }

    // a packet with a foreign payload type is dropped with a warning;
    // the pause keeps the two packets in separate socket reads
    let mut bogus = packet.clone();
    bogus[1] = 0x0A;
    bt_far.write_all(&bogus).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    bt_far.write_all(&packet).await.unwrap();

    let mut decoded = vec![0u8; CODESIZE * 3];
    pcm_far.read_exact(&mut decoded).await.unwrap();
    assert!(decoded.iter().any(|&b| b != 0));

    // closing the socket ends the worker and flags the BT side closed
    drop(bt_far);
    worker.await.unwrap().unwrap();
    assert!(transport.bt_closed());
}
