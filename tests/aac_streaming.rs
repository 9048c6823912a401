//! A2DP AAC worker integration: PCM round-tripped from the source
//! worker into the sink worker over in-memory streams.

#![cfg(feature = "aac")]

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use bluealsa::a2dp::{self, CODEC_AAC};
use bluealsa::{Config, Pcm, PcmStream, Profile, Transport, TransportState};

/// MPEG-4 AAC LC, 44.1 kHz stereo, CBR 128 kbit/s: every encoded frame
/// fits one RTP packet at the test MTU
const AAC_CAPS: [u8; 6] = [0x40, 0x01, 0x04, 0x01, 0xF4, 0x00];
const MTU: usize = 672;

/// PCM bytes the source worker consumes per iteration: one AAC frame of
/// 1024 samples per channel
const READ_QUANTUM: usize = 1024 * 2 * 2;

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

fn aac_transport(profile: Profile) -> Arc<Transport> {
    let transport = Transport::a2dp(
        profile,
        CODEC_AAC,
        AAC_CAPS.to_vec(),
        Arc::new(Config::default()),
        Pcm::new(),
    );
    transport.set_mtu(MTU, MTU);
    transport.set_state(TransportState::Active);
    transport
}

#[tokio::test]
async fn source_to_sink_round_trip() {
    // the source's socket end feeds the sink's directly
    let (source_bt, sink_bt) = tokio::io::duplex(1 << 16);

    let source = aac_transport(Profile::A2dpSource);
    let (pcm_in_near, mut pcm_in) = tokio::io::duplex(1 << 16);
    source
        .a2dp_data()
        .unwrap()
        .pcm
        .install(PcmStream::Mem(pcm_in_near))
        .await;
    let source_worker = tokio::spawn(a2dp::aac::run_source(source.clone(), source_bt));

    let sink = aac_transport(Profile::A2dpSink);
    let (pcm_out_near, mut pcm_out) = tokio::io::duplex(1 << 16);
    sink.a2dp_data()
        .unwrap()
        .pcm
        .install(PcmStream::Mem(pcm_out_near))
        .await;
    let sink_worker = tokio::spawn(a2dp::aac::run_sink(sink.clone(), sink_bt));

    // feed one encoder frame at a time; the pacer spaces the packets so
    // the sink sees them in separate socket reads
    let pcm = sine_stereo(READ_QUANTUM * 4);
    for quantum in pcm.chunks_exact(READ_QUANTUM) {
        pcm_in.write_all(quantum).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    }

    // two decoded frames are enough to get past the codec priming delay
    let mut decoded = vec![0u8; READ_QUANTUM * 2];
    pcm_out.read_exact(&mut decoded).await.unwrap();
    assert!(
        decoded[READ_QUANTUM..].iter().any(|&b| b != 0),
        "decoded PCM stayed silent"
    );

    // closing the PCM writer winds the chain down: the source exits,
    // its socket end drops and the sink observes the hangup
    drop(pcm_in);
    source_worker.await.unwrap().unwrap();
    sink_worker.await.unwrap().unwrap();
    assert!(sink.bt_closed());
}
