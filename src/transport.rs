//! Shared per-connection transport descriptor
//!
//! One `Transport` is created by the control plane per Bluetooth
//! connection and shared with exactly one worker task. The control plane
//! mutates the adjustable fields (state, volumes, gains, codec) and pokes
//! the event signal; the worker reads them without locking and accepts
//! eventual consistency.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::Notify;

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::pcm::Pcm;

/// Bluetooth profile served by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// A2DP source: PCM in, encoded audio out
    A2dpSource,
    /// A2DP sink: encoded audio in, PCM out
    A2dpSink,
    /// Hands-Free audio gateway
    HfpAg,
    /// Headset audio gateway
    HspAg,
}

/// SCO voice codec identifiers (HFP codec IDs)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScoCodec {
    /// 8 kHz CVSD, raw PCM on the wire
    Cvsd = 1,
    /// 16 kHz mSBC in H2-framed SCO packets
    Msbc = 2,
}

impl ScoCodec {
    fn from_u8(value: u8) -> Self {
        match value {
            2 => Self::Msbc,
            _ => Self::Cvsd,
        }
    }

    /// Sampling frequency of the codec in Hz.
    #[must_use]
    pub fn sampling(self) -> u32 {
        match self {
            Self::Cvsd => 8_000,
            Self::Msbc => 16_000,
        }
    }
}

/// Transport lifecycle state, driven by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransportState {
    /// Created, no audio flowing
    Idle = 0,
    /// Acquisition in progress
    Pending = 1,
    /// Audio may flow
    Active = 2,
    /// Connection torn down
    Aborted = 3,
}

impl TransportState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Pending,
            2 => Self::Active,
            3 => Self::Aborted,
            _ => Self::Idle,
        }
    }
}

/// A2DP transport payload: one PCM endpoint plus per-channel volume
pub struct A2dp {
    /// The local PCM endpoint
    pub pcm: Pcm,
    ch1_volume: AtomicU8,
    ch2_volume: AtomicU8,
    ch1_muted: AtomicBool,
    ch2_muted: AtomicBool,
}

impl A2dp {
    /// Volume and mute state of the first channel.
    #[must_use]
    pub fn ch1(&self) -> (u8, bool) {
        (
            self.ch1_volume.load(Ordering::Relaxed),
            self.ch1_muted.load(Ordering::Relaxed),
        )
    }

    /// Volume and mute state of the second channel.
    #[must_use]
    pub fn ch2(&self) -> (u8, bool) {
        (
            self.ch2_volume.load(Ordering::Relaxed),
            self.ch2_muted.load(Ordering::Relaxed),
        )
    }

    /// Set channel volumes (control plane).
    pub fn set_volume(&self, ch1: u8, ch2: u8) {
        self.ch1_volume.store(ch1.min(127), Ordering::Relaxed);
        self.ch2_volume.store(ch2.min(127), Ordering::Relaxed);
    }

    /// Set channel mute flags (control plane).
    pub fn set_muted(&self, ch1: bool, ch2: bool) {
        self.ch1_muted.store(ch1, Ordering::Relaxed);
        self.ch2_muted.store(ch2, Ordering::Relaxed);
    }
}

/// Peer accessory information reported over RFCOMM (`+XAPL`,
/// `+IPHONEACCEV`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessoryInfo {
    /// Vendor ID from `+XAPL`
    pub vendor_id: u16,
    /// Product ID from `+XAPL`
    pub product_id: u16,
    /// Software version from `+XAPL`
    pub version: u32,
    /// Feature bitmask from `+XAPL`
    pub features: u32,
    /// Battery level 0-9 from `+IPHONEACCEV`
    pub battery: u8,
    /// Dock state from `+IPHONEACCEV`
    pub docked: u8,
}

/// RFCOMM transport payload
pub struct Rfcomm {
    sco: Mutex<Weak<Transport>>,
    accessory: Mutex<AccessoryInfo>,
}

impl Rfcomm {
    /// Pair this control channel with its SCO transport (control plane).
    pub fn set_sco(&self, sco: &Arc<Transport>) {
        *self.sco.lock().unwrap() = Arc::downgrade(sco);
    }

    /// The paired SCO transport, if still alive.
    #[must_use]
    pub fn sco(&self) -> Option<Arc<Transport>> {
        self.sco.lock().unwrap().upgrade()
    }

    /// Snapshot of the peer accessory information.
    #[must_use]
    pub fn accessory(&self) -> AccessoryInfo {
        *self.accessory.lock().unwrap()
    }

    /// Update the peer accessory information.
    pub fn update_accessory(&self, f: impl FnOnce(&mut AccessoryInfo)) {
        f(&mut self.accessory.lock().unwrap());
    }
}

/// SCO transport payload: speaker and microphone PCM endpoints plus the
/// negotiated voice codec
pub struct Sco {
    /// Speaker path endpoint (PCM read side)
    pub spk_pcm: Pcm,
    /// Microphone path endpoint (PCM write side)
    pub mic_pcm: Pcm,
    mic_gain: AtomicU8,
    spk_gain: AtomicU8,
    codec: AtomicU8,
    hf_features: AtomicU32,
    link: Mutex<Option<Box<dyn FnMut(bool) + Send>>>,
}

impl Sco {
    /// Negotiated SCO codec.
    #[must_use]
    pub fn codec(&self) -> ScoCodec {
        ScoCodec::from_u8(self.codec.load(Ordering::Relaxed))
    }

    /// Select the SCO codec (RFCOMM negotiation).
    pub fn set_codec(&self, codec: ScoCodec) {
        self.codec.store(codec as u8, Ordering::Relaxed);
    }

    /// Microphone gain as last reported or commanded.
    #[must_use]
    pub fn mic_gain(&self) -> u8 {
        self.mic_gain.load(Ordering::Relaxed)
    }

    /// Speaker gain as last reported or commanded.
    #[must_use]
    pub fn spk_gain(&self) -> u8 {
        self.spk_gain.load(Ordering::Relaxed)
    }

    /// Set the microphone gain.
    pub fn set_mic_gain(&self, gain: u8) {
        self.mic_gain.store(gain.min(15), Ordering::Relaxed);
    }

    /// Set the speaker gain.
    pub fn set_spk_gain(&self, gain: u8) {
        self.spk_gain.store(gain.min(15), Ordering::Relaxed);
    }

    /// HF feature bitmask captured during `+BRSF`.
    #[must_use]
    pub fn hf_features(&self) -> u32 {
        self.hf_features.load(Ordering::Relaxed)
    }

    /// Store the HF feature bitmask.
    pub fn set_hf_features(&self, features: u32) {
        self.hf_features.store(features, Ordering::Relaxed);
    }

    /// Install the hook toggling the radio SCO link (control plane).
    pub fn set_link_hook(&self, hook: Box<dyn FnMut(bool) + Send>) {
        *self.link.lock().unwrap() = Some(hook);
    }

    /// Request the SCO link up or down, freeing radio bandwidth while no
    /// audio is flowing.
    pub fn request_link(&self, wanted: bool) {
        if let Some(hook) = self.link.lock().unwrap().as_mut() {
            hook(wanted);
        }
    }
}

/// Profile-specific transport payload
pub enum ProfileData {
    /// A2DP stream endpoint
    A2dp(A2dp),
    /// HFP/HSP control channel
    Rfcomm(Rfcomm),
    /// HFP/HSP voice channel
    Sco(Sco),
}

/// Per-connection context shared between the control plane and one worker
pub struct Transport {
    profile: Profile,
    codec: u8,
    codec_config: Vec<u8>,
    config: Arc<Config>,
    state: AtomicU8,
    mtu_read: AtomicUsize,
    mtu_write: AtomicUsize,
    event: Notify,
    bt_closed: AtomicBool,
    release: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    data: ProfileData,
}

impl Transport {
    /// Create an A2DP transport.
    #[must_use]
    pub fn a2dp(
        profile: Profile,
        codec: u8,
        codec_config: Vec<u8>,
        config: Arc<Config>,
        pcm: Pcm,
    ) -> Arc<Self> {
        Arc::new(Self {
            profile,
            codec,
            codec_config,
            config,
            state: AtomicU8::new(TransportState::Idle as u8),
            mtu_read: AtomicUsize::new(0),
            mtu_write: AtomicUsize::new(0),
            event: Notify::new(),
            bt_closed: AtomicBool::new(false),
            release: Mutex::new(None),
            data: ProfileData::A2dp(A2dp {
                pcm,
                ch1_volume: AtomicU8::new(127),
                ch2_volume: AtomicU8::new(127),
                ch1_muted: AtomicBool::new(false),
                ch2_muted: AtomicBool::new(false),
            }),
        })
    }

    /// Create an HFP/HSP RFCOMM control transport.
    #[must_use]
    pub fn rfcomm(profile: Profile, config: Arc<Config>) -> Arc<Self> {
        Arc::new(Self {
            profile,
            codec: 0,
            codec_config: Vec::new(),
            config,
            state: AtomicU8::new(TransportState::Idle as u8),
            mtu_read: AtomicUsize::new(0),
            mtu_write: AtomicUsize::new(0),
            event: Notify::new(),
            bt_closed: AtomicBool::new(false),
            release: Mutex::new(None),
            data: ProfileData::Rfcomm(Rfcomm {
                sco: Mutex::new(Weak::new()),
                accessory: Mutex::new(AccessoryInfo::default()),
            }),
        })
    }

    /// Create an HFP/HSP SCO voice transport.
    #[must_use]
    pub fn sco(profile: Profile, config: Arc<Config>, spk_pcm: Pcm, mic_pcm: Pcm) -> Arc<Self> {
        Arc::new(Self {
            profile,
            codec: ScoCodec::Cvsd as u8,
            codec_config: Vec::new(),
            config,
            state: AtomicU8::new(TransportState::Idle as u8),
            mtu_read: AtomicUsize::new(0),
            mtu_write: AtomicUsize::new(0),
            event: Notify::new(),
            bt_closed: AtomicBool::new(false),
            release: Mutex::new(None),
            data: ProfileData::Sco(Sco {
                spk_pcm,
                mic_pcm,
                mic_gain: AtomicU8::new(15),
                spk_gain: AtomicU8::new(15),
                codec: AtomicU8::new(ScoCodec::Cvsd as u8),
                hf_features: AtomicU32::new(0),
                link: Mutex::new(None),
            }),
        })
    }

    /// The profile this transport serves.
    #[must_use]
    pub fn profile(&self) -> Profile {
        self.profile
    }

    /// A2DP codec identifier negotiated for this transport.
    #[must_use]
    pub fn codec(&self) -> u8 {
        self.codec
    }

    /// The negotiated codec configuration blob.
    #[must_use]
    pub fn codec_config(&self) -> &[u8] {
        &self.codec_config
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current transport state.
    #[must_use]
    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Relaxed))
    }

    /// Change the transport state and wake the worker.
    pub fn set_state(&self, state: TransportState) {
        self.state.store(state as u8, Ordering::Relaxed);
        self.event.notify_one();
    }

    /// Reading MTU of the Bluetooth link.
    #[must_use]
    pub fn mtu_read(&self) -> usize {
        self.mtu_read.load(Ordering::Relaxed)
    }

    /// Writing MTU of the Bluetooth link.
    #[must_use]
    pub fn mtu_write(&self) -> usize {
        self.mtu_write.load(Ordering::Relaxed)
    }

    /// Set both MTU values; also used by the SCO worker when it detects
    /// the usable MTU from the first CVSD packet.
    pub fn set_mtu(&self, read: usize, write: usize) {
        self.mtu_read.store(read, Ordering::Relaxed);
        self.mtu_write.store(write, Ordering::Relaxed);
    }

    /// Wake the worker so it rereads the adjustable fields.
    pub fn signal(&self) {
        self.event.notify_one();
    }

    /// Await the next control-plane event.
    pub async fn event(&self) {
        self.event.notified().await;
    }

    /// Record that the peer stack already closed the Bluetooth socket, so
    /// the release callback must not ask the daemon to close it again.
    pub fn mark_bt_closed(&self) {
        self.bt_closed.store(true, Ordering::Relaxed);
    }

    /// Whether the Bluetooth socket was observed closed by the peer.
    #[must_use]
    pub fn bt_closed(&self) -> bool {
        self.bt_closed.load(Ordering::Relaxed)
    }

    /// Install the release callback fired exactly once when the worker
    /// terminates.
    pub fn on_release(&self, callback: Box<dyn FnOnce() + Send>) {
        *self.release.lock().unwrap() = Some(callback);
    }

    /// Fire the release callback; later calls are no-ops.
    pub fn release(&self) {
        if let Some(callback) = self.release.lock().unwrap().take() {
            callback();
        }
        tracing::debug!("Exiting IO worker");
    }

    /// A2DP payload accessor.
    ///
    /// # Errors
    ///
    /// [`EngineError::ProfileMismatch`] when the transport is not A2DP.
    pub fn a2dp_data(&self) -> Result<&A2dp> {
        match &self.data {
            ProfileData::A2dp(a2dp) => Ok(a2dp),
            _ => Err(EngineError::ProfileMismatch { expected: "A2DP" }),
        }
    }

    /// RFCOMM payload accessor.
    ///
    /// # Errors
    ///
    /// [`EngineError::ProfileMismatch`] when the transport is not RFCOMM.
    pub fn rfcomm_data(&self) -> Result<&Rfcomm> {
        match &self.data {
            ProfileData::Rfcomm(rfcomm) => Ok(rfcomm),
            _ => Err(EngineError::ProfileMismatch { expected: "RFCOMM" }),
        }
    }

    /// SCO payload accessor.
    ///
    /// # Errors
    ///
    /// [`EngineError::ProfileMismatch`] when the transport is not SCO.
    pub fn sco_data(&self) -> Result<&Sco> {
        match &self.data {
            ProfileData::Sco(sco) => Ok(sco),
            _ => Err(EngineError::ProfileMismatch { expected: "SCO" }),
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("profile", &self.profile)
            .field("codec", &self.codec)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Fires the transport release callback when dropped, covering every
/// worker exit path including cancellation at an await point.
pub(crate) struct ReleaseGuard<'a>(pub &'a Transport);

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}
