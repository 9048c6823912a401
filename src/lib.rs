//! # bluealsa
//!
//! A Bluetooth audio I/O engine bridging local PCM pipes and Bluetooth
//! transport sockets.
//!
//! ## Features
//!
//! - A2DP sink and source over SBC, and over MPEG-4 AAC with the `aac`
//!   feature
//! - HFP/HSP audio gateway: AT command handling over RFCOMM, voice over
//!   SCO as transparent CVSD or H2-framed mSBC
//! - RTP packetization with constant-bit-rate pacing against the audio
//!   clock
//! - A native SBC/mSBC codec
//!
//! The control plane (D-Bus surface, BlueZ registration, configuration
//! loading) lives outside this crate: it creates a [`Transport`] per
//! Bluetooth connection, hands the socket to the matching worker and
//! pokes the transport event signal whenever it mutates shared fields.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bluealsa::{a2dp, Config, Pcm, Profile, Transport};
//!
//! # async fn example(socket: tokio::net::UnixStream) -> bluealsa::Result<()> {
//! let config = Arc::new(Config::default());
//! let pcm = Pcm::with_path("/var/run/bluealsa/hci0-dev-a2dp");
//!
//! // negotiated over AVDTP: 44.1 kHz joint stereo, bitpool 53
//! let transport = Transport::a2dp(
//!     Profile::A2dpSource,
//!     a2dp::CODEC_SBC,
//!     vec![0x21, 0x15, 2, 53],
//!     config,
//!     pcm,
//! );
//! transport.set_mtu(672, 672);
//!
//! a2dp::sbc::run_source(transport, socket).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]

pub mod a2dp;
/// Runtime configuration
pub mod config;
/// Error types
pub mod error;
pub mod hfp;
pub mod io;
pub mod pcm;
pub mod rtp;
pub mod sbc;
pub mod sco;
pub mod transport;

pub use config::Config;
pub use error::{EngineError, Result};
pub use pcm::{Pcm, PcmStream};
pub use transport::{Profile, ScoCodec, Transport, TransportState};
