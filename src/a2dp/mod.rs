//! A2DP stream workers and codec configuration

#[cfg(feature = "aac")]
pub mod aac;
pub mod caps;
pub mod sbc;

pub use caps::{CODEC_AAC, CODEC_SBC};
