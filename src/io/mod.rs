//! Shared worker plumbing: rate pacing and PCM signal scaling

pub mod scale;
pub mod sync;

pub use scale::{scale_s16le, volume_to_scale};
pub use sync::IoSync;
