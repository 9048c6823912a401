//! Runtime configuration injected by the host

/// Engine-wide configuration.
///
/// The host process loads this once at startup; workers treat it as
/// read-only for their whole lifetime.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pass A2DP volume through unchanged instead of scaling PCM locally
    pub a2dp_volume: bool,
    /// AAC encoder VBR mode (1-5) used when the peer configuration
    /// enables VBR; 0 selects CBR
    pub aac_vbr_mode: u8,
    /// Enable the AAC encoder afterburner (higher quality, more CPU)
    pub aac_afterburner: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            a2dp_volume: false,
            aac_vbr_mode: 0,
            aac_afterburner: false,
        }
    }
}
