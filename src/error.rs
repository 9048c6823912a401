use std::io;
use thiserror::Error;

/// Errors produced by the transport I/O engine
#[derive(Debug, Error)]
pub enum EngineError {
    // ===== Transport validation =====
    /// Transport handed over without a usable Bluetooth socket
    #[error("invalid BT socket")]
    InvalidBtSocket,

    /// Transport handed over with an unusable MTU
    #[error("invalid {direction} MTU: {value}")]
    InvalidMtu {
        /// Which direction the MTU applies to ("reading" or "writing")
        direction: &'static str,
        /// The rejected value
        value: usize,
    },

    /// Worker started on a transport of the wrong profile variant
    #[error("transport profile mismatch: expected {expected}")]
    ProfileMismatch {
        /// The profile variant the worker requires
        expected: &'static str,
    },

    // ===== PCM endpoint =====
    /// PCM endpoint has no pipe path configured
    #[error("PCM endpoint not requested")]
    PcmNotRequested,

    /// PCM pipe could not be opened
    #[error("PCM open failed: {source}")]
    PcmOpen {
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    // ===== Codec =====
    /// SBC codec error
    #[error("SBC codec error: {0}")]
    Sbc(#[from] crate::sbc::SbcError),

    /// AAC codec error
    #[cfg(feature = "aac")]
    #[error("AAC codec error: {message}")]
    Aac {
        /// Description of the failure
        message: String,
    },

    /// Codec configuration blob could not be interpreted
    #[error("unsupported codec configuration: {message}")]
    UnsupportedConfiguration {
        /// Description of the mismatch
        message: String,
    },

    // ===== Wire protocol =====
    /// RTP packet could not be decoded
    #[error("RTP error: {0}")]
    Rtp(#[from] crate::rtp::RtpError),

    // ===== I/O =====
    /// Socket or pipe I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl EngineError {
    /// Check whether this error means the remote end went away.
    ///
    /// Workers exit cleanly on disconnection instead of surfacing it as a
    /// failure; everything else is reported.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
