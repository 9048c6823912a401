//! Transfer pacing against the audio sampling clock

use std::time::Duration;

use tokio::time::Instant;

/// Paces data transfer at the nominal sampling rate.
///
/// Pacing relies on the frame counter being linear. The counter is
/// (re)anchored on transfer start and resume: with 32 bits it can track
/// about 24 hours of playback at 48 kHz before wrapping.
#[derive(Debug)]
pub struct IoSync {
    /// Reference time point, captured on the first frames after an anchor
    /// reset
    ts0: Option<Instant>,
    /// Frames transferred since `ts0`
    frames: u32,
    /// Sampling frequency in Hz
    sampling: u32,
}

impl IoSync {
    /// Create a pacer for the given sampling frequency.
    #[must_use]
    pub fn new(sampling: u32) -> Self {
        Self {
            ts0: None,
            frames: 0,
            sampling,
        }
    }

    /// Drop the time anchor so the next transfer re-anchors the clock.
    ///
    /// Called when an external event (PCM reopen, transport resume) makes
    /// the accumulated frame count meaningless.
    pub fn reset(&mut self) {
        self.ts0 = None;
        self.frames = 0;
    }

    /// Change the sampling frequency (SCO codec switches) and re-anchor.
    pub fn set_sampling(&mut self, sampling: u32) {
        self.sampling = sampling;
        self.reset();
    }

    /// Anchor the reference time point if not yet anchored.
    ///
    /// There might be no PCM data for a long time after a worker starts -
    /// until a client begins playback - so the zero point is taken after
    /// the stream has actually started, not at worker start.
    pub fn mark(&mut self) {
        if self.ts0.is_none() {
            self.ts0 = Some(Instant::now());
            self.frames = 0;
        }
    }

    /// Account for `frames` just transferred and sleep as needed to keep
    /// the transfer no more than 10 ms ahead of audio time.
    ///
    /// Returns the playback duration of `frames` in microseconds, used to
    /// advance the RTP timestamp of the next packet.
    pub async fn sync(&mut self, frames: u32) -> u32 {
        if frames == 0 {
            return 0;
        }

        let sampling = self.sampling;
        self.mark();

        // playback duration of this batch
        let sec = frames / sampling;
        let res = frames % sampling;
        let duration = 1_000_000 * sec + 1_000_000 / sampling * res;

        self.frames = self.frames.wrapping_add(frames);

        // keep the transfer 10 ms ahead
        let overframes = sampling / 100;
        let ahead = self.frames.saturating_sub(overframes);

        let audio = Duration::new(
            u64::from(ahead / sampling),
            1_000_000_000 / sampling * (ahead % sampling),
        );

        let elapsed = self
            .ts0
            .map_or(Duration::ZERO, |ts0| ts0.elapsed());

        if let Some(lag) = audio.checked_sub(elapsed) {
            tokio::time::sleep(lag).await;
        }

        duration
    }
}
