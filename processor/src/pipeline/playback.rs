use std::time::Duration;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::emitter::Emitter;
use super::{OutputBuffer, PipelineError};

/// Counts from one playback pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackSummary {
    pub emitted: u64,
    pub failed: u64,
}

/// Emits a finished buffer at a fixed rate.
///
/// Pacing is open loop: each frame gets `1 / target_fps`, minus the time its
/// own emission took. A frame that overruns its slot is followed immediately
/// by the next one, and the lost time is not made up.
#[derive(Debug, Clone)]
pub struct PlaybackScheduler {
    target_fps: f64,
    frame_interval: Duration,
}

impl PlaybackScheduler {
    pub fn new(target_fps: f64) -> Self {
        let frame_interval =
            Duration::try_from_secs_f64(1.0 / target_fps).unwrap_or(Duration::ZERO);
        Self {
            target_fps,
            frame_interval,
        }
    }

    pub fn target_fps(&self) -> f64 {
        self.target_fps
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    /// Time left in the current frame slot after spending `elapsed` on it.
    fn remaining(&self, elapsed: Duration) -> Option<Duration> {
        self.frame_interval
            .checked_sub(elapsed)
            .filter(|wait| !wait.is_zero())
    }

    /// Emit every buffered frame in order with 1-based indices.
    ///
    /// A failed emission is logged and skipped. Cancellation is checked
    /// before each frame.
    pub async fn play<E: Emitter + ?Sized>(
        &self,
        buffer: OutputBuffer,
        emitter: &mut E,
        cancel: &CancellationToken,
    ) -> Result<PlaybackSummary, PipelineError> {
        let total = buffer.len() as u64;
        let mut summary = PlaybackSummary::default();
        info!(
            total,
            target_fps = self.target_fps,
            interval_ms = self.frame_interval.as_secs_f64() * 1000.0,
            "starting playback"
        );

        for (i, entry) in buffer.into_iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(emitted = summary.emitted, total, "playback cancelled");
                return Err(PipelineError::Cancelled);
            }
            let index = i as u64 + 1;

            let started = Instant::now();
            match emitter.emit(&entry.frame, entry.score, index, total) {
                Ok(()) => summary.emitted += 1,
                Err(e) => {
                    warn!(index, total, error = %e, "failed to emit frame, skipping");
                    summary.failed += 1;
                }
            }
            let elapsed = started.elapsed();

            match self.remaining(elapsed) {
                Some(wait) => sleep(wait).await,
                None => debug!(
                    index,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "emission overran frame interval"
                ),
            }
        }

        info!(
            emitted = summary.emitted,
            failed = summary.failed,
            "playback complete"
        );
        Ok(summary)
    }
}
