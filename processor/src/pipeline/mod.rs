pub mod emitter;
pub mod interpolation;
pub mod playback;
pub mod score;
pub mod state;

use frame_pacer_common::frame::Frame;
use tokio_util::sync::CancellationToken;

use crate::services::traits::EnhanceError;
use crate::source::{FrameSource, SourceError};

use self::emitter::Emitter;
use self::playback::{PlaybackScheduler, PlaybackSummary};
use self::state::ProcessingStage;

/// One output frame and the score that was current when it was buffered.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedEntry {
    pub frame: Frame,
    pub score: f64,
}

/// The complete output sequence, in emission order.
///
/// Only the processing stage appends. Once processing is done the buffer is
/// moved into playback and is read-only from then on.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    entries: Vec<BufferedEntry>,
}

impl OutputBuffer {
    pub(crate) fn push(&mut self, frame: Frame, score: f64) {
        self.entries.push(BufferedEntry { frame, score });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&BufferedEntry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BufferedEntry> {
        self.entries.iter()
    }

    /// Buffered scores in order.
    pub fn scores(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.score).collect()
    }
}

impl IntoIterator for OutputBuffer {
    type Item = BufferedEntry;
    type IntoIter = std::vec::IntoIter<BufferedEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("frame source failed: {0}")]
    Source(#[from] SourceError),
    #[error("enhancement failed on frame {frame}: {source}")]
    Enhance {
        frame: u64,
        #[source]
        source: EnhanceError,
    },
    #[error("processing stage already finished")]
    Finished,
    #[error("cancelled")]
    Cancelled,
}

/// Process the whole source, then play the result back.
///
/// Playback only starts once processing has completed without error, so a
/// fatal processing error never produces partial output.
pub async fn run<S, E>(
    stage: ProcessingStage,
    source: &mut S,
    scheduler: &PlaybackScheduler,
    emitter: &mut E,
    cancel: &CancellationToken,
) -> Result<PlaybackSummary, PipelineError>
where
    S: FrameSource,
    E: Emitter + ?Sized,
{
    let buffer = stage.run(source, cancel).await?;
    scheduler.play(buffer, emitter, cancel).await
}
