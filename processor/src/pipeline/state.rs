use frame_pacer_common::frame::Frame;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::services::traits::{BatchDetector, FrameEnhancer};
use crate::source::FrameSource;

use super::interpolation::InterpolationStage;
use super::score::{max_confidence, ScoreTracker};
use super::{OutputBuffer, PipelineError};

enum StageState {
    /// Frames are still arriving.
    Running {
        /// Last enhanced frame, waiting for its successor so the in-between
        /// frame can be synthesized before it is buffered.
        previous: Option<Frame>,
        /// Enhanced frames since the last detection call.
        pending_batch: Vec<Frame>,
        frames_read: u64,
    },
    /// The source is exhausted and the output buffer was handed over.
    Done,
}

/// Turns raw input frames into the complete output sequence.
///
/// Per frame: enhance, add to the detection batch, score the batch on every
/// `batch_size`-th frame, then buffer the previous frame followed by the
/// frame interpolated between it and the current one. The last frame is
/// buffered when the source runs out.
pub struct ProcessingStage {
    state: StageState,
    batch_size: u64,
    timestep: f64,
    enhancer: Box<dyn FrameEnhancer>,
    detector: Box<dyn BatchDetector>,
    interpolation: InterpolationStage,
    scores: ScoreTracker,
    output: OutputBuffer,
}

impl ProcessingStage {
    pub fn new(
        batch_size: u64,
        timestep: f64,
        enhancer: Box<dyn FrameEnhancer>,
        detector: Box<dyn BatchDetector>,
        interpolation: InterpolationStage,
    ) -> Self {
        Self {
            state: StageState::Running {
                previous: None,
                pending_batch: Vec::new(),
                frames_read: 0,
            },
            batch_size: batch_size.max(1),
            timestep,
            enhancer,
            detector,
            interpolation,
            scores: ScoreTracker::new(),
            output: OutputBuffer::default(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, StageState::Done)
    }

    pub fn current_score(&self) -> f64 {
        self.scores.current()
    }

    /// Drain `source` and return the finished output buffer.
    ///
    /// Cancellation is checked before each frame is read.
    pub async fn run<S: FrameSource>(
        mut self,
        source: &mut S,
        cancel: &CancellationToken,
    ) -> Result<OutputBuffer, PipelineError> {
        info!(
            expected_frames = source.len_hint(),
            batch_size = self.batch_size,
            enhancer = self.enhancer.name(),
            detector = self.detector.name(),
            "processing frames"
        );
        loop {
            if cancel.is_cancelled() {
                warn!(buffered = self.output.len(), "processing cancelled");
                return Err(PipelineError::Cancelled);
            }
            let Some(raw) = source.next_frame().await? else {
                break;
            };
            self.process_frame(raw)?;
        }
        self.finish()
    }

    /// Run one raw frame through the stage.
    pub fn process_frame(&mut self, raw: Frame) -> Result<(), PipelineError> {
        let StageState::Running {
            previous,
            pending_batch,
            frames_read,
        } = &mut self.state
        else {
            return Err(PipelineError::Finished);
        };

        *frames_read += 1;
        let frame_no = *frames_read;

        let started = Instant::now();
        let enhanced = self
            .enhancer
            .enhance(&raw)
            .map_err(|source| PipelineError::Enhance {
                frame: frame_no,
                source,
            })?;
        debug!(
            frame = frame_no,
            shape = ?enhanced.shape(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "enhanced"
        );

        pending_batch.push(enhanced.clone());

        if frame_no % self.batch_size == 0 && !pending_batch.is_empty() {
            let batch = std::mem::take(pending_batch);
            let max = detect_batch(self.detector.as_mut(), &batch);
            self.scores.on_batch_result(max);
            debug!(
                frame = frame_no,
                batch_len = batch.len(),
                max_confidence = max,
                score = self.scores.current(),
                "batch scored"
            );
        }

        if let Some(prev) = previous.take() {
            let started = Instant::now();
            let mid = self
                .interpolation
                .interpolate(Some(&prev), Some(&enhanced), self.timestep);
            debug!(
                frame = frame_no,
                interpolated = mid.is_some(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "interpolated"
            );

            let score = self.scores.current();
            self.output.push(prev, score);
            if let Some(mid) = mid {
                self.output.push(mid, score);
            }
        }

        *previous = Some(enhanced);
        Ok(())
    }

    /// Buffer the final frame and hand over the output. The stage is `Done`
    /// afterwards.
    pub fn finish(&mut self) -> Result<OutputBuffer, PipelineError> {
        let StageState::Running {
            previous,
            pending_batch,
            frames_read,
        } = std::mem::replace(&mut self.state, StageState::Done)
        else {
            return Err(PipelineError::Finished);
        };

        if !pending_batch.is_empty() {
            debug!(
                frames = pending_batch.len(),
                "trailing partial batch left unscored"
            );
        }
        if let Some(last) = previous {
            self.output.push(last, self.scores.current());
        }

        info!(
            frames_read,
            buffered = self.output.len(),
            score = self.scores.current(),
            "processing complete"
        );
        Ok(std::mem::take(&mut self.output))
    }
}

/// One detection call over the whole batch. Any failure counts as "nothing
/// detected".
fn detect_batch(detector: &mut dyn BatchDetector, batch: &[Frame]) -> Option<f64> {
    match detector.detect(batch) {
        Ok(results) if results.len() == batch.len() => max_confidence(&results),
        Ok(results) => {
            warn!(
                detector = detector.name(),
                got = results.len(),
                expected = batch.len(),
                "detector result count mismatch, treating batch as empty"
            );
            None
        }
        Err(e) => {
            warn!(
                detector = detector.name(),
                error = %e,
                batch_len = batch.len(),
                "detection failed, treating batch as empty"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{frame, ScriptedDetector, StubEnhancer};
    use crate::services::detector::NullDetector;
    use crate::services::enhance::ResizeEnhancer;
    use crate::services::traits::{InterpolationModel, ModelError};
    use crate::source::{MemorySource, SourceError};

    struct NeverModel;

    impl InterpolationModel for NeverModel {
        fn infer(&mut self, a: &Frame, _b: &Frame, _t: f64) -> Result<Frame, ModelError> {
            // Layout never matches, so the stage blends instead.
            Ok(Frame::filled(a.width() + 1, a.height(), a.channels(), 0)?)
        }
    }

    /// Interpolation that never produces a frame: consecutive inputs never
    /// share a layout.
    fn alternating_shapes(count: usize) -> Vec<Frame> {
        (0..count)
            .map(|i| Frame::filled(2 + (i % 2) as u32, 2, 3, i as u8).unwrap())
            .collect()
    }

    fn stage_with(detector: ScriptedDetector, batch_size: u64) -> ProcessingStage {
        ProcessingStage::new(
            batch_size,
            0.5,
            Box::new(StubEnhancer::identity()),
            Box::new(detector),
            InterpolationStage::BlendFallback,
        )
    }

    async fn process(stage: ProcessingStage, frames: Vec<Frame>) -> OutputBuffer {
        let mut source = MemorySource::from(frames);
        stage.run(&mut source, &CancellationToken::new()).await.unwrap()
    }

    #[test]
    fn scores_follow_detection_then_decay() {
        let detector =
            ScriptedDetector::new(vec![Ok(vec![vec![0.8]]), Ok(vec![vec![]]), Ok(vec![vec![]])]);
        let mut stage = stage_with(detector, 1);
        let mut trajectory = Vec::new();
        for raw in alternating_shapes(3) {
            stage.process_frame(raw).unwrap();
            trajectory.push(stage.current_score());
        }
        assert_eq!(trajectory, vec![80.0, 76.0, 72.2]);

        // A frame is buffered one iteration after it was read, after that
        // iteration's batch was scored. The last frame takes the final score.
        let buffer = stage.finish().unwrap();
        assert_eq!(buffer.scores(), vec![76.0, 72.2, 72.2]);
    }

    #[tokio::test]
    async fn no_interpolation_keeps_frame_count() {
        let stage = stage_with(ScriptedDetector::new(vec![]), 4);
        let buffer = process(stage, alternating_shapes(7)).await;
        assert_eq!(buffer.len(), 7);
        let firsts: Vec<u8> = buffer.iter().map(|e| e.frame.data()[0]).collect();
        assert_eq!(firsts, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn interpolation_doubles_minus_one() {
        let frames: Vec<Frame> = (0..6).map(|i| frame(i * 40)).collect();
        let buffer = process(stage_with(ScriptedDetector::new(vec![]), 20), frames).await;
        assert_eq!(buffer.len(), 2 * 6 - 1);
        let firsts: Vec<u8> = buffer.iter().map(|e| e.frame.data()[0]).collect();
        assert_eq!(firsts, vec![0, 20, 40, 60, 80, 100, 120, 140, 160, 180, 200]);
    }

    #[tokio::test]
    async fn single_frame_is_flushed_once() {
        let buffer = process(stage_with(ScriptedDetector::new(vec![]), 20), vec![frame(9)]).await;
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.get(0).unwrap().frame, frame(9));
    }

    #[tokio::test]
    async fn zero_frames_give_empty_buffer() {
        let buffer = process(stage_with(ScriptedDetector::new(vec![]), 1), Vec::new()).await;
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn interpolated_frame_shares_score_with_its_predecessor() {
        let detector = ScriptedDetector::new(vec![Ok(vec![vec![0.3]]), Ok(vec![vec![0.5]])]);
        let buffer = process(stage_with(detector, 1), vec![frame(0), frame(100), frame(200)]).await;
        // Frame 3's batch comes back empty and decays the score.
        assert_eq!(buffer.scores(), vec![50.0, 50.0, 47.5, 47.5, 47.5]);
    }

    #[test]
    fn buffered_scores_are_snapshots() {
        let detector = ScriptedDetector::new(vec![
            Ok(vec![vec![0.5]]),
            Ok(vec![vec![]]),
            Ok(vec![vec![0.9]]),
        ]);
        let mut stage = stage_with(detector, 1);
        stage.process_frame(frame(0)).unwrap();
        stage.process_frame(frame(100)).unwrap();
        let early = stage.output.scores();
        assert_eq!(early, vec![47.5, 47.5]);

        stage.process_frame(frame(200)).unwrap();
        assert_eq!(stage.current_score(), 90.0);
        let buffer = stage.finish().unwrap();
        assert_eq!(buffer.scores(), vec![47.5, 47.5, 90.0, 90.0, 90.0]);
    }

    #[tokio::test]
    async fn batches_fire_every_k_frames_and_tail_is_unscored() {
        let detector = ScriptedDetector::new(vec![Ok(vec![vec![], vec![0.6], vec![]])]);
        let mut stage = stage_with(detector, 3);
        for i in 0..5 {
            stage.process_frame(frame(i)).unwrap();
        }
        // Frames 4 and 5 form a partial batch that is never scored.
        assert_eq!(stage.current_score(), 60.0);
        let buffer = stage.finish().unwrap();
        assert_eq!(*buffer.scores().last().unwrap(), 60.0);
    }

    #[test]
    fn detector_sees_whole_batches() {
        let mut detector = ScriptedDetector::new(vec![]);
        let mut frames_seen = Vec::new();
        for i in 0..7 {
            let batch = vec![frame(i); (i % 3 + 1) as usize];
            frames_seen.push(batch.len());
            detect_batch(&mut detector, &batch);
        }
        assert_eq!(detector.batch_sizes, frames_seen);
    }

    #[test]
    fn detection_failure_decays() {
        let detector = ScriptedDetector::new(vec![Ok(vec![vec![0.4]]), Err(()), Ok(vec![])]);
        let mut stage = stage_with(detector, 1);
        stage.process_frame(frame(0)).unwrap();
        stage.process_frame(frame(1)).unwrap();
        assert_eq!(stage.current_score(), 38.0);
        // Wrong number of result sets is treated the same way.
        stage.process_frame(frame(2)).unwrap();
        assert_eq!(stage.current_score(), 38.0 * 0.95);
    }

    #[test]
    fn enhancement_failure_is_fatal_with_frame_number() {
        let mut stage = ProcessingStage::new(
            1,
            0.5,
            Box::new(StubEnhancer::failing_on(2)),
            Box::new(NullDetector),
            InterpolationStage::BlendFallback,
        );
        stage.process_frame(frame(0)).unwrap();
        let err = stage.process_frame(frame(1)).unwrap_err();
        assert!(matches!(err, PipelineError::Enhance { frame: 2, .. }));
    }

    #[test]
    fn finished_stage_rejects_frames() {
        let mut stage = stage_with(ScriptedDetector::new(vec![]), 1);
        stage.process_frame(frame(0)).unwrap();
        assert!(!stage.is_done());
        stage.finish().unwrap();
        assert!(stage.is_done());
        assert!(matches!(stage.process_frame(frame(1)), Err(PipelineError::Finished)));
        assert!(matches!(stage.finish(), Err(PipelineError::Finished)));
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_frame() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut source = MemorySource::from(vec![frame(0), frame(1)]);
        let stage = stage_with(ScriptedDetector::new(vec![]), 1);
        let result = stage.run(&mut source, &cancel).await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }

    /// Yields `frames`, cancelling `cancel` as frame `at` is handed out.
    struct CancellingSource {
        frames: MemorySource,
        cancel: CancellationToken,
        at: u64,
        read: u64,
    }

    impl FrameSource for CancellingSource {
        async fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
            self.read += 1;
            if self.read == self.at {
                self.cancel.cancel();
            }
            self.frames.next_frame().await
        }
    }

    #[tokio::test]
    async fn cancellation_mid_processing_stops_after_current_frame() {
        let cancel = CancellationToken::new();
        let mut source = CancellingSource {
            frames: MemorySource::from((0..5).map(frame).collect::<Vec<_>>()),
            cancel: cancel.clone(),
            at: 2,
            read: 0,
        };
        let detector = ScriptedDetector::new(vec![]);
        let result = stage_with(detector, 1).run(&mut source, &cancel).await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert_eq!(source.read, 2);
    }

    #[tokio::test]
    async fn enhanced_frames_are_buffered() {
        let stage = ProcessingStage::new(
            20,
            0.5,
            Box::new(ResizeEnhancer::new(2)),
            Box::new(NullDetector),
            InterpolationStage::with_model(NeverModel),
        );
        let buffer = process(stage, vec![frame(10), frame(30)]).await;
        assert_eq!(buffer.len(), 3);
        assert!(buffer.iter().all(|e| e.frame.shape() == (4, 4, 3)));
        assert_eq!(buffer.get(1).unwrap().frame, Frame::filled(4, 4, 3, 20).unwrap());
    }
}
