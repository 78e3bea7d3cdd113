use frame_pacer_common::frame::{Frame, FrameError};

use super::sidecar::SidecarError;

/// Raises the spatial resolution of one frame.
///
/// There is no fallback for a frame the enhancer cannot produce, so an error
/// here ends the run.
pub trait FrameEnhancer: Send {
    fn enhance(&mut self, frame: &Frame) -> Result<Frame, EnhanceError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Scores a batch of frames in one inference call.
///
/// Returns one score set per input frame, in input order. Each set holds zero
/// or more confidences in [0, 1]. Never called with an empty batch.
pub trait BatchDetector: Send {
    fn detect(&mut self, frames: &[Frame]) -> Result<Vec<Vec<f64>>, DetectError>;

    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Synthesizes the frame at `timestep` between `a` (0.0) and `b` (1.0).
pub trait InterpolationModel: Send {
    fn infer(&mut self, a: &Frame, b: &Frame, timestep: f64) -> Result<Frame, ModelError>;

    fn name(&self) -> &str {
        "unnamed"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnhanceError {
    #[error("cannot enhance a {width}x{height} frame")]
    EmptyFrame { width: u32, height: u32 },
    #[error("enhanced size overflows: {width}x{height} scaled by {scale}")]
    TooLarge { width: u32, height: u32, scale: u32 },
    #[error("enhancer produced an invalid frame: {0}")]
    Frame(#[from] FrameError),
    #[error("enhancement sidecar failed: {0}")]
    Sidecar(#[from] SidecarError),
}

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("detector sidecar failed: {0}")]
    Sidecar(#[from] SidecarError),
    #[error("detector returned {got} result sets for {expected} frames")]
    ResultCount { got: usize, expected: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("interpolation sidecar failed: {0}")]
    Sidecar(#[from] SidecarError),
    #[error("interpolation model returned an invalid frame: {0}")]
    Frame(#[from] FrameError),
}
