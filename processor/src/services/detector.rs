use frame_pacer_common::config::DetectionConfig;
use frame_pacer_common::frame::Frame;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::sidecar::{SidecarError, SidecarProcess, WireFrame};
use super::traits::{BatchDetector, DetectError};

/// Detector that never finds anything. With it the score only decays.
pub struct NullDetector;

impl BatchDetector for NullDetector {
    fn detect(&mut self, frames: &[Frame]) -> Result<Vec<Vec<f64>>, DetectError> {
        Ok(vec![Vec::new(); frames.len()])
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Object detector hosted in a sidecar process.
///
/// Request:  {"op":"detect","min_confidence":0.1,"frames":[<WireFrame>, ...]}
/// Response: {"scores":[[0.91, 0.40], [], ...]}   one list per frame
pub struct SidecarDetector {
    process: SidecarProcess,
    min_confidence: f64,
}

#[derive(Serialize)]
struct DetectRequest {
    op: &'static str,
    min_confidence: f64,
    frames: Vec<WireFrame>,
}

#[derive(Deserialize)]
struct DetectResponse {
    scores: Vec<Vec<f64>>,
}

impl SidecarDetector {
    pub fn spawn(argv: &[String], min_confidence: f64) -> Result<Self, SidecarError> {
        Ok(Self {
            process: SidecarProcess::spawn(argv)?,
            min_confidence,
        })
    }
}

impl BatchDetector for SidecarDetector {
    fn detect(&mut self, frames: &[Frame]) -> Result<Vec<Vec<f64>>, DetectError> {
        let request = DetectRequest {
            op: "detect",
            min_confidence: self.min_confidence,
            frames: frames.iter().map(WireFrame::from_frame).collect(),
        };
        let response: DetectResponse = self.process.call(&request)?;
        if response.scores.len() != frames.len() {
            return Err(DetectError::ResultCount {
                got: response.scores.len(),
                expected: frames.len(),
            });
        }
        Ok(response
            .scores
            .into_iter()
            .map(|set| filter_scores(set, self.min_confidence))
            .collect())
    }

    fn name(&self) -> &str {
        self.process.name()
    }
}

/// Drop non-finite scores and scores under `min_confidence`; clamp the rest
/// into [0, 1].
pub fn filter_scores(scores: Vec<f64>, min_confidence: f64) -> Vec<f64> {
    scores
        .into_iter()
        .filter(|s| s.is_finite() && *s >= min_confidence)
        .map(|s| s.clamp(0.0, 1.0))
        .collect()
}

/// Start the configured detector, or fall back to [`NullDetector`].
pub fn from_config(config: &DetectionConfig) -> Box<dyn BatchDetector> {
    let Some(argv) = &config.command else {
        info!("no detector configured, confidence score will only decay");
        return Box::new(NullDetector);
    };
    match SidecarDetector::spawn(argv, config.min_confidence) {
        Ok(detector) => {
            info!(
                detector = detector.name(),
                min_confidence = config.min_confidence,
                "detector sidecar ready"
            );
            Box::new(detector)
        }
        Err(e) => {
            warn!(error = %e, "detector sidecar failed to start, continuing without detection");
            Box::new(NullDetector)
        }
    }
}
