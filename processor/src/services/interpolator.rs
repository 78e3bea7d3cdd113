use frame_pacer_common::frame::Frame;
use serde::{Deserialize, Serialize};

use super::sidecar::{SidecarError, SidecarProcess, WireFrame};
use super::traits::{InterpolationModel, ModelError};

/// Frame interpolation model (RIFE or similar) hosted in a sidecar process.
///
/// Request:  {"op":"interpolate","timestep":0.5,"a":<WireFrame>,"b":<WireFrame>}
/// Response: {"frame":<WireFrame>}
pub struct SidecarInterpolator {
    process: SidecarProcess,
}

#[derive(Serialize)]
struct InterpolateRequest {
    op: &'static str,
    timestep: f64,
    a: WireFrame,
    b: WireFrame,
}

#[derive(Deserialize)]
struct InterpolateResponse {
    frame: WireFrame,
}

impl SidecarInterpolator {
    pub fn spawn(argv: &[String]) -> Result<Self, SidecarError> {
        Ok(Self {
            process: SidecarProcess::spawn(argv)?,
        })
    }
}

impl InterpolationModel for SidecarInterpolator {
    fn infer(&mut self, a: &Frame, b: &Frame, timestep: f64) -> Result<Frame, ModelError> {
        let request = InterpolateRequest {
            op: "interpolate",
            timestep,
            a: WireFrame::from_frame(a),
            b: WireFrame::from_frame(b),
        };
        let response: InterpolateResponse = self.process.call(&request)?;
        Ok(response.frame.into_frame()?)
    }

    fn name(&self) -> &str {
        self.process.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::sidecar::scripted_sidecar;

    #[test]
    fn decodes_model_frame() {
        // 1x1 RGB pixel (1, 2, 3) is "AQID" in base64.
        let body = concat!(
            r#"\"frame\":{\"width\":1,\"height\":1,"#,
            r#"\"channels\":3,\"data\":\"AQID\"}"#,
        );
        let argv = scripted_sidecar("", body);
        let mut model = SidecarInterpolator::spawn(&argv).unwrap();

        let a = Frame::filled(1, 1, 3, 0).unwrap();
        let b = Frame::filled(1, 1, 3, 9).unwrap();
        let out = model.infer(&a, &b, 0.5).unwrap();
        assert_eq!(out.data(), &[1, 2, 3]);
    }

    #[test]
    fn remote_failure_is_a_model_error() {
        let argv = scripted_sidecar("", r#"\"error\":\"cuda out of memory\""#);
        let mut model = SidecarInterpolator::spawn(&argv).unwrap();

        let frame = Frame::filled(1, 1, 3, 0).unwrap();
        assert!(matches!(
            model.infer(&frame, &frame, 0.5),
            Err(ModelError::Sidecar(SidecarError::Remote(_)))
        ));
    }
}
