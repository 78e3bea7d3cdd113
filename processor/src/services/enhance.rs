use frame_pacer_common::config::EnhanceConfig;
use frame_pacer_common::frame::Frame;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::sidecar::{SidecarError, SidecarProcess, WireFrame};
use super::traits::{EnhanceError, FrameEnhancer};

/// Upscales by an integer factor with a bicubic (Catmull-Rom) resampling
/// filter. This is the stand-in enhancer when no super-resolution model is
/// wired in.
pub struct ResizeEnhancer {
    scale: u32,
    filter: FilterType,
}

impl ResizeEnhancer {
    pub fn new(scale: u32) -> Self {
        Self {
            scale: scale.max(1),
            filter: FilterType::CatmullRom,
        }
    }

    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }
}

impl FrameEnhancer for ResizeEnhancer {
    fn enhance(&mut self, frame: &Frame) -> Result<Frame, EnhanceError> {
        let (width, height) = (frame.width(), frame.height());
        if width == 0 || height == 0 {
            return Err(EnhanceError::EmptyFrame { width, height });
        }
        if self.scale == 1 {
            return Ok(frame.clone());
        }

        let too_large = EnhanceError::TooLarge {
            width,
            height,
            scale: self.scale,
        };
        let (Some(out_w), Some(out_h)) =
            (width.checked_mul(self.scale), height.checked_mul(self.scale))
        else {
            return Err(too_large);
        };

        let upscaled = frame.to_image()?.resize_exact(out_w, out_h, self.filter);
        debug!(width, height, out_w, out_h, "frame upscaled");
        Ok(Frame::from_image(upscaled))
    }

    fn name(&self) -> &str {
        "resize"
    }
}

/// Super-resolution model (EDSR or similar) hosted in a sidecar process.
///
/// Request:  {"op":"enhance","scale":2,"frame":<WireFrame>}
/// Response: {"frame":<WireFrame>}
pub struct SidecarEnhancer {
    process: SidecarProcess,
    scale: u32,
}

#[derive(Serialize)]
struct EnhanceRequest {
    op: &'static str,
    scale: u32,
    frame: WireFrame,
}

#[derive(Deserialize)]
struct EnhanceResponse {
    frame: WireFrame,
}

impl SidecarEnhancer {
    pub fn spawn(argv: &[String], scale: u32) -> Result<Self, SidecarError> {
        Ok(Self {
            process: SidecarProcess::spawn(argv)?,
            scale,
        })
    }
}

impl FrameEnhancer for SidecarEnhancer {
    fn enhance(&mut self, frame: &Frame) -> Result<Frame, EnhanceError> {
        let request = EnhanceRequest {
            op: "enhance",
            scale: self.scale,
            frame: WireFrame::from_frame(frame),
        };
        let response: EnhanceResponse = self.process.call(&request)?;
        Ok(response.frame.into_frame()?)
    }

    fn name(&self) -> &str {
        self.process.name()
    }
}

/// Start the configured enhancer. Unlike detection and interpolation there is
/// no fallback: a configured model that cannot start is a setup error.
pub fn from_config(config: &EnhanceConfig) -> Result<Box<dyn FrameEnhancer>, SidecarError> {
    let Some(argv) = &config.command else {
        info!(scale = config.scale, "no enhancement model configured, resampling");
        return Ok(Box::new(ResizeEnhancer::new(config.scale)));
    };
    let enhancer = SidecarEnhancer::spawn(argv, config.scale)?;
    info!(enhancer = enhancer.name(), scale = config.scale, "enhancement sidecar ready");
    Ok(Box::new(enhancer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::sidecar::scripted_sidecar;

    #[test]
    fn doubles_resolution() {
        let mut enhancer = ResizeEnhancer::new(2);
        let frame = Frame::filled(8, 6, 3, 120).unwrap();
        let out = enhancer.enhance(&frame).unwrap();
        assert_eq!(out.shape(), (16, 12, 3));
    }

    #[test]
    fn flat_frame_stays_flat() {
        let mut enhancer = ResizeEnhancer::new(2);
        let frame = Frame::filled(4, 4, 3, 77).unwrap();
        let out = enhancer.enhance(&frame).unwrap();
        assert!(out.data().iter().all(|&v| v == 77));
    }

    #[test]
    fn keeps_grayscale_layout() {
        let mut enhancer = ResizeEnhancer::new(3);
        let frame = Frame::filled(2, 2, 1, 0).unwrap();
        assert_eq!(enhancer.enhance(&frame).unwrap().shape(), (6, 6, 1));
    }

    #[test]
    fn empty_frame_is_an_error() {
        let mut enhancer = ResizeEnhancer::new(2);
        let frame = Frame::new(0, 4, 3, Vec::new()).unwrap();
        assert!(matches!(
            enhancer.enhance(&frame),
            Err(EnhanceError::EmptyFrame { width: 0, height: 4 })
        ));
    }

    #[test]
    fn scale_one_is_a_copy() {
        let mut enhancer = ResizeEnhancer::new(1);
        let frame = Frame::new(1, 1, 3, vec![1, 2, 3]).unwrap();
        assert_eq!(enhancer.enhance(&frame).unwrap(), frame);
    }

    #[test]
    fn sidecar_frame_is_returned() {
        let body = concat!(
            r#"\"frame\":{\"width\":2,\"height\":2,"#,
            r#"\"channels\":1,\"data\":\"AQIDBA==\"}"#,
        );
        let mut enhancer = SidecarEnhancer::spawn(&scripted_sidecar("", body), 2).unwrap();
        let out = enhancer.enhance(&Frame::filled(1, 1, 1, 0).unwrap()).unwrap();
        assert_eq!(out.shape(), (2, 2, 1));
        assert_eq!(out.data(), &[1, 2, 3, 4]);
    }

    #[test]
    fn sidecar_failure_is_an_enhance_error() {
        let argv = scripted_sidecar("", r#"\"error\":\"model missing\""#);
        let mut enhancer = SidecarEnhancer::spawn(&argv, 2).unwrap();
        assert!(matches!(
            enhancer.enhance(&Frame::filled(1, 1, 3, 0).unwrap()),
            Err(EnhanceError::Sidecar(SidecarError::Remote(_)))
        ));
    }

    #[test]
    fn unstartable_model_is_a_setup_error() {
        let config = EnhanceConfig {
            command: Some(vec!["/nonexistent/edsr-sidecar".into()]),
            ..EnhanceConfig::default()
        };
        assert!(matches!(from_config(&config), Err(SidecarError::Spawn(..))));
    }

    #[test]
    fn resampling_without_a_model() {
        let enhancer = from_config(&EnhanceConfig::default()).unwrap();
        assert_eq!(enhancer.name(), "resize");
    }
}
