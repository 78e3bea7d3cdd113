use frame_pacer_common::config::InterpolationConfig;
use frame_pacer_common::frame::Frame;
use tracing::{debug, info, warn};

use crate::services::interpolator::SidecarInterpolator;
use crate::services::traits::InterpolationModel;

/// Produces the in-between frame for a pair of consecutive enhanced frames.
///
/// Which variant is in use is fixed at construction. Both honour the same
/// contract: a frame of the same layout as the inputs, or `None` when the
/// inputs cannot be interpolated. Model failures never escape; they are
/// replaced by a linear blend.
pub enum InterpolationStage {
    ModelBacked(Box<dyn InterpolationModel>),
    BlendFallback,
}

impl InterpolationStage {
    /// Start the configured model. A missing or unstartable model yields
    /// [`InterpolationStage::BlendFallback`].
    pub fn from_config(config: &InterpolationConfig) -> Self {
        let Some(argv) = &config.command else {
            info!("no interpolation model configured, using linear blend");
            return Self::BlendFallback;
        };
        match SidecarInterpolator::spawn(argv) {
            Ok(model) => {
                info!(model = model.name(), "interpolation model ready");
                Self::ModelBacked(Box::new(model))
            }
            Err(e) => {
                warn!(error = %e, "interpolation model failed to start, using linear blend");
                Self::BlendFallback
            }
        }
    }

    pub fn with_model(model: impl InterpolationModel + 'static) -> Self {
        Self::ModelBacked(Box::new(model))
    }

    /// Frame at `timestep` between `a` and `b`.
    ///
    /// Returns `None` without error when either input is absent or their
    /// layouts differ.
    pub fn interpolate(
        &mut self,
        a: Option<&Frame>,
        b: Option<&Frame>,
        timestep: f64,
    ) -> Option<Frame> {
        let (a, b) = (a?, b?);
        if !a.same_layout(b) {
            debug!(a = ?a.shape(), b = ?b.shape(), "layouts differ, skipping interpolation");
            return None;
        }

        let model = match self {
            Self::ModelBacked(model) => model,
            Self::BlendFallback => return blend(a, b, timestep),
        };

        match model.infer(a, b, timestep) {
            Ok(frame) if frame.same_layout(a) => Some(frame),
            Ok(frame) => {
                warn!(
                    model = model.name(),
                    expected = ?a.shape(),
                    got = ?frame.shape(),
                    "interpolation model returned wrong layout, using linear blend"
                );
                blend(a, b, timestep)
            }
            Err(e) => {
                warn!(model = model.name(), error = %e, "interpolation failed, using linear blend");
                blend(a, b, timestep)
            }
        }
    }
}

/// Per-channel weighted blend: `(1 - t) * a + t * b`, rounded and saturated
/// to 8 bits. `t` is clamped to [0, 1]; NaN is treated as the midpoint.
/// Returns `None` when the layouts differ.
pub fn blend(a: &Frame, b: &Frame, timestep: f64) -> Option<Frame> {
    if !a.same_layout(b) {
        return None;
    }
    let t = if timestep.is_nan() {
        0.5
    } else {
        timestep.clamp(0.0, 1.0)
    };
    let data = a
        .data()
        .iter()
        .zip(b.data())
        .map(|(&x, &y)| ((1.0 - t) * x as f64 + t * y as f64).round().clamp(0.0, 255.0) as u8)
        .collect();
    Frame::new(a.width(), a.height(), a.channels(), data).ok()
}
