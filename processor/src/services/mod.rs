pub mod detector;
pub mod enhance;
pub mod interpolator;
pub mod sidecar;
pub mod traits;
