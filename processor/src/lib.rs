//! Frame enhancement, scoring, interpolation and paced playback.
//!
//! The binary reads a whole input through a [`pipeline::state::ProcessingStage`]
//! and then hands the buffered result to a
//! [`pipeline::playback::PlaybackScheduler`].

pub mod pipeline;
pub mod services;
pub mod source;
