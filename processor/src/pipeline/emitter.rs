use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use frame_pacer_common::frame::{Frame, FrameError, Packet};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::io::Write;
use tracing::trace;

/// Hands one output frame across the process boundary.
///
/// Called synchronously by the playback scheduler, so its latency counts
/// against the per-frame budget. `index` is 1-based; `total` is the length of
/// the whole output sequence.
pub trait Emitter {
    fn emit(&mut self, frame: &Frame, score: f64, index: u64, total: u64) -> Result<(), EmitError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("failed to encode JPEG: {0}")]
    Encode(#[from] image::ImageError),
    #[error("failed to build packet: {0}")]
    Packet(#[from] FrameError),
    #[error("failed to write packet: {0}")]
    Write(#[from] std::io::Error),
}

/// Writes each frame as a `DATA_START:` JSON line carrying a base64 JPEG.
pub struct JsonLineEmitter<W: Write> {
    writer: W,
    fps: f64,
    quality: u8,
}

impl<W: Write> JsonLineEmitter<W> {
    pub fn new(writer: W, fps: f64, quality: u8) -> Self {
        Self {
            writer,
            fps,
            quality,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Emitter for JsonLineEmitter<W> {
    fn emit(&mut self, frame: &Frame, score: f64, index: u64, total: u64) -> Result<(), EmitError> {
        let jpeg = encode_jpeg(frame, self.quality)?;
        let packet = Packet::new(STANDARD.encode(&jpeg), score, self.fps, index, total);
        let line = packet.to_line()?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;
        trace!(index, total, jpeg_bytes = jpeg.len(), "packet written");
        Ok(())
    }
}

/// JPEG-encode a frame. Alpha is dropped since JPEG cannot carry it.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, EmitError> {
    let (w, h) = (frame.width(), frame.height());
    let mut out = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
        match frame.channels() {
            1 => encoder.encode(frame.data(), w, h, ExtendedColorType::L8)?,
            3 => encoder.encode(frame.data(), w, h, ExtendedColorType::Rgb8)?,
            _ => {
                let rgb = frame.to_image()?.to_rgb8();
                encoder.encode(rgb.as_raw(), w, h, ExtendedColorType::Rgb8)?
            }
        }
    }
    Ok(out)
}
