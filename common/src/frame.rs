use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};

/// An 8-bit interleaved pixel buffer.
///
/// Pixels are row-major, `channels` bytes per pixel, no row padding:
///   len(data) == width * height * channels
///
/// There are no mutable pixel accessors. Stages that need a different image
/// build a new `Frame`; `clone()` is a full copy of the pixel data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Result<Self, FrameError> {
        if !matches!(channels, 1 | 3 | 4) {
            return Err(FrameError::UnsupportedChannels(channels));
        }
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(FrameError::Layout {
                got: data.len(),
                expected,
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// A frame with every channel of every pixel set to `value`.
    pub fn filled(width: u32, height: u32, channels: u8, value: u8) -> Result<Self, FrameError> {
        let len = width as usize * height as usize * channels as usize;
        Self::new(width, height, channels, vec![value; len])
    }

    // -- Accessors --------------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// `(width, height, channels)`.
    pub fn shape(&self) -> (u32, u32, u8) {
        (self.width, self.height, self.channels)
    }

    /// Two frames can be blended or interpolated only when this holds.
    pub fn same_layout(&self, other: &Frame) -> bool {
        self.shape() == other.shape()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    // -- image crate interop ----------------------------------------------------

    pub fn to_image(&self) -> Result<DynamicImage, FrameError> {
        let (w, h) = (self.width, self.height);
        let data = self.data.clone();
        let image = match self.channels {
            1 => GrayImage::from_raw(w, h, data).map(DynamicImage::ImageLuma8),
            3 => RgbImage::from_raw(w, h, data).map(DynamicImage::ImageRgb8),
            4 => RgbaImage::from_raw(w, h, data).map(DynamicImage::ImageRgba8),
            other => return Err(FrameError::UnsupportedChannels(other)),
        };
        image.ok_or(FrameError::Layout {
            got: self.data.len(),
            expected: w as usize * h as usize * self.channels as usize,
        })
    }

    /// Grayscale, RGB and RGBA 8-bit images keep their layout; anything else
    /// (16-bit, float, gray+alpha) is converted to RGB8.
    pub fn from_image(image: DynamicImage) -> Self {
        let (width, height) = (image.width(), image.height());
        let (channels, data) = match image {
            DynamicImage::ImageLuma8(buf) => (1, buf.into_raw()),
            DynamicImage::ImageRgb8(buf) => (3, buf.into_raw()),
            DynamicImage::ImageRgba8(buf) => (4, buf.into_raw()),
            other => (3, other.to_rgb8().into_raw()),
        };
        Self {
            width,
            height,
            channels,
            data,
        }
    }
}

/// Prefix that marks a packet line on the output stream. Every other line is
/// diagnostics and is ignored by readers.
pub const PACKET_PREFIX: &str = "DATA_START:";

/// One emitted output frame.
///
/// Line format (one packet per line, compact JSON):
///   DATA_START:{"image":"<base64 jpeg>","score":76.0,"fps":48.0,"current":1,"total":9}
///
/// `current` is 1-based and `total` is the length of the whole output
/// sequence, which is why packets are only produced after processing ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub image: String,
    pub score: f64,
    pub fps: f64,
    pub current: u64,
    pub total: u64,
}

impl Packet {
    /// Build a packet; `score` is rounded to two decimals.
    pub fn new(image: String, score: f64, fps: f64, current: u64, total: u64) -> Self {
        Self {
            image,
            score: round_score(score),
            fps,
            current,
            total,
        }
    }

    /// Serialize to a single prefixed line, terminated by `\n`.
    pub fn to_line(&self) -> Result<String, FrameError> {
        let json = serde_json::to_string(self).map_err(|e| FrameError::Encode(e.to_string()))?;
        Ok(format!("{PACKET_PREFIX}{json}\n"))
    }

    /// Parse one output line. Returns `None` for diagnostic lines and for
    /// prefixed lines whose JSON does not decode.
    pub fn from_line(line: &str) -> Option<Self> {
        let json = line.trim().strip_prefix(PACKET_PREFIX)?;
        serde_json::from_str(json).ok()
    }
}

/// Round to two decimal places.
pub fn round_score(score: f64) -> f64 {
    (score * 100.0).round() / 100.0
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("pixel buffer has {got} bytes, expected {expected}")]
    Layout { got: usize, expected: usize },
    #[error("unsupported channel count {0}, expected 1, 3 or 4")]
    UnsupportedChannels(u8),
    #[error("failed to encode packet: {0}")]
    Encode(String),
}
