use frame_pacer_common::config::{SourceConfig, SourceKind};
use frame_pacer_common::frame::{Frame, FrameError};
use image::DynamicImage;
use serde::Deserialize;
use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Produces raw input frames in presentation order. `Ok(None)` means the
/// source is exhausted, which is the only way processing ends normally.
pub trait FrameSource {
    fn next_frame(&mut self) -> impl Future<Output = Result<Option<Frame>, SourceError>>;

    /// Expected number of frames, when the container says so. Logging only.
    fn len_hint(&self) -> Option<u64> {
        None
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("input not found: {0}")]
    NotFound(String),
    #[error("ffprobe failed for {0}: {1}")]
    Probe(String, String),
    #[error("failed to spawn {0}: {1}")]
    Spawn(&'static str, std::io::Error),
    #[error("failed to read decoded frames: {0}")]
    Read(std::io::Error),
    #[error("decoder output ended mid-frame: got {got} of {expected} bytes")]
    Truncated { got: usize, expected: usize },
    #[error("decoder exited with {0}")]
    Decoder(String),
    #[error("failed to list {0}: {1}")]
    ReadDir(String, std::io::Error),
    #[error("failed to decode image {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("invalid frame: {0}")]
    Frame(#[from] FrameError),
}

/// Open the configured input. Missing or unopenable inputs fail here, before
/// any frame is processed.
pub async fn open_source(config: &SourceConfig) -> Result<InputSource, SourceError> {
    let path = config.path.as_path();
    if !path.exists() {
        return Err(SourceError::NotFound(path.display().to_string()));
    }
    let kind = match config.kind {
        SourceKind::Auto if path.is_dir() => SourceKind::Images,
        SourceKind::Auto => SourceKind::Video,
        explicit => explicit,
    };
    match kind {
        SourceKind::Images => Ok(InputSource::Images(ImageDirSource::open(path)?)),
        _ => Ok(InputSource::Video(FfmpegSource::open(path).await?)),
    }
}

/// The source kinds selectable from configuration.
pub enum InputSource {
    Video(FfmpegSource),
    Images(ImageDirSource),
}

impl FrameSource for InputSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        match self {
            InputSource::Video(source) => source.next_frame().await,
            InputSource::Images(source) => source.next_frame().await,
        }
    }

    fn len_hint(&self) -> Option<u64> {
        match self {
            InputSource::Video(source) => source.len_hint(),
            InputSource::Images(source) => source.len_hint(),
        }
    }
}

// =============================================================================
// Video files (ffmpeg rawvideo pipe)
// =============================================================================

/// Decoded stream geometry. `width` and `height` are the dimensions of the
/// frames ffmpeg writes, i.e. after any rotation has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoProbe {
    pub width: u32,
    pub height: u32,
    pub frame_count: Option<u64>,
    /// Clockwise display rotation in degrees, one of 0, 90, 180, 270.
    pub rotation: u32,
}

impl VideoProbe {
    /// ffmpeg only auto-rotates when the container asks for it. Without
    /// rotation metadata it is told not to, so the output always matches the
    /// probed dimensions.
    fn autorotate(&self) -> bool {
        self.rotation != 0
    }
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: u32,
    height: u32,
    #[serde(default)]
    nb_frames: Option<String>,
    /// Older containers: `"tags": {"rotate": "90"}`.
    #[serde(default)]
    tags: Option<ProbeTags>,
    /// Display matrix: `"side_data_list": [{"rotation": -90}]`.
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(Deserialize)]
struct ProbeTags {
    #[serde(default)]
    rotate: Option<String>,
}

#[derive(Deserialize)]
struct ProbeSideData {
    #[serde(default)]
    rotation: Option<f64>,
}

impl ProbeStream {
    fn rotation(&self) -> u32 {
        let degrees = self
            .side_data_list
            .iter()
            .find_map(|side| side.rotation)
            // The display matrix angle is counter-clockwise.
            .map(|r| -r)
            .or_else(|| {
                self.tags
                    .as_ref()
                    .and_then(|t| t.rotate.as_deref())
                    .and_then(|r| r.trim().parse::<f64>().ok())
            })
            .unwrap_or(0.0);
        let quarter_turns = (degrees / 90.0).round() as i64;
        (quarter_turns.rem_euclid(4) * 90) as u32
    }
}

/// Parse the output of `ffprobe -of json` for the first video stream,
/// including rotation tags and display-matrix side data.
pub fn parse_probe(path: &str, json: &[u8]) -> Result<VideoProbe, SourceError> {
    let output: ProbeOutput = serde_json::from_slice(json)
        .map_err(|e| SourceError::Probe(path.to_string(), e.to_string()))?;
    let stream = output
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| SourceError::Probe(path.to_string(), "no video stream".into()))?;
    if stream.width == 0 || stream.height == 0 {
        return Err(SourceError::Probe(
            path.to_string(),
            format!("invalid dimensions {}x{}", stream.width, stream.height),
        ));
    }
    let rotation = stream.rotation();
    let (width, height) = match rotation {
        90 | 270 => (stream.height, stream.width),
        _ => (stream.width, stream.height),
    };
    Ok(VideoProbe {
        width,
        height,
        frame_count: stream.nb_frames.and_then(|n| n.parse().ok()),
        rotation,
    })
}

/// Decodes a video file to RGB24 through an ffmpeg subprocess.
///
/// ffmpeg writes frames back to back on stdout, `width * height * 3` bytes
/// each, no headers. Dimensions come from ffprobe before decoding starts.
pub struct FfmpegSource {
    child: Child,
    stdout: ChildStdout,
    probe: VideoProbe,
    frames_read: u64,
    finished: bool,
}

impl FfmpegSource {
    pub async fn open(path: &Path) -> Result<Self, SourceError> {
        let shown = path.display().to_string();
        let output = Command::new("ffprobe")
            .args(["-v", "error", "-select_streams", "v:0"])
            .args([
                "-show_entries",
                "stream=width,height,nb_frames:stream_tags=rotate:stream_side_data=rotation",
                "-of",
                "json",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|e| SourceError::Spawn("ffprobe", e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SourceError::Probe(shown, stderr.trim().to_string()));
        }
        let probe = parse_probe(&shown, &output.stdout)?;

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-v", "error", "-nostdin"]);
        if !probe.autorotate() {
            cmd.arg("-noautorotate");
        }
        let mut child = cmd
            .arg("-i")
            .arg(path)
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SourceError::Spawn("ffmpeg", e))?;
        let stdout = child.stdout.take().ok_or_else(|| {
            SourceError::Spawn(
                "ffmpeg",
                std::io::Error::other("could not get stdout handle"),
            )
        })?;

        info!(
            path = %shown,
            width = probe.width,
            height = probe.height,
            frames = probe.frame_count,
            rotation = probe.rotation,
            "video opened"
        );

        Ok(Self {
            child,
            stdout,
            probe,
            frames_read: 0,
            finished: false,
        })
    }

    pub fn probe(&self) -> VideoProbe {
        self.probe
    }

    fn frame_len(&self) -> usize {
        self.probe.width as usize * self.probe.height as usize * 3
    }

    /// Wait for ffmpeg after its stdout hit EOF.
    async fn finish(&mut self) -> Result<(), SourceError> {
        self.finished = true;
        let status = self.child.wait().await.map_err(SourceError::Read)?;
        if !status.success() {
            return Err(SourceError::Decoder(status.to_string()));
        }
        debug!(frames = self.frames_read, "decoder finished");
        Ok(())
    }
}

impl FrameSource for FfmpegSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if self.finished {
            return Ok(None);
        }
        let frame_len = self.frame_len();
        match read_frame(&mut self.stdout, frame_len).await? {
            Some(data) => {
                self.frames_read += 1;
                Ok(Some(Frame::new(self.probe.width, self.probe.height, 3, data)?))
            }
            None => {
                self.finish().await?;
                Ok(None)
            }
        }
    }

    fn len_hint(&self) -> Option<u64> {
        self.probe.frame_count
    }
}

/// Read exactly one frame. EOF before the first byte is a clean end of
/// stream; EOF after it is an error.
pub async fn read_frame<R>(reader: &mut R, frame_len: usize) -> Result<Option<Vec<u8>>, SourceError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; frame_len];
    let mut filled = 0;
    while filled < frame_len {
        let n = reader
            .read(&mut buf[filled..])
            .await
            .map_err(SourceError::Read)?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    match filled {
        0 => Ok(None),
        n if n < frame_len => Err(SourceError::Truncated {
            got: n,
            expected: frame_len,
        }),
        _ => Ok(Some(buf)),
    }
}

// =============================================================================
// Image sequences
// =============================================================================

/// Still images from one directory, in file name order, decoded to RGB8.
pub struct ImageDirSource {
    paths: VecDeque<PathBuf>,
    total: u64,
}

impl ImageDirSource {
    pub fn open(dir: &Path) -> Result<Self, SourceError> {
        let shown = dir.display().to_string();
        let entries = std::fs::read_dir(dir).map_err(|e| SourceError::ReadDir(shown.clone(), e))?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| SourceError::ReadDir(shown.clone(), e))?
                .path();
            if path.is_file() && has_image_extension(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        if paths.is_empty() {
            warn!(dir = %shown, "no images found");
        } else {
            info!(dir = %shown, images = paths.len(), "image sequence opened");
        }

        let total = paths.len() as u64;
        Ok(Self {
            paths: paths.into(),
            total,
        })
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ImageDirSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let Some(path) = self.paths.pop_front() else {
            return Ok(None);
        };
        let image = image::open(&path).map_err(|source| SourceError::Image {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Some(Frame::from_image(DynamicImage::ImageRgb8(image.to_rgb8()))))
    }

    fn len_hint(&self) -> Option<u64> {
        Some(self.total)
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// Frames already in memory, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemorySource {
    frames: VecDeque<Frame>,
    total: u64,
}

impl From<Vec<Frame>> for MemorySource {
    fn from(frames: Vec<Frame>) -> Self {
        let total = frames.len() as u64;
        Self {
            frames: frames.into(),
            total,
        }
    }
}

impl FrameSource for MemorySource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        Ok(self.frames.pop_front())
    }

    fn len_hint(&self) -> Option<u64> {
        Some(self.total)
    }
}
