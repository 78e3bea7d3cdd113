use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub enhance: EnhanceConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub interpolation: InterpolationConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Video file, or a directory of still images.
    pub path: PathBuf,
    #[serde(default)]
    pub kind: SourceKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Directory means images, anything else means video.
    #[default]
    Auto,
    Video,
    Images,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnhanceConfig {
    #[serde(default = "default_scale")]
    pub scale: u32,
    /// Super-resolution sidecar argv. Without it frames are resampled.
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Sidecar argv. Without it nothing is ever detected and the score only decays.
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterpolationConfig {
    #[serde(default = "default_timestep")]
    pub timestep: f64,
    /// Sidecar argv. Without it every in-between frame is a linear blend.
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_target_fps")]
    pub target_fps: f64,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self {
            scale: default_scale(),
            command: None,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            min_confidence: default_min_confidence(),
            command: None,
        }
    }
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            timestep: default_timestep(),
            command: None,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            target_fps: default_target_fps(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enhance.scale == 0 {
            return Err(ConfigError::Invalid("enhance.scale must be at least 1".into()));
        }
        if self.detection.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "detection.batch_size must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.detection.min_confidence) {
            return Err(ConfigError::Invalid(
                "detection.min_confidence must be within [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.interpolation.timestep) {
            return Err(ConfigError::Invalid(
                "interpolation.timestep must be within [0, 1]".into(),
            ));
        }
        if !(self.playback.target_fps.is_finite() && self.playback.target_fps > 0.0) {
            return Err(ConfigError::Invalid(
                "playback.target_fps must be a positive number".into(),
            ));
        }
        if !(1..=100).contains(&self.playback.jpeg_quality) {
            return Err(ConfigError::Invalid(
                "playback.jpeg_quality must be within 1..=100".into(),
            ));
        }
        for (name, cmd) in [
            ("enhance.command", &self.enhance.command),
            ("detection.command", &self.detection.command),
            ("interpolation.command", &self.interpolation.command),
        ] {
            if matches!(cmd, Some(argv) if argv.is_empty()) {
                return Err(ConfigError::Invalid(format!("{name} must not be empty")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_scale() -> u32 {
    2
}
fn default_batch_size() -> u64 {
    20
}
fn default_min_confidence() -> f64 {
    0.1
}
fn default_timestep() -> f64 {
    0.5
}
fn default_target_fps() -> f64 {
    48.0
}
fn default_jpeg_quality() -> u8 {
    70
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::from_toml("[source]\npath = \"clip.mp4\"\n").unwrap();
        assert_eq!(config.source.path, PathBuf::from("clip.mp4"));
        assert_eq!(config.source.kind, SourceKind::Auto);
        assert_eq!(config.enhance.scale, 2);
        assert!(config.enhance.command.is_none());
        assert_eq!(config.detection.batch_size, 20);
        assert!(config.detection.command.is_none());
        assert_eq!(config.interpolation.timestep, 0.5);
        assert_eq!(config.playback.target_fps, 48.0);
        assert_eq!(config.playback.jpeg_quality, 70);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn full_config_parses() {
        let toml = r#"
            [source]
            path = "frames/"
            kind = "images"

            [enhance]
            command = ["python3", "edsr.py"]

            [detection]
            batch_size = 1
            command = ["python3", "detect.py"]

            [interpolation]
            timestep = 0.25

            [playback]
            target_fps = 24.0
        "#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.source.kind, SourceKind::Images);
        assert_eq!(config.enhance.command.as_ref().map(Vec::len), Some(2));
        assert_eq!(config.detection.batch_size, 1);
        assert_eq!(
            config.detection.command.as_deref(),
            Some(&["python3".to_string(), "detect.py".to_string()][..])
        );
        assert_eq!(config.interpolation.timestep, 0.25);
        assert_eq!(config.playback.target_fps, 24.0);
    }

    #[test]
    fn missing_source_is_a_parse_error() {
        let err = Config::from_toml("[playback]\ntarget_fps = 30.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_zero_batch_size() {
        let err = Config::from_toml("[source]\npath = \"a\"\n[detection]\nbatch_size = 0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_non_positive_fps() {
        let err = Config::from_toml("[source]\npath = \"a\"\n[playback]\ntarget_fps = 0.0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_empty_sidecar_command() {
        let err = Config::from_toml("[source]\npath = \"a\"\n[interpolation]\ncommand = []\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
