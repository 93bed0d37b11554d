use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use rallyq_calib::GridSpec;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("unable to read config {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config")]
    Parse(#[from] toml::de::Error),
}

/// Settings of the whole application, every section is optional
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub grid: GridSpec,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilesConfig {
    #[serde(default = "default_templates")]
    pub templates: PathBuf,
    #[serde(default = "default_calibration")]
    pub calibration: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Recording played by the analysis and matching modes
    #[serde(default = "default_video")]
    pub video: PathBuf,
    /// Pose bridge spawned by the real-time mode
    #[serde(default = "default_bridge_command")]
    pub bridge_command: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    /// Frame rate of the sources, also paces recordings
    #[serde(default = "default_fps")]
    pub fps: f32,
    /// Hip displacements below this are ignored, meters
    #[serde(default = "default_noise_threshold")]
    pub noise_threshold: f32,
    /// Empirical scale applied to the back-projected body height
    #[serde(default = "default_height_correction")]
    pub height_correction: f32,
    /// Minimum similarity of a template match
    #[serde(default = "default_threshold")]
    pub threshold: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UiConfig {
    #[serde(default = "default_refresh_ms")]
    pub refresh_ms: u64,
    #[serde(default = "default_window_size")]
    pub window_size: [f32; 2],
}

fn default_templates() -> PathBuf { PathBuf::from("templates.csv") }
fn default_calibration() -> PathBuf { PathBuf::from("chessboard_pattern_config.json") }
fn default_video() -> PathBuf { PathBuf::from("recording") }
fn default_bridge_command() -> Vec<String> { vec!["rallyq-pose-bridge".into(), "--camera".into(), "0".into()] }
fn default_fps() -> f32 { 30.0 }
fn default_noise_threshold() -> f32 { 0.006 }
fn default_height_correction() -> f32 { 2.88 }
fn default_threshold() -> f32 { rallyq_motion::DEFAULT_THRESHOLD }
fn default_refresh_ms() -> u64 { 10 }
fn default_window_size() -> [f32; 2] { [1600.0, 900.0] }

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            templates: default_templates(),
            calibration: default_calibration(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            video: default_video(),
            bridge_command: default_bridge_command(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            noise_threshold: default_noise_threshold(),
            height_correction: default_height_correction(),
            threshold: default_threshold(),
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            refresh_ms: default_refresh_ms(),
            window_size: default_window_size(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}
