use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub recognizer: RecognizerConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Camera index ("0") or path to a video file.
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default)]
    pub loop_video: bool,
    /// Pace of reads from the source, mostly relevant for video files.
    #[serde(default = "default_capture_fps")]
    pub fps: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    #[serde(default = "default_recognition_timeout_ms")]
    pub recognition_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecognizerConfig {
    #[serde(default = "default_data_path")]
    pub data_path: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_whitelist")]
    pub whitelist: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_blur_kernel")]
    pub blur_kernel: i32,
    #[serde(default = "default_canny_low")]
    pub canny_low: f64,
    #[serde(default = "default_canny_high")]
    pub canny_high: f64,
    #[serde(default = "default_min_area")]
    pub min_area: f64,
    #[serde(default = "default_max_area")]
    pub max_area: f64,
    #[serde(default = "default_epsilon_factor")]
    pub epsilon_factor: f64,
    #[serde(default = "default_threshold_block_size")]
    pub threshold_block_size: i32,
    #[serde(default = "default_threshold_c")]
    pub threshold_c: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_render_fps")]
    pub fps: usize,
    /// Annotated video is written here when set.
    #[serde(default)]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            width: default_width(),
            height: default_height(),
            loop_video: false,
            fps: default_capture_fps(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval_ms(),
            recognition_timeout_ms: default_recognition_timeout_ms(),
        }
    }
}

impl PipelineConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn recognition_timeout(&self) -> Duration {
        Duration::from_millis(self.recognition_timeout_ms)
    }
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            data_path: default_data_path(),
            language: default_language(),
            whitelist: default_whitelist(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            blur_kernel: default_blur_kernel(),
            canny_low: default_canny_low(),
            canny_high: default_canny_high(),
            min_area: default_min_area(),
            max_area: default_max_area(),
            epsilon_factor: default_epsilon_factor(),
            threshold_block_size: default_threshold_block_size(),
            threshold_c: default_threshold_c(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            fps: default_render_fps(),
            output: None,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
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

    fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.sample_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.sample_interval_ms must be positive".into(),
            ));
        }
        if self.render.fps == 0 || self.capture.fps == 0 {
            return Err(ConfigError::Invalid(
                "render.fps and capture.fps must be positive".into(),
            ));
        }
        if self.history.capacity == 0 {
            return Err(ConfigError::Invalid(
                "history.capacity must be positive".into(),
            ));
        }
        if self.detector.min_area >= self.detector.max_area {
            return Err(ConfigError::Invalid(
                "detector.min_area must be below detector.max_area".into(),
            ));
        }
        // OpenCV wants odd kernels for both the blur and the adaptive threshold.
        if self.detector.blur_kernel % 2 == 0 || self.detector.threshold_block_size % 2 == 0 {
            return Err(ConfigError::Invalid(
                "detector.blur_kernel and detector.threshold_block_size must be odd".into(),
            ));
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
fn default_source() -> String {
    "0".into()
}
fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_capture_fps() -> usize {
    30
}
fn default_sample_interval_ms() -> u64 {
    100
}
fn default_recognition_timeout_ms() -> u64 {
    3000
}
fn default_data_path() -> String {
    "models".into()
}
fn default_language() -> String {
    "eng".into()
}
fn default_whitelist() -> String {
    "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789".into()
}
fn default_blur_kernel() -> i32 {
    5
}
fn default_canny_low() -> f64 {
    50.0
}
fn default_canny_high() -> f64 {
    150.0
}
fn default_min_area() -> f64 {
    500.0
}
fn default_max_area() -> f64 {
    10000.0
}
fn default_epsilon_factor() -> f64 {
    0.02
}
fn default_threshold_block_size() -> i32 {
    11
}
fn default_threshold_c() -> f64 {
    2.0
}
fn default_render_fps() -> usize {
    60
}
fn default_history_capacity() -> usize {
    10
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.capture.source, "0");
        assert_eq!(config.pipeline.sample_interval(), Duration::from_millis(100));
        assert_eq!(config.recognizer.language, "eng");
        assert_eq!(config.detector.threshold_block_size, 11);
        assert_eq!(config.history.capacity, 10);
        assert_eq!(config.logging.level, "info");
        assert!(config.render.output.is_none());
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::from_toml(
            r#"
            [capture]
            source = "data/street.mp4"
            loop_video = true

            [pipeline]
            recognition_timeout_ms = 500

            [render]
            fps = 30
            output = "output.avi"
            "#,
        )
        .unwrap();
        assert_eq!(config.capture.source, "data/street.mp4");
        assert!(config.capture.loop_video);
        assert_eq!(config.capture.width, 1280);
        assert_eq!(
            config.pipeline.recognition_timeout(),
            Duration::from_millis(500)
        );
        assert_eq!(config.render.fps, 30);
        assert_eq!(config.render.output.as_deref(), Some("output.avi"));
    }

    #[test]
    fn shipped_config_parses() {
        let config = Config::from_toml(include_str!("../config.toml")).unwrap();
        assert_eq!(config.pipeline.recognition_timeout_ms, 3000);
        assert_eq!(config.detector.min_area, 500.0);
    }

    #[test]
    fn rejects_even_kernels() {
        let err = Config::from_toml("[detector]\nblur_kernel = 4\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = Config::from_toml("[pipeline\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
