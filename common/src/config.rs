use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Accepted range for `roboflow.max_fps`. NaN falls outside any range.
pub const MIN_FPS: f64 = 0.001;
pub const MAX_FPS: f64 = 1000.0;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub roboflow: RoboflowConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Deserialize)]
pub struct RoboflowConfig {
    pub api_key: String,
    pub workspace: String,
    pub workflow_id: String,
    pub video_reference: VideoReference,
    pub max_fps: f64,
    /// Base URL of the inference server hosting the pipeline.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Workflow output carrying the annotated image.
    #[serde(default = "default_output_field")]
    pub output_field: String,
}

// Hand-written so the API key never ends up in logs.
impl fmt::Debug for RoboflowConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoboflowConfig")
            .field("api_key", &"<redacted>")
            .field("workspace", &self.workspace)
            .field("workflow_id", &self.workflow_id)
            .field("video_reference", &self.video_reference)
            .field("max_fps", &self.max_fps)
            .field("api_url", &self.api_url)
            .field("output_field", &self.output_field)
            .finish()
    }
}

/// A video source: either a local device index or a URL / file path.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum VideoReference {
    Device(u32),
    Url(String),
}

impl fmt::Display for VideoReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoReference::Device(index) => write!(f, "device:{index}"),
            VideoReference::Url(url) => f.write_str(url),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory exposed under `/static`.
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
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

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fps = self.roboflow.max_fps;
        if !(MIN_FPS..=MAX_FPS).contains(&fps) {
            return Err(ConfigError::Invalid(format!(
                "roboflow.max_fps must be between {MIN_FPS} and {MAX_FPS}, got {fps}"
            )));
        }
        if self.roboflow.output_field.is_empty() {
            return Err(ConfigError::Invalid(
                "roboflow.output_field must not be empty".into(),
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
fn default_api_url() -> String {
    "http://127.0.0.1:9001".into()
}
fn default_output_field() -> String {
    "output_image".into()
}
fn default_static_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        [roboflow]
        api_key = "secret"
        workspace = "demo-space"
        workflow_id = "detect-and-annotate"
        video_reference = "rtsp://camera.local/stream"
        max_fps = 5
        api_url = "http://inference:9001"
        output_field = "annotated"

        [server]
        host = "127.0.0.1"
        port = 8000
        static_dir = "/srv/demo"

        [logging]
        level = "debug"
    "#;

    const MINIMAL: &str = r#"
        [roboflow]
        api_key = "secret"
        workspace = "demo-space"
        workflow_id = "detect-and-annotate"
        video_reference = 0
        max_fps = 2.5

        [server]
        host = "0.0.0.0"
        port = 8080
    "#;

    #[test]
    fn parses_full_config() {
        let config = Config::from_toml(FULL).unwrap();
        assert_eq!(config.roboflow.workspace, "demo-space");
        assert_eq!(config.roboflow.workflow_id, "detect-and-annotate");
        assert_eq!(
            config.roboflow.video_reference,
            VideoReference::Url("rtsp://camera.local/stream".into())
        );
        assert_eq!(config.roboflow.max_fps, 5.0);
        assert_eq!(config.roboflow.api_url, "http://inference:9001");
        assert_eq!(config.roboflow.output_field, "annotated");
        assert_eq!(config.server.bind_addr(), "127.0.0.1:8000");
        assert_eq!(config.server.static_dir, PathBuf::from("/srv/demo"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn optional_fields_fall_back_to_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.roboflow.video_reference, VideoReference::Device(0));
        assert_eq!(config.roboflow.api_url, "http://127.0.0.1:9001");
        assert_eq!(config.roboflow.output_field, "output_image");
        assert_eq!(config.server.static_dir, PathBuf::from("."));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn missing_required_key_is_parse_error() {
        let without_port = MINIMAL.replace("port = 8080", "");
        let err = Config::from_toml(&without_port).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "got {err:?}");

        let without_key = MINIMAL.replace("api_key = \"secret\"", "");
        assert!(matches!(
            Config::from_toml(&without_key),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn non_positive_max_fps_is_rejected() {
        let zero = MINIMAL.replace("max_fps = 2.5", "max_fps = 0");
        assert!(matches!(
            Config::from_toml(&zero),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn out_of_range_max_fps_is_rejected() {
        for bad in ["-5", "inf", "-inf", "nan", "1e-20", "0.0005", "1e12", "1000.5"] {
            let toml = MINIMAL.replace("max_fps = 2.5", &format!("max_fps = {bad}"));
            assert!(
                matches!(Config::from_toml(&toml), Err(ConfigError::Invalid(_))),
                "max_fps = {bad} should be rejected"
            );
        }
    }

    #[test]
    fn max_fps_bounds_are_inclusive() {
        for good in ["0.001", "1000"] {
            let toml = MINIMAL.replace("max_fps = 2.5", &format!("max_fps = {good}"));
            assert!(Config::from_toml(&toml).is_ok(), "max_fps = {good} should be accepted");
        }
    }

    #[test]
    fn example_config_keeps_static_files_out_of_the_config_dir() {
        let config = Config::from_toml(include_str!("../../config.example.toml")).unwrap();
        assert_eq!(config.server.static_dir, PathBuf::from("static"));
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let config = Config::from_toml(FULL).unwrap();
        let rendered = format!("{:?}", config.roboflow);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn load_reports_missing_file() {
        let path = std::env::temp_dir().join("frame-relay-no-such-config.toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile(..)));
    }
}
