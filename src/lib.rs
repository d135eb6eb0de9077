pub mod capture;
pub mod detect;
#[cfg(feature = "display")]
pub mod display;
pub mod pipeline;
pub mod sink;
pub mod utils;

use std::fs;
use std::path::Path;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Global configuration snapshot, loaded once at startup
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Detection settings
    pub detection_threshold: f32,
    pub nms_threshold: f32,

    // Camera settings
    pub camera_id: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub frame_fps: u32,

    // RTSP settings
    pub rtsp_url: String,
    pub rtsp_port: u16,

    // Metadata settings
    pub metadata_publish_interval_ms: u64,
    pub metadata_host: String,
    pub metadata_port: u16,
    pub metadata_endpoint: String,

    // Model settings
    pub model_path: String,
    pub use_gpu: bool,

    // Display settings
    pub show_display: bool,
    pub draw_detections: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            detection_threshold: 0.25,
            nms_threshold: 0.45,
            camera_id: 0,
            frame_width: 640,
            frame_height: 480,
            frame_fps: 30,
            rtsp_url: "rtsp://localhost:8554/stream".into(),
            rtsp_port: 8554,
            metadata_publish_interval_ms: 100,
            metadata_host: "localhost".into(),
            metadata_port: 8080,
            metadata_endpoint: "/metadata".into(),
            model_path: "models/detector.onnx".into(),
            use_gpu: false,
            show_display: true,
            draw_detections: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config value: {0}")]
    Invalid(String),
}

impl Config {
    /// Load configuration from a JSON file. A missing file is not an error:
    /// the defaults are written out to the given path and used as-is.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            let config = Config::default();
            config.save(path)?;
            info!("Config file not found, wrote defaults to {}", path.display());
            return Ok(config);
        }

        let raw = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        info!("Config loaded from {}", path.display());
        Ok(config)
    }

    /// Write configuration to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        Ok(())
    }

    /// Validate field ranges at load time instead of silently accepting
    /// out-of-range values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.detection_threshold) {
            return Err(ConfigError::Invalid(format!(
                "detection_threshold must be within [0, 1], got {}",
                self.detection_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.nms_threshold) {
            return Err(ConfigError::Invalid(format!(
                "nms_threshold must be within [0, 1], got {}",
                self.nms_threshold
            )));
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(ConfigError::Invalid(
                "frame geometry must be positive".into(),
            ));
        }
        if self.frame_fps == 0 {
            return Err(ConfigError::Invalid("frame_fps must be positive".into()));
        }
        if self.metadata_publish_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "metadata_publish_interval_ms must be positive".into(),
            ));
        }
        if self.metadata_host.is_empty() || self.metadata_endpoint.is_empty() {
            return Err(ConfigError::Invalid(
                "metadata host/endpoint must be non-empty".into(),
            ));
        }
        if self.model_path.is_empty() {
            return Err(ConfigError::Invalid("model_path must be non-empty".into()));
        }
        Ok(())
    }

    pub fn camera_label(&self) -> String {
        format!("camera_{}", self.camera_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn partial_document_falls_back_to_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "detection_threshold": 0.5, "camera_id": 3 }"#).unwrap();
        assert_eq!(config.detection_threshold, 0.5);
        assert_eq!(config.camera_id, 3);
        assert_eq!(config.frame_width, 640);
        assert_eq!(config.metadata_endpoint, "/metadata");
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let mut config = Config::default();
        config.nms_threshold = 1.5;
        assert!(config.validate().is_err());

        config = Config::default();
        config.detection_threshold = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_geometry_is_rejected() {
        let mut config = Config::default();
        config.frame_width = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_writes_defaults() {
        let dir = std::env::temp_dir().join("vigil-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        let _ = std::fs::remove_file(&path);

        let config = Config::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.rtsp_port, 8554);

        let reloaded = Config::load(&path).unwrap();
        assert_eq!(reloaded.frame_fps, config.frame_fps);
        let _ = std::fs::remove_file(&path);
    }
}
