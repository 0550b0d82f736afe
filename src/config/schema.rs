use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::webrtc::config::{public_ice, IceServerConfig};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Web server settings
    pub web: WebConfig,
    /// Stream ingestion settings
    pub stream: StreamConfig,
    /// Inference model settings
    pub models: ModelConfig,
}

impl AppConfig {
    /// Load a JSON configuration file; missing fields take their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.web.http_port == 0 {
            return Err(AppError::Config("http_port must be non-zero".to_string()));
        }
        let margin = self.models.box_margin;
        if !margin.is_finite() || !(0.0..0.5).contains(&margin) {
            return Err(AppError::Config(format!(
                "box_margin must be in [0, 0.5), got {}",
                margin
            )));
        }
        for threshold in [
            self.models.detector_score_threshold,
            self.models.detector_nms_threshold,
        ] {
            if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
                return Err(AppError::Config(format!(
                    "detector thresholds must be in [0, 1], got {}",
                    threshold
                )));
            }
        }
        Ok(())
    }
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Bind address
    pub bind_address: String,
    /// HTTP port
    pub http_port: u16,
    /// Extra allowed CORS origins besides localhost
    pub allowed_origins: Vec<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            http_port: 3001,
            allowed_origins: vec![],
        }
    }
}

/// Stream ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Minimum interval between processed frames of one track (ms)
    pub throttle_ms: u64,
    /// Upper bound on waiting for ICE gathering before answering (ms)
    pub ice_gathering_timeout_ms: u64,
    /// Connections that never reach `connected` are closed after this long (s)
    pub idle_connect_timeout_secs: u64,
    /// ICE servers handed to every peer connection
    pub ice_servers: Vec<IceServerConfig>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            throttle_ms: 200,
            ice_gathering_timeout_ms: 3000,
            idle_connect_timeout_secs: 5 * 60,
            ice_servers: public_ice::default_servers(),
        }
    }
}

/// Inference model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Fixed assets directory, searched last for model artifacts
    pub assets_dir: PathBuf,
    /// Explicit face detector ONNX file (defaults to `<assets_dir>/face_detector/version-RFB-320.onnx`)
    pub detector_model: Option<PathBuf>,
    /// Minimum face score kept by the detector
    pub detector_score_threshold: f32,
    /// IoU threshold for detector non-maximum suppression
    pub detector_nms_threshold: f32,
    /// Outward margin applied to face boxes before cropping (fraction of box size)
    pub box_margin: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            assets_dir: PathBuf::from("/usr/share/emotion-relay/assets"),
            detector_model: None,
            detector_score_threshold: 0.7,
            detector_nms_threshold: 0.3,
            box_margin: 0.03,
        }
    }
}

impl ModelConfig {
    /// Resolved face detector model path
    pub fn detector_model_path(&self) -> PathBuf {
        self.detector_model.clone().unwrap_or_else(|| {
            self.assets_dir
                .join("face_detector")
                .join("version-RFB-320.onnx")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.stream.throttle_ms, 200);
        assert_eq!(config.stream.ice_gathering_timeout_ms, 3000);
        assert_eq!(config.stream.idle_connect_timeout_secs, 300);
        assert_eq!(config.web.http_port, 3001);
        assert!((config.models.box_margin - 0.03).abs() < f32::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"stream":{"throttle_ms":100}}"#).unwrap();
        assert_eq!(config.stream.throttle_ms, 100);
        assert_eq!(config.stream.ice_gathering_timeout_ms, 3000);
        assert_eq!(config.web.bind_address, "127.0.0.1");
    }

    #[test]
    fn test_validate_rejects_bad_margin() {
        let mut config = AppConfig::default();
        config.models.box_margin = f32::NAN;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        config.models.box_margin = 0.03;
        config.web.http_port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emotion-relay.json");
        std::fs::write(&path, r#"{"web":{"http_port":8080},"models":{"box_margin":0.1}}"#).unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.web.http_port, 8080);
        assert!((config.models.box_margin - 0.1).abs() < f32::EPSILON);
        assert_eq!(config.stream.throttle_ms, 200);

        assert!(matches!(
            AppConfig::from_file(&dir.path().join("missing.json")),
            Err(AppError::Io(_))
        ));
    }

    #[test]
    fn test_detector_path_default() {
        let mut models = ModelConfig::default();
        models.assets_dir = PathBuf::from("/opt/assets");
        assert_eq!(
            models.detector_model_path(),
            PathBuf::from("/opt/assets/face_detector/version-RFB-320.onnx")
        );
    }
}
