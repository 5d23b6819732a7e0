use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pipeline::chain::ChainMode;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub models: ModelPaths,
    pub detection: DetectionConfig,
    pub limits: LimitsConfig,
    pub pipeline: PipelineConfig,
    pub recommend: RecommendConfig,
    pub trends: TrendsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub uploads_dir: PathBuf,
    pub predictions_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            uploads_dir: PathBuf::from("uploads"),
            predictions_dir: PathBuf::from("predictions"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorPaths {
    pub weights: PathBuf,
    /// One class name per line, in class-index order.
    pub labels: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelPaths {
    pub garment: Option<DetectorPaths>,
    pub color: Option<DetectorPaths>,
    pub pattern: Option<DetectorPaths>,
    pub texture_extractor: Option<PathBuf>,
    pub texture_head: Option<PathBuf>,
    pub embedding_extractor: Option<PathBuf>,
    pub embedding_index: Option<PathBuf>,
    pub use_cuda: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_upload_bytes: usize,
    pub max_archive_entries: usize,
    pub max_extracted_bytes: u64,
    pub max_entry_bytes: u64,
    pub request_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 200 * 1024 * 1024,
            max_archive_entries: 2_000,
            max_extracted_bytes: 1024 * 1024 * 1024,
            max_entry_bytes: 50 * 1024 * 1024,
            request_timeout_secs: 600,
        }
    }
}

impl LimitsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub chain_mode: ChainMode,
    pub texture_input_size: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chain_mode: ChainMode::HandOff,
            texture_input_size: 224,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendConfig {
    pub top_k: usize,
    pub input_size: u32,
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self {
            top_k: 6,
            input_size: 224,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendsConfig {
    pub base_url: String,
    pub timeframe: String,
    pub geo: String,
    pub language: String,
    pub tz_offset_minutes: i32,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
    pub forecast_periods: usize,
}

impl Default for TrendsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://trends.google.com".to_string(),
            timeframe: "today 5-y".to_string(),
            geo: String::new(),
            language: "en-US".to_string(),
            tz_offset_minutes: 360,
            request_timeout_secs: 25,
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter: 0.1,
            forecast_periods: 12,
        }
    }
}

impl AppConfig {
    /// Reads the YAML file named by `APP_CONFIG` (default `config/app.yaml`),
    /// falling back to defaults when it does not exist, then applies env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("APP_CONFIG").unwrap_or_else(|_| "config/app.yaml".to_string());
        let mut config = if Path::new(&path).exists() {
            Self::from_file(Path::new(&path))?
        } else {
            log::warn!("Config file {} not found, using defaults", path);
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { key: "PORT", value: port })?;
        }
        if let Some(dir) = lookup("UPLOADS_DIR") {
            self.storage.uploads_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("PREDICTIONS_DIR") {
            self.storage.predictions_dir = PathBuf::from(dir);
        }
        if let Some(mode) = lookup("CHAIN_MODE") {
            self.pipeline.chain_mode = mode
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { key: "CHAIN_MODE", value: mode })?;
        }
        Ok(())
    }
}
