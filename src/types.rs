use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub preprocess: PreprocessConfig,
    pub api: ApiConfig,
    pub proxy: ProxyConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Ticks shown before recording starts
    pub countdown_ticks: u32,
    pub tick_interval_ms: u64,
    pub recording_ms: u64,
    /// Number of values the prediction service expects per sequence
    pub sequence_length: usize,
    /// Raw frames queued between the camera callback and the capture task
    pub frame_queue_depth: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            countdown_ticks: 3,
            tick_interval_ms: 1000,
            recording_ms: 3000,
            sequence_length: 100,
            frame_queue_depth: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub grid_width: usize,
    pub grid_height: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            grid_width: 2,
            grid_height: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub predict_path: String,
    pub labels_path: String,
    pub timeout_secs: u64,
    /// Route requests through HTTP(S)_PROXY when set in the environment
    pub use_system_proxy: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            predict_path: "/predict".to_string(),
            labels_path: "/labels".to_string(),
            timeout_secs: 30,
            use_system_proxy: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub bind: String,
    pub backend_url: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            backend_url: "http://localhost:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub snapshot_path: Option<String>,
    /// Label used when the service cannot list labels
    pub fallback_label: Option<Label>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "sign_capture=info".to_string(),
        }
    }
}

/// A sign the user can practice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
}

impl Label {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// One RGB camera frame as delivered by the acquisition layer.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub timestamp_ms: f64,
}

/// Numeric features extracted from one frame.
pub type FrameVector = Vec<f32>;

/// Opaque payload returned by the prediction service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PredictionResult(pub serde_json::Value);

impl PredictionResult {
    pub fn into_inner(self) -> serde_json::Value {
        self.0
    }
}
