use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub alert: AlertConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CaptureConfig {
    #[serde(default)]
    pub resolution: Resolution,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Interval between scans while the service is healthy, in milliseconds.
    #[serde(default = "default_base_interval_ms")]
    pub base_interval_ms: u64,
    /// Motion sensitivity, 0-100. Lower values trigger analysis on less motion.
    #[serde(default = "default_sensitivity")]
    pub sensitivity: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default = "default_sound_enabled")]
    pub sound_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_base_interval_ms() -> u64 {
    30_000
}

fn default_sensitivity() -> u8 {
    15
}

fn default_server_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_sound_enabled() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: default_base_interval_ms(),
            sensitivity: default_sensitivity(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            sound_enabled: default_sound_enabled(),
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

/// Capture resolution presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Resolution {
    #[default]
    Hd,
    Fhd,
    Uhd,
}

impl Resolution {
    pub fn width(&self) -> usize {
        match self {
            Self::Hd => 1280,
            Self::Fhd => 1920,
            Self::Uhd => 3840,
        }
    }

    pub fn height(&self) -> usize {
        match self {
            Self::Hd => 720,
            Self::Fhd => 1080,
            Self::Uhd => 2160,
        }
    }
}

/// One captured frame: tightly-packed RGB8, row-major.
///
/// Owned by the capture step that produced it and dropped after the tick
/// that consumed it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub timestamp_ms: u64,
}

impl Frame {
    /// A frame is usable once the device reports real dimensions and the
    /// buffer matches them.
    pub fn is_ready(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == self.width * self.height * 3
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    PersonDetected,
    NoPerson,
    StaticScene,
    Cooldown,
    Error,
}

impl DetectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PersonDetected => "person_detected",
            Self::NoPerson => "no_person",
            Self::StaticScene => "static_scene",
            Self::Cooldown => "cooldown",
            Self::Error => "error",
        }
    }
}

/// One entry in the detection history, immutable once created.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionEvent {
    pub status: DetectionStatus,
    pub message: String,
    pub description: Option<String>,
    /// Remote model confidence, 0-100. Absent for local-only outcomes.
    pub confidence: Option<f32>,
    pub timestamp_ms: u64,
}

impl DetectionEvent {
    pub fn new(status: DetectionStatus, message: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            status,
            message: message.into(),
            description: None,
            confidence: None,
            timestamp_ms,
        }
    }
}

/// Current wall clock as epoch milliseconds.
pub fn epoch_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
