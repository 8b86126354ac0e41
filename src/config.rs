//! Service configuration.
//!
//! Loaded from herdwatch.toml (working directory, optional) with env-var
//! overrides. Env format: HERDWATCH__SECTION__KEY (double underscores).

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatchConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:5173".to_string(),
    ]
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Rtsp,
    Sample,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// RTSP URL; required only when `source = "rtsp"`.
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_source")]
    pub source: SourceKind,
    #[serde(default = "default_target_fps")]
    pub target_fps: f64,
}

fn default_source() -> SourceKind {
    SourceKind::Sample
}
fn default_target_fps() -> f64 {
    30.0
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            source: default_source(),
            target_fps: default_target_fps(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_model_path")]
    pub model_path: String,
    #[serde(default)]
    pub target_class_id: u32,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
}

fn default_model_path() -> String {
    "models/bison-yolov8n.onnx".to_string()
}
fn default_confidence_threshold() -> f32 {
    0.25
}
fn default_iou_threshold() -> f32 {
    0.45
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            target_class_id: 0,
            confidence_threshold: default_confidence_threshold(),
            iou_threshold: default_iou_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    /// Minimum per-axis pixel displacement for a track to count toward
    /// the aggregate movement direction.
    #[serde(default = "default_movement_threshold")]
    pub movement_threshold: f32,
}

fn default_movement_threshold() -> f32 {
    10.0
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            movement_threshold: default_movement_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// Record capacity — 30 minutes at 1 record/s by default.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Largest window (minutes) the history endpoint will serve.
    #[serde(default = "default_max_window_minutes")]
    pub max_window_minutes: i64,
}

fn default_capacity() -> usize {
    1800
}
fn default_max_window_minutes() -> i64 {
    60
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            max_window_minutes: default_max_window_minutes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_read_retry_millis")]
    pub read_retry_millis: u64,
    /// Consecutive read failures before the source handle is torn down
    /// and the loop falls back to reconnecting.
    #[serde(default = "default_max_read_failures")]
    pub max_read_failures: u32,
}

fn default_reconnect_delay_secs() -> u64 {
    5
}
fn default_read_retry_millis() -> u64 {
    100
}
fn default_max_read_failures() -> u32 {
    30
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: default_reconnect_delay_secs(),
            read_retry_millis: default_read_retry_millis(),
            max_read_failures: default_max_read_failures(),
        }
    }
}

/// Load configuration from herdwatch.toml + environment overrides.
///
/// Search order:
///   1. ./herdwatch.toml (working directory, optional)
///   2. Environment variables: HERDWATCH__CAMERA__URL, etc.
pub fn load_config() -> Result<WatchConfig, config::ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name("herdwatch").required(false))
        .add_source(
            config::Environment::with_prefix("HERDWATCH")
                .separator("__")
                .try_parsing(true),
        );

    let settings = builder.build()?;
    settings.try_deserialize::<WatchConfig>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let cfg = WatchConfig::default();
        assert_eq!(cfg.api.port, 8080);
        assert_eq!(cfg.camera.source, SourceKind::Sample);
        assert_eq!(cfg.detector.confidence_threshold, 0.25);
        assert_eq!(cfg.detector.iou_threshold, 0.45);
        assert_eq!(cfg.tracking.movement_threshold, 10.0);
        assert_eq!(cfg.history.capacity, 1800);
        assert_eq!(cfg.history.max_window_minutes, 60);
        assert_eq!(cfg.stream.reconnect_delay_secs, 5);
    }

    #[test]
    fn toml_sections_deserialize() {
        let cfg: WatchConfig = toml_from_str(
            r#"
            [camera]
            url = "rtsp://example/stream"
            source = "rtsp"
            target_fps = 15.0

            [tracking]
            movement_threshold = 12.5
            "#,
        );
        assert_eq!(cfg.camera.source, SourceKind::Rtsp);
        assert_eq!(cfg.camera.target_fps, 15.0);
        assert_eq!(cfg.tracking.movement_threshold, 12.5);
        // Untouched sections keep their defaults.
        assert_eq!(cfg.history.capacity, 1800);
    }

    fn toml_from_str(s: &str) -> WatchConfig {
        config::Config::builder()
            .add_source(config::File::from_str(s, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }
}
