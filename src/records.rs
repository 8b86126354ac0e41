//! Wire-facing data models: detection records, per-frame track samples,
//! status and metrics snapshots.
//!
//! Field names on the JSON side keep the dashboard's existing wire shape
//! (`bison_count`, `fps`), while the Rust side uses the neutral names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::movement::MovementDirection;

/// Where a detection record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Rtsp,
    Sample,
}

/// One processed frame's detection summary. Immutable once created;
/// evicted from history only by capacity overflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "bison_count")]
    pub object_count: u32,
    pub movement: MovementDirection,
    #[serde(rename = "fps")]
    pub throughput_fps: f64,
    pub source: DataSource,
}

/// Per-frame tracking sample. Ephemeral — never stored in history.
#[derive(Debug, Clone, Serialize)]
pub struct TrackSample {
    pub track_id: i64,
    /// (x1, y1, x2, y2) in frame pixels, x1 <= x2, y1 <= y2.
    pub bbox: [f32; 4],
    pub confidence: f32,
    pub center: (f32, f32),
    /// Displacement of the center since the previous frame's sample with
    /// the same track id; None when that id was not seen last frame.
    pub velocity: Option<(f32, f32)>,
}

impl TrackSample {
    pub fn center_of(bbox: [f32; 4]) -> (f32, f32) {
        ((bbox[0] + bbox[2]) / 2.0, (bbox[1] + bbox[3]) / 2.0)
    }
}

/// Coarse service health, as reported by `/api/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemState {
    Operational,
    Initializing,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub system_status: SystemState,
    pub stream_active: bool,
    pub detector_loaded: bool,
    pub last_detection: Option<DateTime<Utc>>,
    pub uptime_seconds: f64,
}

/// Video-source health label derived from whether the stream is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Good,
    Poor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_frames_processed: u64,
    pub total_detections: u64,
    pub average_fps: f64,
    pub stream_uptime_seconds: f64,
    pub last_detection_time: Option<DateTime<Utc>>,
    pub connection_quality: ConnectionQuality,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::MovementDirection;

    #[test]
    fn record_serializes_with_dashboard_field_names() {
        let record = DetectionRecord {
            timestamp: Utc::now(),
            object_count: 4,
            movement: MovementDirection::East,
            throughput_fps: 12.5,
            source: DataSource::Rtsp,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["bison_count"], 4);
        assert_eq!(json["fps"], 12.5);
        assert_eq!(json["movement"], "east");
        assert_eq!(json["source"], "rtsp");
    }

    #[test]
    fn center_is_bbox_midpoint() {
        assert_eq!(TrackSample::center_of([10.0, 20.0, 30.0, 60.0]), (20.0, 40.0));
    }
}
