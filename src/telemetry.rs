//! Stream counters shared between the capture loop (sole writer) and API
//! readers. Atomics for the hot counters, a mutex for the rest.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::records::{ConnectionQuality, MetricsSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Disconnected,
    Connecting,
    Streaming,
    Stopped,
}

pub struct StreamTelemetry {
    frames_processed: AtomicU64,
    detection_frames: AtomicU64,
    stream_active: AtomicBool,
    detector_loaded: AtomicBool,
    service_started: Instant,
    loop_started: Mutex<Option<Instant>>,
    last_detection: Mutex<Option<DateTime<Utc>>>,
    state: Mutex<StreamState>,
}

impl StreamTelemetry {
    pub fn new() -> Self {
        Self {
            frames_processed: AtomicU64::new(0),
            detection_frames: AtomicU64::new(0),
            stream_active: AtomicBool::new(false),
            detector_loaded: AtomicBool::new(false),
            service_started: Instant::now(),
            loop_started: Mutex::new(None),
            last_detection: Mutex::new(None),
            state: Mutex::new(StreamState::Disconnected),
        }
    }

    /// Stamp the loop start; throughput is measured from here.
    pub fn mark_loop_started(&self) {
        *self.loop_started.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
    }

    /// Count one processed frame and return (frames so far, current fps).
    pub fn record_frame(&self) -> (u64, f64) {
        let frames = self.frames_processed.fetch_add(1, Ordering::Relaxed) + 1;
        let elapsed = self
            .loop_started
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let fps = if elapsed > 0.0 { frames as f64 / elapsed } else { 0.0 };
        (frames, fps)
    }

    pub fn record_detection(&self) {
        self.detection_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stamp_last_detection(&self, at: DateTime<Utc>) {
        *self.last_detection.lock().unwrap_or_else(|e| e.into_inner()) = Some(at);
    }

    pub fn last_detection(&self) -> Option<DateTime<Utc>> {
        *self.last_detection.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_stream_active(&self, active: bool) {
        self.stream_active.store(active, Ordering::Relaxed);
    }

    pub fn stream_active(&self) -> bool {
        self.stream_active.load(Ordering::Relaxed)
    }

    pub fn set_detector_loaded(&self, loaded: bool) {
        self.detector_loaded.store(loaded, Ordering::Relaxed);
    }

    pub fn detector_loaded(&self) -> bool {
        self.detector_loaded.load(Ordering::Relaxed)
    }

    pub fn set_state(&self, state: StreamState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub fn state(&self) -> StreamState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn loop_started_once(&self) -> bool {
        self.loop_started
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.service_started.elapsed().as_secs_f64()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let uptime = self.uptime_seconds();
        let frames = self.frames_processed.load(Ordering::Relaxed);
        let average_fps = if uptime > 0.0 { frames as f64 / uptime } else { 0.0 };
        MetricsSnapshot {
            total_frames_processed: frames,
            total_detections: self.detection_frames.load(Ordering::Relaxed),
            average_fps,
            stream_uptime_seconds: uptime,
            last_detection_time: self.last_detection(),
            connection_quality: if self.stream_active() {
                ConnectionQuality::Good
            } else {
                ConnectionQuality::Poor
            },
        }
    }
}

impl Default for StreamTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_telemetry_reports_poor_quality_and_zero_counters() {
        let telemetry = StreamTelemetry::new();
        let snap = telemetry.snapshot();
        assert_eq!(snap.total_frames_processed, 0);
        assert_eq!(snap.total_detections, 0);
        assert_eq!(snap.connection_quality, ConnectionQuality::Poor);
        assert!(snap.last_detection_time.is_none());
    }

    #[test]
    fn frame_counter_and_quality_track_the_loop() {
        let telemetry = StreamTelemetry::new();
        telemetry.mark_loop_started();
        telemetry.set_stream_active(true);
        let (frames, _) = telemetry.record_frame();
        assert_eq!(frames, 1);
        telemetry.record_detection();

        let snap = telemetry.snapshot();
        assert_eq!(snap.total_frames_processed, 1);
        assert_eq!(snap.total_detections, 1);
        assert_eq!(snap.connection_quality, ConnectionQuality::Good);
    }

    #[test]
    fn fps_is_zero_before_the_loop_starts() {
        let telemetry = StreamTelemetry::new();
        let (_, fps) = telemetry.record_frame();
        assert_eq!(fps, 0.0);
    }
}
