//! The detection service: owns the history store and telemetry, runs the
//! stream loop on a dedicated thread, and exposes the read surface the API
//! layer serves from.
//!
//! Loop states: disconnected → connecting → streaming, back to disconnected
//! on source failure, stopped on explicit stop. Nothing in here ever
//! propagates an error to a reader — degraded service shows up as empty
//! history and `poor` connection quality instead.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::capture::VideoSource;
use crate::config::{SourceKind, WatchConfig};
use crate::detector::Detector;
use crate::processor::{FrameProcessor, ProcessOutcome};
use crate::records::{DataSource, DetectionRecord, MetricsSnapshot, SystemState, SystemStatus};
use crate::sample::{SampleDetector, SampleSource};
use crate::store::HistoryStore;
use crate::telemetry::{StreamState, StreamTelemetry};

pub struct DetectionService {
    cfg: WatchConfig,
    store: Arc<HistoryStore>,
    telemetry: Arc<StreamTelemetry>,
    worker: Mutex<Option<Worker>>,
}

struct Worker {
    stop_tx: watch::Sender<bool>,
    handle: thread::JoinHandle<()>,
}

impl DetectionService {
    pub fn new(cfg: WatchConfig) -> Self {
        let store = Arc::new(HistoryStore::new(cfg.history.capacity));
        Self {
            cfg,
            store,
            telemetry: Arc::new(StreamTelemetry::new()),
            worker: Mutex::new(None),
        }
    }

    /// Build the configured capabilities and start the stream loop.
    pub fn start(&self) -> Result<()> {
        match self.cfg.camera.source {
            SourceKind::Sample => {
                let detector = SampleDetector::new(self.cfg.detector.target_class_id);
                self.start_with(Box::new(SampleSource::new()), Some(Box::new(detector)));
                Ok(())
            }
            SourceKind::Rtsp => self.start_rtsp(),
        }
    }

    #[cfg(feature = "vision")]
    fn start_rtsp(&self) -> Result<()> {
        use crate::capture::RtspSource;
        use crate::detector::OnnxDetector;

        if self.cfg.camera.url.is_empty() {
            anyhow::bail!("camera.url is required when [camera] source = \"rtsp\"");
        }

        // A missing model is a degraded mode, not a startup failure: the
        // loop still runs and the API still serves status.
        let detector: Option<Box<dyn Detector>> = match OnnxDetector::load(
            &self.cfg.detector.model_path,
            self.cfg.detector.confidence_threshold,
            self.cfg.detector.iou_threshold,
        ) {
            Ok(d) => Some(Box::new(d)),
            Err(e) => {
                error!(
                    "failed to load detection model {}: {e:#} — running without detection",
                    self.cfg.detector.model_path
                );
                None
            }
        };

        self.start_with(Box::new(RtspSource::new(self.cfg.camera.url.clone())), detector);
        Ok(())
    }

    #[cfg(not(feature = "vision"))]
    fn start_rtsp(&self) -> Result<()> {
        anyhow::bail!(
            "built without the `vision` feature; set [camera] source = \"sample\" \
             or rebuild with --features vision"
        )
    }

    /// Start the loop with explicit capabilities. Idempotent: a running
    /// loop is left alone.
    pub fn start_with(
        &self,
        source: Box<dyn VideoSource>,
        detector: Option<Box<dyn Detector>>,
    ) {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(w) = worker.as_ref() {
            if !w.handle.is_finished() {
                debug!("stream loop already running, ignoring start");
                return;
            }
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let processor = FrameProcessor::new(
            detector,
            self.cfg.detector.target_class_id,
            self.cfg.detector.confidence_threshold,
            self.cfg.tracking.movement_threshold,
            self.source_kind(),
            self.store.clone(),
            self.telemetry.clone(),
        );
        let telemetry = self.telemetry.clone();
        let loop_cfg = LoopConfig {
            frame_interval: Duration::from_secs_f64(1.0 / self.cfg.camera.target_fps.max(0.1)),
            reconnect_delay: Duration::from_secs(self.cfg.stream.reconnect_delay_secs),
            read_retry: Duration::from_millis(self.cfg.stream.read_retry_millis),
            max_read_failures: self.cfg.stream.max_read_failures,
        };

        let handle = thread::spawn(move || {
            run_stream_loop(processor, source, telemetry, loop_cfg, stop_rx);
        });
        *worker = Some(Worker { stop_tx, handle });
        info!("stream loop started");
    }

    /// Signal the loop to exit at its next iteration boundary and wait for
    /// it. Safe to call at any time, including before `start`.
    pub fn stop(&self) {
        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(w) = worker {
            let _ = w.stop_tx.send(true);
            if w.handle.join().is_err() {
                warn!("stream loop thread panicked");
            }
            info!("stream loop stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|w| !w.handle.is_finished())
            .unwrap_or(false)
    }

    // ── Read surface ────────────────────────────────────────────────────

    pub fn latest(&self) -> Option<DetectionRecord> {
        self.store.latest()
    }

    pub fn history_minutes(&self, minutes: i64) -> Vec<DetectionRecord> {
        self.store.history(chrono::Duration::minutes(minutes))
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.telemetry.snapshot()
    }

    pub fn status(&self) -> SystemStatus {
        let system_status = if !self.telemetry.loop_started_once() {
            SystemState::Initializing
        } else if self.telemetry.detector_loaded() {
            SystemState::Operational
        } else {
            SystemState::Error
        };
        SystemStatus {
            system_status,
            stream_active: self.telemetry.stream_active(),
            detector_loaded: self.telemetry.detector_loaded(),
            last_detection: self.telemetry.last_detection(),
            uptime_seconds: self.telemetry.uptime_seconds(),
        }
    }

    pub fn source_kind(&self) -> DataSource {
        match self.cfg.camera.source {
            SourceKind::Rtsp => DataSource::Rtsp,
            SourceKind::Sample => DataSource::Sample,
        }
    }

    pub fn config(&self) -> &WatchConfig {
        &self.cfg
    }

    pub fn store(&self) -> &Arc<HistoryStore> {
        &self.store
    }
}

impl Drop for DetectionService {
    fn drop(&mut self) {
        self.stop();
    }
}

struct LoopConfig {
    frame_interval: Duration,
    reconnect_delay: Duration,
    read_retry: Duration,
    max_read_failures: u32,
}

fn run_stream_loop(
    mut processor: FrameProcessor,
    mut source: Box<dyn VideoSource>,
    telemetry: Arc<StreamTelemetry>,
    cfg: LoopConfig,
    stop_rx: watch::Receiver<bool>,
) {
    telemetry.mark_loop_started();
    let mut consecutive_failures = 0u32;

    loop {
        if *stop_rx.borrow() {
            break;
        }

        if !source.is_connected() {
            telemetry.set_state(StreamState::Connecting);
            match source.connect() {
                Ok(()) => {
                    telemetry.set_stream_active(true);
                    telemetry.set_state(StreamState::Streaming);
                    consecutive_failures = 0;
                }
                Err(e) => {
                    warn!("source connect failed: {e} — retrying in {:?}", cfg.reconnect_delay);
                    telemetry.set_stream_active(false);
                    telemetry.set_state(StreamState::Disconnected);
                    if sleep_interruptible(cfg.reconnect_delay, &stop_rx) {
                        break;
                    }
                    continue;
                }
            }
        }

        match source.read_frame() {
            Ok(frame) => {
                consecutive_failures = 0;
                match processor.process(&frame) {
                    ProcessOutcome::Recorded(_) => {}
                    // Already logged at the processor; the loop just keeps
                    // going either way.
                    ProcessOutcome::NoDetector | ProcessOutcome::InferenceError => {}
                }
            }
            Err(e) => {
                consecutive_failures += 1;
                warn!(
                    "frame read failed ({consecutive_failures}/{}): {e}",
                    cfg.max_read_failures
                );
                if consecutive_failures >= cfg.max_read_failures {
                    // Repeated hiccups mean a dead source: tear down and
                    // fall back to the reconnect path.
                    source.release();
                    telemetry.set_stream_active(false);
                    telemetry.set_state(StreamState::Disconnected);
                    consecutive_failures = 0;
                } else if sleep_interruptible(cfg.read_retry, &stop_rx) {
                    break;
                }
                continue;
            }
        }

        if sleep_interruptible(cfg.frame_interval, &stop_rx) {
            break;
        }
    }

    source.release();
    telemetry.set_stream_active(false);
    telemetry.set_state(StreamState::Stopped);
}

/// Sleep in short slices so a stop signal is picked up promptly.
/// Returns true if stop was requested.
fn sleep_interruptible(duration: Duration, stop_rx: &watch::Receiver<bool>) -> bool {
    const SLICE: Duration = Duration::from_millis(50);
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        if *stop_rx.borrow() {
            return true;
        }
        let step = remaining.min(SLICE);
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
    *stop_rx.borrow()
}
