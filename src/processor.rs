//! Frame processor — one capture-to-record cycle.
//!
//! Runs tracking-mode inference, filters to the target class, correlates
//! tracks against the previous frame, and appends an immutable record to
//! history. Inference failures are contained here: the loop above only
//! ever sees a typed outcome, never a propagated error.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::capture::Frame;
use crate::detector::Detector;
use crate::movement::{correlate, PositionMap};
use crate::records::{DataSource, DetectionRecord, TrackSample};
use crate::store::HistoryStore;
use crate::telemetry::StreamTelemetry;

/// What one processing attempt produced. Distinguishes "no capability
/// loaded" from "inference errored" so callers and tests can tell them
/// apart; both leave history and counters untouched.
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    Recorded(DetectionRecord),
    NoDetector,
    InferenceError,
}

pub struct FrameProcessor {
    detector: Option<Box<dyn Detector>>,
    positions: PositionMap,
    target_class: u32,
    confidence_threshold: f32,
    movement_threshold: f32,
    source: DataSource,
    store: Arc<HistoryStore>,
    telemetry: Arc<StreamTelemetry>,
}

impl FrameProcessor {
    pub fn new(
        detector: Option<Box<dyn Detector>>,
        target_class: u32,
        confidence_threshold: f32,
        movement_threshold: f32,
        source: DataSource,
        store: Arc<HistoryStore>,
        telemetry: Arc<StreamTelemetry>,
    ) -> Self {
        telemetry.set_detector_loaded(detector.is_some());
        Self {
            detector,
            positions: PositionMap::new(),
            target_class,
            confidence_threshold,
            movement_threshold,
            source,
            store,
            telemetry,
        }
    }

    pub fn process(&mut self, frame: &Frame) -> ProcessOutcome {
        let Some(detector) = self.detector.as_mut() else {
            return ProcessOutcome::NoDetector;
        };

        let result_sets = match detector.infer_and_track(frame) {
            Ok(sets) => sets,
            Err(e) => {
                warn!("inference failed, skipping frame: {e:#}");
                return ProcessOutcome::InferenceError;
            }
        };

        // Velocity is looked up against the *prior* map, before the
        // correlator replaces it.
        let mut samples = Vec::new();
        for set in &result_sets {
            for b in &set.boxes {
                if b.class_id != self.target_class || b.confidence < self.confidence_threshold {
                    continue;
                }
                // Movement needs tracking-mode output; untracked boxes are
                // dropped entirely.
                let Some(track_id) = b.track_id else {
                    continue;
                };
                let center = TrackSample::center_of(b.bbox);
                let velocity = self
                    .positions
                    .get(&track_id)
                    .map(|&(px, py)| (center.0 - px, center.1 - py));
                samples.push(TrackSample {
                    track_id,
                    bbox: b.bbox,
                    confidence: b.confidence,
                    center,
                    velocity,
                });
            }
        }

        let object_count = samples.len() as u32;
        let (movement, next_positions) =
            correlate(&samples, &self.positions, self.movement_threshold);
        self.positions = next_positions;

        let (_, throughput_fps) = self.telemetry.record_frame();
        let now = Utc::now();
        let record = DetectionRecord {
            timestamp: now,
            object_count,
            movement,
            throughput_fps,
            source: self.source,
        };

        self.store.append(record.clone());
        self.telemetry.stamp_last_detection(now);
        if object_count > 0 {
            self.telemetry.record_detection();
            info!(
                "detected {} bison, movement {:?}, {:.1} fps",
                object_count, movement, throughput_fps
            );
        }

        ProcessOutcome::Recorded(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{RawBox, ResultSet};
    use crate::movement::MovementDirection;
    use anyhow::anyhow;

    const TARGET: u32 = 0;
    const CONFIDENCE: f32 = 0.25;
    const THRESHOLD: f32 = 10.0;

    /// Feeds a fixed per-call script of raw boxes.
    struct ScriptedDetector {
        script: Vec<Vec<RawBox>>,
        call: usize,
    }

    impl Detector for ScriptedDetector {
        fn infer_and_track(&mut self, _frame: &Frame) -> anyhow::Result<Vec<ResultSet>> {
            let boxes = self.script.get(self.call).cloned().unwrap_or_default();
            self.call += 1;
            Ok(vec![ResultSet { boxes }])
        }
    }

    struct FailingDetector;

    impl Detector for FailingDetector {
        fn infer_and_track(&mut self, _frame: &Frame) -> anyhow::Result<Vec<ResultSet>> {
            Err(anyhow!("model exploded"))
        }
    }

    fn raw(track_id: Option<i64>, cx: f32, cy: f32, class_id: u32, confidence: f32) -> RawBox {
        RawBox {
            class_id,
            confidence,
            bbox: [cx - 10.0, cy - 10.0, cx + 10.0, cy + 10.0],
            track_id,
        }
    }

    fn frame() -> Frame {
        Frame {
            data: Vec::new(),
            width: 640,
            height: 480,
        }
    }

    fn processor_with(
        detector: Option<Box<dyn Detector>>,
    ) -> (FrameProcessor, Arc<HistoryStore>, Arc<StreamTelemetry>) {
        let store = Arc::new(HistoryStore::new(64));
        let telemetry = Arc::new(StreamTelemetry::new());
        telemetry.mark_loop_started();
        let processor = FrameProcessor::new(
            detector,
            TARGET,
            CONFIDENCE,
            THRESHOLD,
            DataSource::Sample,
            store.clone(),
            telemetry.clone(),
        );
        (processor, store, telemetry)
    }

    #[test]
    fn no_detector_leaves_history_and_counters_untouched() {
        let (mut processor, store, telemetry) = processor_with(None);
        for _ in 0..5 {
            assert!(matches!(processor.process(&frame()), ProcessOutcome::NoDetector));
        }
        assert!(store.is_empty());
        assert_eq!(telemetry.frames_processed(), 0);
        assert!(!telemetry.detector_loaded());
    }

    #[test]
    fn inference_error_is_contained_and_counts_nothing() {
        let (mut processor, store, telemetry) = processor_with(Some(Box::new(FailingDetector)));
        assert!(matches!(processor.process(&frame()), ProcessOutcome::InferenceError));
        assert!(store.is_empty());
        assert_eq!(telemetry.frames_processed(), 0);
    }

    #[test]
    fn confidence_boundary_is_inclusive() {
        let script = vec![vec![
            raw(Some(1), 100.0, 100.0, TARGET, CONFIDENCE),
            raw(Some(2), 200.0, 200.0, TARGET, CONFIDENCE - 0.001),
        ]];
        let (mut processor, _, _) =
            processor_with(Some(Box::new(ScriptedDetector { script, call: 0 })));

        let ProcessOutcome::Recorded(record) = processor.process(&frame()) else {
            panic!("expected a record");
        };
        assert_eq!(record.object_count, 1);
    }

    #[test]
    fn off_class_and_untracked_boxes_are_dropped() {
        let script = vec![vec![
            raw(Some(1), 100.0, 100.0, TARGET, 0.9),
            raw(Some(2), 150.0, 150.0, TARGET + 3, 0.9),
            raw(None, 200.0, 200.0, TARGET, 0.9),
        ]];
        let (mut processor, _, _) =
            processor_with(Some(Box::new(ScriptedDetector { script, call: 0 })));

        let ProcessOutcome::Recorded(record) = processor.process(&frame()) else {
            panic!("expected a record");
        };
        assert_eq!(record.object_count, 1);
    }

    #[test]
    fn three_frame_scenario_yields_stationary_east_stationary() {
        let script = vec![
            vec![raw(Some(1), 100.0, 100.0, TARGET, 0.9)],
            vec![raw(Some(1), 130.0, 100.0, TARGET, 0.9)],
            vec![raw(Some(1), 130.0, 100.0, TARGET, 0.9)],
        ];
        let (mut processor, store, telemetry) =
            processor_with(Some(Box::new(ScriptedDetector { script, call: 0 })));

        let mut movements = Vec::new();
        for _ in 0..3 {
            let ProcessOutcome::Recorded(record) = processor.process(&frame()) else {
                panic!("expected a record");
            };
            assert_eq!(record.object_count, 1);
            movements.push(record.movement);
        }
        assert_eq!(
            movements,
            vec![
                MovementDirection::Stationary,
                MovementDirection::East,
                MovementDirection::Stationary,
            ]
        );
        assert_eq!(store.len(), 3);
        assert_eq!(telemetry.frames_processed(), 3);
        assert_eq!(telemetry.snapshot().total_detections, 3);
    }

    #[test]
    fn position_map_is_replaced_wholesale_each_frame() {
        let script = vec![
            vec![
                raw(Some(4), 100.0, 100.0, TARGET, 0.9),
                raw(Some(5), 300.0, 300.0, TARGET, 0.9),
            ],
            vec![raw(Some(4), 112.0, 95.0, TARGET, 0.9)],
        ];
        let (mut processor, _, _) =
            processor_with(Some(Box::new(ScriptedDetector { script, call: 0 })));

        processor.process(&frame());
        assert_eq!(processor.positions.len(), 2);

        // Track 5 vanished; it must be dropped, not carried forward.
        processor.process(&frame());
        assert_eq!(processor.positions.len(), 1);
        assert_eq!(processor.positions.get(&4), Some(&(112.0, 95.0)));
    }

    #[test]
    fn empty_inference_yields_zero_count_stationary_record() {
        let script = vec![vec![]];
        let (mut processor, store, telemetry) =
            processor_with(Some(Box::new(ScriptedDetector { script, call: 0 })));

        let ProcessOutcome::Recorded(record) = processor.process(&frame()) else {
            panic!("expected a record");
        };
        assert_eq!(record.object_count, 0);
        assert_eq!(record.movement, MovementDirection::Stationary);
        assert_eq!(store.len(), 1);
        // A processed empty frame counts as a frame but not a detection.
        assert_eq!(telemetry.frames_processed(), 1);
        assert_eq!(telemetry.snapshot().total_detections, 0);
    }
}
