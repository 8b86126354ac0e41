//! Synthetic sample capabilities — a deterministic stand-in for the live
//! camera and model, implementing the same source/detector traits.
//!
//! Three scripted tracks drift through a fixed direction cycle (hold, east,
//! south, hold, west, north), clamped to the frame. Lets the full pipeline,
//! the dashboard, and the integration tests run without native deps.

use anyhow::Result;

use crate::capture::{Frame, SourceError, VideoSource};
use crate::detector::{Detector, RawBox, ResultSet};

pub const SAMPLE_WIDTH: u32 = 640;
pub const SAMPLE_HEIGHT: u32 = 480;

const PHASE_LEN: u64 = 20;
const STEP: f32 = 15.0;
const DRIFT_CYCLE: [(f32, f32); 6] = [
    (0.0, 0.0),
    (STEP, 0.0),
    (0.0, STEP),
    (0.0, 0.0),
    (-STEP, 0.0),
    (0.0, -STEP),
];

/// Always-available frame source yielding empty frames at the sample
/// resolution. Connection never fails.
pub struct SampleSource {
    connected: bool,
}

impl SampleSource {
    pub fn new() -> Self {
        Self { connected: false }
    }
}

impl Default for SampleSource {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoSource for SampleSource {
    fn connect(&mut self) -> Result<(), SourceError> {
        self.connected = true;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame, SourceError> {
        if !self.connected {
            return Err(SourceError::Read("sample source not connected".into()));
        }
        Ok(Frame {
            data: Vec::new(),
            width: SAMPLE_WIDTH,
            height: SAMPLE_HEIGHT,
        })
    }

    fn release(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Scripted detector: a small herd with persistent track ids.
pub struct SampleDetector {
    tick: u64,
    target_class: u32,
    herd: Vec<(f32, f32)>,
}

impl SampleDetector {
    pub fn new(target_class: u32) -> Self {
        Self {
            tick: 0,
            target_class,
            herd: vec![(120.0, 120.0), (320.0, 240.0), (480.0, 320.0)],
        }
    }
}

impl Detector for SampleDetector {
    fn infer_and_track(&mut self, frame: &Frame) -> Result<Vec<ResultSet>> {
        let phase = ((self.tick / PHASE_LEN) % DRIFT_CYCLE.len() as u64) as usize;
        let (dx, dy) = DRIFT_CYCLE[phase];
        self.tick += 1;

        let w = frame.width as f32;
        let h = frame.height as f32;

        let boxes = self
            .herd
            .iter_mut()
            .enumerate()
            .map(|(i, pos)| {
                pos.0 = (pos.0 + dx).clamp(40.0, w - 40.0);
                pos.1 = (pos.1 + dy).clamp(40.0, h - 40.0);
                RawBox {
                    class_id: self.target_class,
                    confidence: 0.85 + 0.03 * i as f32,
                    bbox: [pos.0 - 30.0, pos.1 - 30.0, pos.0 + 30.0, pos.1 + 30.0],
                    track_id: Some(i as i64 + 1),
                }
            })
            .collect();

        Ok(vec![ResultSet { boxes }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_source_reads_only_while_connected() {
        let mut source = SampleSource::new();
        assert!(source.read_frame().is_err());

        source.connect().unwrap();
        assert!(source.is_connected());
        let frame = source.read_frame().unwrap();
        assert_eq!((frame.width, frame.height), (SAMPLE_WIDTH, SAMPLE_HEIGHT));

        source.release();
        assert!(!source.is_connected());
        assert!(source.read_frame().is_err());
    }

    #[test]
    fn sample_detector_keeps_stable_track_ids() {
        let mut detector = SampleDetector::new(0);
        let frame = Frame {
            data: Vec::new(),
            width: SAMPLE_WIDTH,
            height: SAMPLE_HEIGHT,
        };

        let first = detector.infer_and_track(&frame).unwrap();
        let second = detector.infer_and_track(&frame).unwrap();
        let ids = |sets: &[ResultSet]| -> Vec<i64> {
            sets[0].boxes.iter().filter_map(|b| b.track_id).collect()
        };
        assert_eq!(ids(&first), vec![1, 2, 3]);
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn sample_detector_moves_east_in_the_east_phase() {
        let mut detector = SampleDetector::new(0);
        let frame = Frame {
            data: Vec::new(),
            width: SAMPLE_WIDTH,
            height: SAMPLE_HEIGHT,
        };

        // Skip the initial hold phase.
        for _ in 0..PHASE_LEN {
            detector.infer_and_track(&frame).unwrap();
        }
        let before = detector.herd[0];
        detector.infer_and_track(&frame).unwrap();
        let after = detector.herd[0];
        assert!(after.0 > before.0);
        assert_eq!(after.1, before.1);
    }
}
