//! Detection capability boundary: tracking-mode inference over one frame.
//!
//! The live implementation (feature `vision`) runs a YOLOv8 ONNX model via
//! ort and assigns persistent integer track ids across frames with greedy
//! IoU matching, so downstream correlation always sees stable identities.

use anyhow::Result;

use crate::capture::Frame;

/// One raw box out of the model, before any class/confidence filtering.
#[derive(Debug, Clone)]
pub struct RawBox {
    pub class_id: u32,
    pub confidence: f32,
    /// (x1, y1, x2, y2) in frame pixels.
    pub bbox: [f32; 4],
    /// Persistent id when the tracker holds the object; None when tracking
    /// could not associate this box.
    pub track_id: Option<i64>,
}

/// One inference result set. Tracking-mode backends emit one per frame.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub boxes: Vec<RawBox>,
}

pub trait Detector: Send {
    fn infer_and_track(&mut self, frame: &Frame) -> Result<Vec<ResultSet>>;
}

#[cfg(feature = "vision")]
pub use onnx::OnnxDetector;

#[cfg(feature = "vision")]
mod onnx {
    use anyhow::{anyhow, Result};
    use ndarray::Array4;
    use opencv::{core::Mat, imgproc, prelude::*};
    use ort::session::Session;
    use tracing::debug;

    use super::{Detector, RawBox, ResultSet};
    use crate::capture::Frame;

    /// YOLOv8 wrapper using ONNX Runtime, plus the IoU track-id assigner.
    pub struct OnnxDetector {
        session: Session,
        input_size: usize,
        conf_threshold: f32,
        iou_threshold: f32,
        assigner: TrackIdAssigner,
    }

    impl OnnxDetector {
        pub fn load(
            model_path: &str,
            conf_threshold: f32,
            iou_threshold: f32,
        ) -> Result<Self> {
            let session = Session::builder()?
                .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
                .with_intra_threads(2)?
                .commit_from_file(model_path)?;

            Ok(Self {
                session,
                input_size: 640,
                conf_threshold,
                iou_threshold,
                assigner: TrackIdAssigner::new(iou_threshold, 30),
            })
        }

        fn decode(&self, frame: &Frame) -> Result<Vec<RawBox>> {
            let sz = self.input_size as i32;
            let mat = frame_to_mat(frame)?;
            let (letterboxed, scale, pad_x, pad_y) = letterbox(&mat, sz)?;

            let mut rgb = Mat::default();
            imgproc::cvt_color(&letterboxed, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
            let data = mat_to_chw_f32(&rgb, self.input_size)?;
            let array = Array4::from_shape_vec((1, 3, self.input_size, self.input_size), data)?;

            let outputs = self.session.run(ort::inputs!["images" => array.view()]?)?;

            // Output shape [1, 4 + classes, boxes].
            let output = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| anyhow!("failed to extract output tensor: {e}"))?;
            let shape = output.shape();
            let num_boxes = shape[2];
            let num_classes = shape[1] - 4;

            let frame_w = frame.width as f32;
            let frame_h = frame.height as f32;

            let mut boxes = Vec::new();
            for i in 0..num_boxes {
                let cx = output[[0, 0, i]];
                let cy = output[[0, 1, i]];
                let bw = output[[0, 2, i]];
                let bh = output[[0, 3, i]];

                let mut max_score = 0f32;
                let mut max_class = 0usize;
                for c in 0..num_classes {
                    let score = output[[0, 4 + c, i]];
                    if score > max_score {
                        max_score = score;
                        max_class = c;
                    }
                }
                if max_score < self.conf_threshold {
                    continue;
                }

                // Undo the letterbox: back to source-pixel coordinates.
                let x1 = ((cx - bw / 2.0 - pad_x as f32) / scale as f32).clamp(0.0, frame_w);
                let y1 = ((cy - bh / 2.0 - pad_y as f32) / scale as f32).clamp(0.0, frame_h);
                let x2 = ((cx + bw / 2.0 - pad_x as f32) / scale as f32).clamp(0.0, frame_w);
                let y2 = ((cy + bh / 2.0 - pad_y as f32) / scale as f32).clamp(0.0, frame_h);

                boxes.push(RawBox {
                    class_id: max_class as u32,
                    confidence: max_score,
                    bbox: [x1, y1, x2, y2],
                    track_id: None,
                });
            }

            Ok(nms(boxes, self.iou_threshold))
        }
    }

    impl Detector for OnnxDetector {
        fn infer_and_track(&mut self, frame: &Frame) -> Result<Vec<ResultSet>> {
            let mut boxes = self.decode(frame)?;
            self.assigner.assign(&mut boxes);
            debug!("inference: {} boxes after NMS", boxes.len());
            Ok(vec![ResultSet { boxes }])
        }
    }

    // ── Track id assignment ─────────────────────────────────────────────

    struct TrackedBox {
        id: i64,
        bbox: [f32; 4],
        age: u32,
    }

    /// Greedy IoU matcher carrying integer ids across frames. Unmatched
    /// tracks age out after `max_age` frames.
    struct TrackIdAssigner {
        tracks: Vec<TrackedBox>,
        next_id: i64,
        iou_threshold: f32,
        max_age: u32,
    }

    impl TrackIdAssigner {
        fn new(iou_threshold: f32, max_age: u32) -> Self {
            Self {
                tracks: Vec::new(),
                next_id: 1,
                iou_threshold,
                max_age,
            }
        }

        fn assign(&mut self, boxes: &mut [RawBox]) {
            let mut pairs: Vec<(usize, usize, f32)> = Vec::new();
            for (ti, track) in self.tracks.iter().enumerate() {
                for (bi, b) in boxes.iter().enumerate() {
                    let iou = compute_iou(track.bbox, b.bbox);
                    if iou >= self.iou_threshold {
                        pairs.push((ti, bi, iou));
                    }
                }
            }
            pairs.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

            let mut track_matched = vec![false; self.tracks.len()];
            let mut box_matched = vec![false; boxes.len()];
            for (ti, bi, _) in pairs {
                if track_matched[ti] || box_matched[bi] {
                    continue;
                }
                track_matched[ti] = true;
                box_matched[bi] = true;
                self.tracks[ti].bbox = boxes[bi].bbox;
                self.tracks[ti].age = 0;
                boxes[bi].track_id = Some(self.tracks[ti].id);
            }

            for (bi, b) in boxes.iter_mut().enumerate() {
                if box_matched[bi] {
                    continue;
                }
                let id = self.next_id;
                self.next_id += 1;
                b.track_id = Some(id);
                self.tracks.push(TrackedBox {
                    id,
                    bbox: b.bbox,
                    age: 0,
                });
            }

            for (ti, track) in self.tracks.iter_mut().enumerate() {
                if !track_matched.get(ti).copied().unwrap_or(false) {
                    track.age += 1;
                }
            }
            let max_age = self.max_age;
            self.tracks.retain(|t| t.age <= max_age);
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    fn compute_iou(a: [f32; 4], b: [f32; 4]) -> f32 {
        let x1 = a[0].max(b[0]);
        let y1 = a[1].max(b[1]);
        let x2 = a[2].min(b[2]);
        let y2 = a[3].min(b[3]);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let area_a = (a[2] - a[0]) * (a[3] - a[1]);
        let area_b = (b[2] - b[0]) * (b[3] - b[1]);
        let union = area_a + area_b - inter;

        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Per-class greedy NMS, highest confidence first.
    fn nms(mut boxes: Vec<RawBox>, iou_threshold: f32) -> Vec<RawBox> {
        boxes.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut kept: Vec<RawBox> = Vec::new();
        for b in boxes {
            let overlaps = kept.iter().any(|k| {
                k.class_id == b.class_id && compute_iou(k.bbox, b.bbox) > iou_threshold
            });
            if !overlaps {
                kept.push(b);
            }
        }
        kept
    }

    fn frame_to_mat(frame: &Frame) -> Result<Mat> {
        let mat = unsafe {
            Mat::new_rows_cols_with_data_unsafe(
                frame.height as i32,
                frame.width as i32,
                opencv::core::CV_8UC3,
                frame.data.as_ptr() as *mut _,
                opencv::core::Mat_AUTO_STEP,
            )?
        };
        let mut owned = Mat::default();
        mat.copy_to(&mut owned)?;
        Ok(owned)
    }

    /// Letterbox resize: fit image into `target×target` with grey padding.
    fn letterbox(src: &Mat, target: i32) -> Result<(Mat, f64, i32, i32)> {
        use opencv::core::{Scalar, Size};

        let w = src.cols();
        let h = src.rows();
        let scale = (target as f64 / w.max(h) as f64).min(1.0);
        let new_w = (w as f64 * scale) as i32;
        let new_h = (h as f64 * scale) as i32;

        let mut resized = Mat::default();
        imgproc::resize(
            src,
            &mut resized,
            Size::new(new_w, new_h),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;

        let pad_x = (target - new_w) / 2;
        let pad_y = (target - new_h) / 2;

        let mut padded = Mat::default();
        opencv::core::copy_make_border(
            &resized,
            &mut padded,
            pad_y,
            target - new_h - pad_y,
            pad_x,
            target - new_w - pad_x,
            opencv::core::BORDER_CONSTANT,
            Scalar::new(114.0, 114.0, 114.0, 0.0), // standard YOLOv8 grey padding
        )?;

        Ok((padded, scale, pad_x, pad_y))
    }

    /// HWC Mat → CHW Vec<f32> normalised to [0,1].
    fn mat_to_chw_f32(mat: &Mat, size: usize) -> Result<Vec<f32>> {
        let total = 3 * size * size;
        let mut out = vec![0f32; total];
        let data = mat.data_bytes()?;

        for h in 0..size {
            for w in 0..size {
                let pixel_idx = (h * size + w) * 3;
                for c in 0..3usize {
                    let chw_idx = c * size * size + h * size + w;
                    out[chw_idx] = data[pixel_idx + c] as f32 / 255.0;
                }
            }
        }
        Ok(out)
    }
}
