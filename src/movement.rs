//! Movement analysis — aggregate herd direction from per-track displacement.
//!
//! Each track seen in both the previous and the current frame contributes
//! its center delta, provided the delta clears the noise threshold on at
//! least one axis. The mean delta over contributing tracks picks the
//! direction; the horizontal axis wins only when strictly dominant, so an
//! exact diagonal resolves vertical.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::records::TrackSample;

/// Last-known track centers, keyed by track id. Replaced wholesale every
/// frame — ids absent from the current frame are dropped, not carried.
pub type PositionMap = HashMap<i64, (f32, f32)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementDirection {
    North,
    South,
    East,
    West,
    Stationary,
}

/// Correlate the current frame's samples against the previous frame's
/// positions. Pure: returns the aggregate direction and the replacement
/// position map; the caller owns swapping its stored map.
pub fn correlate(
    samples: &[TrackSample],
    previous: &PositionMap,
    threshold: f32,
) -> (MovementDirection, PositionMap) {
    let next: PositionMap = samples.iter().map(|s| (s.track_id, s.center)).collect();

    if previous.is_empty() {
        return (MovementDirection::Stationary, next);
    }

    let mut total_dx = 0.0f32;
    let mut total_dy = 0.0f32;
    let mut contributing = 0u32;

    for sample in samples {
        if let Some(&(px, py)) = previous.get(&sample.track_id) {
            let dx = sample.center.0 - px;
            let dy = sample.center.1 - py;

            // Sub-threshold jitter on both axes does not count.
            if dx.abs() > threshold || dy.abs() > threshold {
                total_dx += dx;
                total_dy += dy;
                contributing += 1;
            }
        }
    }

    if contributing == 0 {
        return (MovementDirection::Stationary, next);
    }

    let avg_dx = total_dx / contributing as f32;
    let avg_dy = total_dy / contributing as f32;

    let direction = if avg_dx.abs() > avg_dy.abs() {
        if avg_dx > 0.0 {
            MovementDirection::East
        } else {
            MovementDirection::West
        }
    } else if avg_dy > 0.0 {
        MovementDirection::South
    } else {
        MovementDirection::North
    };

    (direction, next)
}
