//! Turns a raw [`Gesture`] into the fixed-shape feature arrays the encoder consumes.
//!
//! Three things happen here, in order: validation, resampling to a fixed length, and
//! finite-difference derivative computation. The resampling strategy is arc-length-uniform
//! (points are placed at equal distances along the path, not at equal time steps) rather than
//! time-uniform — swipe hardware samples at uneven intervals, and arc-length spacing is robust
//! to that jitter in a way time spacing is not. This was an explicit open design choice; it is
//! frozen here and should not be revisited per-call.

use crate::error::FeatureError;
use crate::geometry::KeyLayout;
use crate::gesture::Gesture;
use crate::vocab::tokenizer::Tokenizer;

/// Fixed sequence length the encoder's tensors are shaped to.
pub const SEQ_LEN: usize = 150;

/// The feature arrays derived from one gesture, each of length [`SEQ_LEN`].
#[derive(Debug, Clone)]
pub struct TrajectoryFeatures {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub vx: Vec<f32>,
    pub vy: Vec<f32>,
    pub ax: Vec<f32>,
    pub ay: Vec<f32>,
    /// Nearest-key token id at each position, used as the `nearest_keys` encoder input.
    pub nearest_key_ids: Vec<i64>,
    /// `true` for real (non-padding) positions.
    pub src_mask: Vec<bool>,
    /// Number of real (non-padding) positions, `<= SEQ_LEN`.
    pub actual_len: usize,
    /// Total path length in pixel (keyboard-space) coordinates, for the re-ranker's length
    /// prior, which is calibrated against a pixels-per-character constant.
    pub path_length: f32,
    /// Gesture duration in seconds, for the re-ranker's context prior.
    pub duration_s: f32,
}

impl TrajectoryFeatures {
    /// Flatten `x`/`y`/`vx`/`vy`/`ax`/`ay` into the `[SEQ_LEN, 6]` row-major layout the encoder
    /// expects.
    pub fn to_flat_rows(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(SEQ_LEN * 6);
        for i in 0..SEQ_LEN {
            out.push(self.x[i]);
            out.push(self.y[i]);
            out.push(self.vx[i]);
            out.push(self.vy[i]);
            out.push(self.ax[i]);
            out.push(self.ay[i]);
        }
        out
    }
}

/// Validate and featurize `gesture` against the key layout in effect when the job was
/// submitted.
pub fn extract(
    gesture: &Gesture,
    layout: &KeyLayout,
    tokenizer: &Tokenizer,
) -> Result<TrajectoryFeatures, FeatureError> {
    if gesture.points.len() < 2 {
        return Err(FeatureError::TooShort);
    }
    if !gesture.points.windows(2).all(|w| w[1].t_ms >= w[0].t_ms) {
        return Err(FeatureError::BadTime);
    }

    let (bbox_w, bbox_h) = gesture.bbox;
    let normalized: Vec<(f32, f32)> = gesture
        .points
        .iter()
        .map(|p| {
            (
                (p.x / bbox_w).clamp(0.0, 1.0),
                (p.y / bbox_h).clamp(0.0, 1.0),
            )
        })
        .collect();

    // In pixel space, not the [0,1]-normalized space `xs`/`ys` end up in below: the re-ranker's
    // length prior compares this against a pixels-per-character constant, which only makes
    // sense at the keyboard's native scale.
    let path_length = gesture
        .points
        .windows(2)
        .map(|w| {
            let x0 = w[0].x.clamp(0.0, bbox_w);
            let y0 = w[0].y.clamp(0.0, bbox_h);
            let x1 = w[1].x.clamp(0.0, bbox_w);
            let y1 = w[1].y.clamp(0.0, bbox_h);
            ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt()
        })
        .sum();

    let duration_s = (gesture.points.last().unwrap().t_ms - gesture.points[0].t_ms) as f32
        / 1000.0;

    let (xs, ys, actual_len) = if normalized.len() >= SEQ_LEN {
        let (xs, ys) = resample_arc_length_uniform(&normalized, SEQ_LEN);
        (xs, ys, SEQ_LEN)
    } else {
        let actual_len = normalized.len();
        let (mut xs, mut ys): (Vec<f32>, Vec<f32>) = normalized.into_iter().unzip();
        let (last_x, last_y) = (xs[actual_len - 1], ys[actual_len - 1]);
        xs.resize(SEQ_LEN, last_x);
        ys.resize(SEQ_LEN, last_y);
        (xs, ys, actual_len)
    };

    let (vx, vy) = finite_difference(&xs, &ys);
    let (ax, ay) = finite_difference(&vx, &vy);

    let nearest_key_ids: Vec<i64> = xs
        .iter()
        .zip(ys.iter())
        .map(|(&x, &y)| {
            layout
                .nearest_key(x * bbox_w, y * bbox_h, tokenizer)
                .and_then(|ch| tokenizer.id_for_char(ch))
                .unwrap_or(crate::vocab::tokenizer::UNK)
        })
        .collect();

    let src_mask = (0..SEQ_LEN).map(|i| i < actual_len).collect();

    Ok(TrajectoryFeatures {
        x: xs,
        y: ys,
        vx,
        vy,
        ax,
        ay,
        nearest_key_ids,
        src_mask,
        actual_len,
        path_length,
        duration_s,
    })
}

/// Resample `points` to exactly `target_len` samples, placed at equal arc-length intervals
/// along the polyline through `points`.
fn resample_arc_length_uniform(points: &[(f32, f32)], target_len: usize) -> (Vec<f32>, Vec<f32>) {
    let mut cumulative = Vec::with_capacity(points.len());
    cumulative.push(0.0f32);
    for w in points.windows(2) {
        let (x0, y0) = w[0];
        let (x1, y1) = w[1];
        let seg = ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt();
        cumulative.push(cumulative.last().unwrap() + seg);
    }
    let total = *cumulative.last().unwrap();

    let mut xs = Vec::with_capacity(target_len);
    let mut ys = Vec::with_capacity(target_len);

    if total == 0.0 {
        // Degenerate gesture: every point is identical. Replicate it.
        let (x, y) = points[0];
        xs.resize(target_len, x);
        ys.resize(target_len, y);
        return (xs, ys);
    }

    let mut seg_idx = 0usize;
    for i in 0..target_len {
        let target_dist = total * (i as f32) / (target_len as f32 - 1.0);
        while seg_idx + 2 < cumulative.len() && cumulative[seg_idx + 1] < target_dist {
            seg_idx += 1;
        }
        let seg_start = cumulative[seg_idx];
        let seg_end = cumulative[seg_idx + 1];
        let t = if seg_end > seg_start {
            (target_dist - seg_start) / (seg_end - seg_start)
        } else {
            0.0
        };
        let (x0, y0) = points[seg_idx];
        let (x1, y1) = points[seg_idx + 1];
        xs.push(x0 + (x1 - x0) * t);
        ys.push(y0 + (y1 - y0) * t);
    }

    (xs, ys)
}

/// First-order finite difference with boundary replication (the derivative at the first and
/// last index uses the same neighbor twice, rather than reaching out of bounds).
fn finite_difference(xs: &[f32], ys: &[f32]) -> (Vec<f32>, Vec<f32>) {
    let n = xs.len();
    let mut dx = vec![0.0; n];
    let mut dy = vec![0.0; n];
    for i in 0..n {
        let prev = i.saturating_sub(1);
        let next = (i + 1).min(n - 1);
        dx[i] = (xs[next] - xs[prev]) / 2.0;
        dy[i] = (ys[next] - ys[prev]) / 2.0;
    }
    (dx, dy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::KeySlot;
    use crate::gesture::GesturePoint;

    fn layout() -> KeyLayout {
        KeyLayout::new(vec![
            KeySlot { ch: 'a', cx: 0.0, cy: 0.0, half_w: 0.5, half_h: 0.5 },
            KeySlot { ch: 's', cx: 50.0, cy: 0.0, half_w: 0.5, half_h: 0.5 },
        ])
    }

    #[test]
    fn rejects_single_point_gesture() {
        let gesture = Gesture::new(vec![GesturePoint { x: 0.0, y: 0.0, t_ms: 0 }], (100.0, 100.0));
        let tok = Tokenizer::default_english();
        assert_eq!(
            extract(&gesture, &layout(), &tok).unwrap_err(),
            FeatureError::TooShort
        );
    }

    #[test]
    fn rejects_non_monotonic_time() {
        let gesture = Gesture::new(
            vec![
                GesturePoint { x: 0.0, y: 0.0, t_ms: 10 },
                GesturePoint { x: 1.0, y: 0.0, t_ms: 5 },
            ],
            (100.0, 100.0),
        );
        let tok = Tokenizer::default_english();
        assert_eq!(
            extract(&gesture, &layout(), &tok).unwrap_err(),
            FeatureError::BadTime
        );
    }

    #[test]
    fn short_gesture_pads_without_resampling() {
        let gesture = Gesture::new(
            vec![
                GesturePoint { x: 0.0, y: 0.0, t_ms: 0 },
                GesturePoint { x: 50.0, y: 0.0, t_ms: 100 },
            ],
            (100.0, 100.0),
        );
        let tok = Tokenizer::default_english();
        let features = extract(&gesture, &layout(), &tok).unwrap();
        assert_eq!(features.actual_len, 2);
        assert_eq!(features.x.len(), SEQ_LEN);
        assert_eq!(features.x[SEQ_LEN - 1], features.x[2]);
        assert!(features.src_mask[0] && features.src_mask[1]);
        assert!(!features.src_mask[2]);
    }

    #[test]
    fn long_gesture_resamples_to_fixed_length() {
        let points: Vec<GesturePoint> = (0..300)
            .map(|i| GesturePoint { x: i as f32, y: 0.0, t_ms: i as u64 })
            .collect();
        let gesture = Gesture::new(points, (300.0, 100.0));
        let tok = Tokenizer::default_english();
        let features = extract(&gesture, &layout(), &tok).unwrap();
        assert_eq!(features.actual_len, SEQ_LEN);
        assert_eq!(features.x.len(), SEQ_LEN);
        assert!(features.src_mask.iter().all(|&m| m));
    }

    #[test]
    fn finite_difference_is_zero_for_constant_series() {
        let (dx, dy) = finite_difference(&[1.0; 5], &[2.0; 5]);
        assert!(dx.iter().all(|&v| v == 0.0));
        assert!(dy.iter().all(|&v| v == 0.0));
    }
}
