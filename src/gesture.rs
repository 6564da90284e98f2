//! Raw swipe-gesture input types.
//!
//! A [`Gesture`] is the only thing the host needs to construct to drive a
//! prediction: a timed sequence of touch samples plus the keyboard's current
//! bounding box. Everything downstream (resampling, nearest-key lookup,
//! re-ranking context) is derived from it by [`crate::trajectory`].

/// A single `(x, y, t_ms)` touch sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GesturePoint {
    pub x: f32,
    pub y: f32,
    pub t_ms: u64,
}

/// A raw swipe gesture: an ordered sequence of touch samples over a keyboard
/// of known size.
///
/// Construction does not itself validate monotonic timestamps or in-bounds
/// coordinates — that is [`crate::trajectory::extract`]'s job, since those
/// failures are reported as [`crate::error::FeatureError`] rather than at
/// construction time.
#[derive(Debug, Clone)]
pub struct Gesture {
    pub points: Vec<GesturePoint>,
    pub bbox: (f32, f32),
    pub touched_keys: Option<Vec<char>>,
}

impl Gesture {
    pub fn new(points: Vec<GesturePoint>, bbox: (f32, f32)) -> Self {
        Self {
            points,
            bbox,
            touched_keys: None,
        }
    }

    pub fn with_touched_keys(mut self, keys: Vec<char>) -> Self {
        self.touched_keys = Some(keys);
        self
    }
}
