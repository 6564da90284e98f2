//! Keyboard key geometry and nearest-key lookup.
//!
//! The layout (key centers, sizes) can change at any time — the user might rotate the device or
//! switch layouts mid-session — so it lives behind a [`GeometrySlot`]: a `RwLock<Arc<KeyLayout>>`
//! that lets `set_layout` swap the whole layout atomically while in-flight jobs keep working
//! against the `Arc` snapshot they took at submission time.

use std::sync::{Arc, RwLock};

use crate::vocab::tokenizer::Tokenizer;

/// A single key's center position and half-extent, in the same coordinate space as
/// [`crate::gesture::Gesture`] points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeySlot {
    pub ch: char,
    pub cx: f32,
    pub cy: f32,
    pub half_w: f32,
    pub half_h: f32,
}

/// The full set of key positions for one keyboard layout.
#[derive(Debug, Clone)]
pub struct KeyLayout {
    keys: Vec<KeySlot>,
}

impl KeyLayout {
    pub fn new(keys: Vec<KeySlot>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &[KeySlot] {
        &self.keys
    }

    /// The key whose center is nearest `(x, y)` by squared Euclidean distance.
    ///
    /// Ties (equal distance) are broken by the smaller token id, via `tokenizer`, so the
    /// result is deterministic regardless of `keys`' insertion order.
    pub fn nearest_key(&self, x: f32, y: f32, tokenizer: &Tokenizer) -> Option<char> {
        let mut best: Option<(f32, i64, char)> = None;
        for slot in &self.keys {
            let Some(id) = tokenizer.id_for_char(slot.ch) else {
                continue;
            };
            let dx = slot.cx - x;
            let dy = slot.cy - y;
            let dist_sq = dx * dx + dy * dy;
            let candidate = (dist_sq, id, slot.ch);
            best = Some(match best {
                None => candidate,
                Some(current) if candidate.0 < current.0 => candidate,
                Some(current) if candidate.0 == current.0 && candidate.1 < current.1 => candidate,
                Some(current) => current,
            });
        }
        best.map(|(_, _, ch)| ch)
    }

    /// Index of [`nearest_key`](Self::nearest_key) within [`keys`](Self::keys), for building the
    /// nearest-key-index tensor input directly without a second lookup pass.
    pub fn nearest_key_index(&self, x: f32, y: f32, tokenizer: &Tokenizer) -> Option<usize> {
        let ch = self.nearest_key(x, y, tokenizer)?;
        self.keys.iter().position(|slot| slot.ch == ch)
    }
}

/// Holds the currently-active [`KeyLayout`] behind a lock, so it can be replaced without
/// interrupting in-flight work.
#[derive(Debug)]
pub struct GeometrySlot {
    current: RwLock<Arc<KeyLayout>>,
}

impl GeometrySlot {
    pub fn new(layout: KeyLayout) -> Self {
        Self {
            current: RwLock::new(Arc::new(layout)),
        }
    }

    /// Atomically replace the active layout. In-flight jobs that already took a [`snapshot`]
    /// keep using the layout they started with.
    ///
    /// [`snapshot`]: Self::snapshot
    pub fn set_layout(&self, layout: KeyLayout) {
        let mut guard = self.current.write().expect("geometry lock poisoned");
        *guard = Arc::new(layout);
    }

    /// A cheap `Arc` clone of the layout active right now, to be captured by a job before it
    /// crosses into the pipeline.
    pub fn snapshot(&self) -> Arc<KeyLayout> {
        Arc::clone(&self.current.read().expect("geometry lock poisoned"))
    }
}
