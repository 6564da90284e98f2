//! Per-call and per-engine configuration.
//!
//! `PredictConfig` is a plain value type passed into [`crate::facade::CleverKeysEngine::predict`]
//! on every call — not a reactive global. `EngineConfig` sizes the long-lived resources
//! (`init`-time only): the tensor pool and the pipeline's bounded queues.

use serde::{Deserialize, Serialize};

use crate::error::PredictionError;

/// Options that control a single `predict` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictConfig {
    /// Beam search width. Range `1..=16`.
    pub beam_width: usize,

    /// Maximum decoder steps, not counting `SOS`. Range `10..=50`.
    pub max_len: usize,

    /// Minimum per-beam normalized confidence for a beam to be returned. Range `0.0..=1.0`.
    pub confidence_threshold: f32,

    /// Fixed decoder token window `T`. Must be `>= max_len + 1`.
    pub seq_window: usize,
}

impl Default for PredictConfig {
    fn default() -> Self {
        Self {
            beam_width: 8,
            max_len: 35,
            confidence_threshold: 0.1,
            seq_window: 36,
        }
    }
}

impl PredictConfig {
    /// Validate the configuration's ranges, returning a descriptive error on the first
    /// violation found.
    pub fn validate(&self) -> Result<(), PredictionError> {
        if !(1..=16).contains(&self.beam_width) {
            return Err(PredictionError::InvalidGesture(format!(
                "beam_width must be in 1..=16, got {}",
                self.beam_width
            )));
        }
        if !(10..=50).contains(&self.max_len) {
            return Err(PredictionError::InvalidGesture(format!(
                "max_len must be in 10..=50, got {}",
                self.max_len
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(PredictionError::InvalidGesture(format!(
                "confidence_threshold must be in 0.0..=1.0, got {}",
                self.confidence_threshold
            )));
        }
        if self.seq_window < self.max_len + 1 {
            return Err(PredictionError::InvalidGesture(format!(
                "seq_window ({}) must be >= max_len + 1 ({})",
                self.seq_window,
                self.max_len + 1
            )));
        }
        Ok(())
    }
}

/// Options that size the engine's long-lived resources. Only consulted at [`init`].
///
/// [`init`]: crate::facade::CleverKeysEngine::init
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-shape bound on the tensor pool (`MAX_POOL_PER_SHAPE`). Must be `>= 1`.
    pub pool_cap_per_shape: usize,

    /// Bound on each pipeline queue (`queue_cap`). Must be `>= 1`.
    pub queue_cap: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_cap_per_shape: 16,
            queue_cap: 4,
        }
    }
}
