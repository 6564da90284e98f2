//! `cleverkeys-engine` — an on-device neural swipe-typing decoder.
//!
//! Given a raw touch gesture and the keyboard layout it was drawn on, this crate turns it into
//! ranked word predictions: a trajectory encoder and an autoregressive token decoder (both
//! ONNX Runtime models) run behind a beam search, re-ranked against a frequency-weighted
//! lexicon. The public surface is [`facade::CleverKeysEngine`]; everything else is a component
//! of its pipeline.
//!
//! The library is designed to be used by both CLI tools and long-running services, with a
//! synchronous `predict` call backed by a bounded worker pipeline rather than an async runtime —
//! see [`pipeline`] for why.

pub mod beam;
pub mod config;
pub mod error;
pub mod facade;
pub mod geometry;
pub mod gesture;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod rerank;
pub mod stats;
pub mod tensor_pool;
pub mod trajectory;
pub mod vocab;

pub use config::{EngineConfig, PredictConfig};
pub use error::{
    DecoderError, EncoderError, FeatureError, InitError, InitResult, PredictionError,
    PredictionResult,
};
pub use facade::{CleverKeysEngine, EngineInit};
pub use geometry::{KeyLayout, KeySlot};
pub use gesture::{Gesture, GesturePoint};
pub use rerank::RankedPrediction;
