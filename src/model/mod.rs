//! The tensor runtime: encoder session and decoder session.
//!
//! Both are expressed as traits so the beam search and pipeline code can run against
//! an in-memory fake in tests instead of an on-disk ONNX file.

pub mod decoder;
pub mod encoder;

pub use decoder::{DecoderSession, OrtDecoderSession};
pub use encoder::{EncoderSession, OrtEncoderSession};
