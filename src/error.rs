use thiserror::Error;

/// Errors that can occur while loading models, a tokenizer, or lexicon files.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid tokenizer file: {0}")]
    InvalidTokenizer(String),

    #[error("invalid lexicon file: {0}")]
    InvalidLexicon(String),

    #[error("model I/O shape mismatch: {0}")]
    Shape(String),

    #[error("ONNX Runtime error: {0}")]
    Ort(String),
}

/// Errors raised while turning raw gesture samples into a fixed-shape feature tensor.
///
/// Internal to [`crate::trajectory`]; the facade maps these into
/// [`PredictionError::InvalidGesture`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FeatureError {
    #[error("gesture has fewer than 2 samples")]
    TooShort,

    #[error("gesture timestamps are not non-decreasing")]
    BadTime,
}

/// Errors raised by the encoder session.
#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("encoder rejected input shape: {0}")]
    Shape(String),

    #[error("ONNX Runtime error: {0}")]
    Ort(String),
}

/// Errors raised by the decoder session or the beam search loop driving it.
#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("decoder rejected input shape: {0}")]
    Shape(String),

    #[error("decoder produced non-finite logits")]
    NonFinite,

    #[error("ONNX Runtime error: {0}")]
    Ort(String),
}

/// The crate-wide error type returned by [`crate::facade::CleverKeysEngine::predict`].
#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("engine is not initialized (or a worker has panicked and must be re-initialized)")]
    NotInitialized,

    #[error("invalid gesture: {0}")]
    InvalidGesture(String),

    #[error("prediction was cancelled")]
    Cancelled,

    #[error(transparent)]
    Encoder(#[from] EncoderError),

    #[error(transparent)]
    Decoder(#[from] DecoderError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<FeatureError> for PredictionError {
    fn from(err: FeatureError) -> Self {
        PredictionError::InvalidGesture(err.to_string())
    }
}

pub type InitResult<T> = std::result::Result<T, InitError>;
pub type PredictionResult<T> = std::result::Result<T, PredictionError>;
