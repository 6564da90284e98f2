//! The public entry point: wires every component behind [`CleverKeysEngine`].

use std::path::Path;
use std::sync::Arc;

use tracing::instrument;

use crate::config::{EngineConfig, PredictConfig};
use crate::error::{InitResult, PredictionResult};
use crate::geometry::{GeometrySlot, KeyLayout};
use crate::gesture::Gesture;
use crate::model::decoder::{DecoderSession, OrtDecoderSession};
use crate::model::encoder::{EncoderSession, OrtEncoderSession};
use crate::pipeline::{CancelToken, Scheduler};
use crate::rerank::{rerank, RankedPrediction};
use crate::stats::Stats;
use crate::tensor_pool::TensorPool;
use crate::trajectory;
use crate::vocab::{Lexicon, Tokenizer};

/// The paths and layout an engine is constructed from.
pub struct EngineInit<'a> {
    pub tokenizer_path: &'a Path,
    pub primary_lexicon_path: &'a Path,
    pub enhanced_lexicon_path: Option<&'a Path>,
    pub encoder_model_path: &'a Path,
    pub decoder_model_path: &'a Path,
    pub layout: KeyLayout,
    pub engine_config: EngineConfig,
}

/// The whole engine: vocabulary, geometry, tensor runtime, and the worker pipeline that drives
/// them, behind one synchronous `predict` call.
pub struct CleverKeysEngine {
    tokenizer: Tokenizer,
    lexicon: Lexicon,
    geometry: GeometrySlot,
    scheduler: Scheduler,
    pool: Arc<TensorPool>,
}

impl CleverKeysEngine {
    /// Load the tokenizer, lexicon, and both ONNX models, and start the worker pipeline.
    pub fn init(init: EngineInit<'_>) -> InitResult<Self> {
        let tokenizer = Tokenizer::load(init.tokenizer_path)?;
        let lexicon = Lexicon::load(init.primary_lexicon_path, init.enhanced_lexicon_path)?;
        let pool = Arc::new(TensorPool::new(init.engine_config.pool_cap_per_shape));

        let encoder: Arc<dyn EncoderSession> = Arc::new(OrtEncoderSession::load(
            init.encoder_model_path,
            Arc::clone(&pool),
        )?);
        let decoder: Arc<dyn DecoderSession> =
            Arc::new(OrtDecoderSession::load(init.decoder_model_path)?);

        let scheduler = Scheduler::new(
            encoder,
            decoder,
            Arc::clone(&pool),
            init.engine_config.queue_cap,
        );

        Ok(Self {
            tokenizer,
            lexicon,
            geometry: GeometrySlot::new(init.layout),
            scheduler,
            pool,
        })
    }

    /// Build an engine directly from already-constructed sessions, for tests and for callers
    /// that want to swap the tensor runtime for a fake.
    pub fn from_parts(
        tokenizer: Tokenizer,
        lexicon: Lexicon,
        layout: KeyLayout,
        encoder: Arc<dyn EncoderSession>,
        decoder: Arc<dyn DecoderSession>,
        engine_config: EngineConfig,
    ) -> Self {
        let pool = Arc::new(TensorPool::new(engine_config.pool_cap_per_shape));
        let scheduler = Scheduler::new(encoder, decoder, Arc::clone(&pool), engine_config.queue_cap);
        Self {
            tokenizer,
            lexicon,
            geometry: GeometrySlot::new(layout),
            scheduler,
            pool,
        }
    }

    /// Atomically replace the active key layout. In-flight `predict` calls keep using the
    /// layout they started with.
    pub fn set_layout(&self, layout: KeyLayout) {
        self.geometry.set_layout(layout);
    }

    /// Predict word candidates for one gesture, blocking until the pipeline returns a result.
    #[instrument(skip(self, gesture, config))]
    pub fn predict(
        &self,
        gesture: &Gesture,
        config: &PredictConfig,
    ) -> PredictionResult<Vec<RankedPrediction>> {
        self.predict_cancellable(gesture, config, &CancelToken::new())
    }

    /// Predict word candidates, honoring `cancel`: the caller can flip it from another thread
    /// to abandon the decode early.
    pub fn predict_cancellable(
        &self,
        gesture: &Gesture,
        config: &PredictConfig,
        cancel: &CancelToken,
    ) -> PredictionResult<Vec<RankedPrediction>> {
        config.validate()?;

        let layout = self.geometry.snapshot();
        let features = trajectory::extract(gesture, &layout, &self.tokenizer)?;
        let path_length = features.path_length;
        let duration_s = features.duration_s;

        if cancel.is_cancelled() {
            return Err(crate::error::PredictionError::Cancelled);
        }

        let memory = self.scheduler.encode(features)?;

        if cancel.is_cancelled() {
            return Err(crate::error::PredictionError::Cancelled);
        }

        let beams = self
            .scheduler
            .decode(memory, config.clone(), cancel.clone())?;

        Ok(rerank(&beams, &self.tokenizer, &self.lexicon, path_length, duration_s))
    }

    /// A point-in-time snapshot of pool, latency, and queue-depth counters.
    pub fn stats(&self) -> Stats {
        Stats {
            pool_acquisitions: self.pool.acquisitions(),
            pool_hits: self.pool.hits(),
            pool_misses: self.pool.misses(),
            pool_active: self.pool.active(),
            avg_encoder_ms: self.scheduler.avg_encoder_ms(),
            avg_decoder_ms: self.scheduler.avg_decoder_ms(),
            encoder_queue_depth: self.scheduler.encoder_queue_depth(),
            decoder_queue_depth: self.scheduler.decoder_queue_depth(),
        }
    }

    /// Stop both worker threads, waiting for any job already queued to finish first.
    pub fn shutdown(self) {
        self.scheduler.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DecoderError, EncoderError};
    use crate::geometry::KeySlot;
    use crate::gesture::GesturePoint;
    use crate::model::encoder::EncoderOutput;
    use crate::vocab::tokenizer::EOS;

    struct IdentityEncoder;
    impl EncoderSession for IdentityEncoder {
        fn encode(
            &self,
            features: &crate::trajectory::TrajectoryFeatures,
        ) -> Result<EncoderOutput, EncoderError> {
            Ok(EncoderOutput {
                memory: vec![0.0; features.src_mask.len() * 2],
                hidden: 2,
                src_mask: features.src_mask.clone(),
            })
        }
    }

    /// Spells a fixed word, then `EOS`, regardless of the gesture — lets the facade tests
    /// exercise end-to-end prediction without a real decoder model.
    struct FixedWordDecoder {
        word_tokens: Vec<i64>,
    }
    impl DecoderSession for FixedWordDecoder {
        fn step(
            &self,
            _pool: &Arc<TensorPool>,
            _memory: &EncoderOutput,
            target_tokens: &[Vec<i64>],
            target_lens: &[usize],
        ) -> Result<Vec<Vec<f32>>, DecoderError> {
            Ok(target_tokens
                .iter()
                .zip(target_lens)
                .map(|(_, &len)| {
                    let mut logits = vec![-10.0; crate::vocab::tokenizer::DEFAULT_VOCAB_SIZE];
                    let step = len - 1;
                    let next = self.word_tokens.get(step).copied().unwrap_or(EOS);
                    logits[next as usize] = 10.0;
                    logits
                })
                .collect())
        }
    }

    fn straight_line_gesture() -> Gesture {
        Gesture::new(
            vec![
                GesturePoint { x: 0.0, y: 0.0, t_ms: 0 },
                GesturePoint { x: 50.0, y: 0.0, t_ms: 100 },
                GesturePoint { x: 100.0, y: 0.0, t_ms: 200 },
            ],
            (100.0, 100.0),
        )
    }

    fn layout() -> KeyLayout {
        KeyLayout::new(vec![
            KeySlot { ch: 'a', cx: 0.0, cy: 0.0, half_w: 10.0, half_h: 10.0 },
            KeySlot { ch: 's', cx: 100.0, cy: 0.0, half_w: 10.0, half_h: 10.0 },
        ])
    }

    fn engine() -> CleverKeysEngine {
        let tokenizer = Tokenizer::default_english();
        let word_tokens = tokenizer.encode("as").unwrap();
        CleverKeysEngine::from_parts(
            tokenizer,
            Lexicon::from_ranked_words(vec!["as".into(), "sa".into()]),
            layout(),
            Arc::new(IdentityEncoder),
            Arc::new(FixedWordDecoder { word_tokens }),
            EngineConfig::default(),
        )
    }

    #[test]
    fn predict_returns_ranked_candidates_for_a_valid_gesture() {
        let engine = engine();
        let results = engine
            .predict(&straight_line_gesture(), &PredictConfig { confidence_threshold: 0.0, ..Default::default() })
            .unwrap();
        assert!(!results.is_empty());
    }

    #[test]
    fn predict_rejects_invalid_config() {
        let engine = engine();
        let bad_config = PredictConfig { beam_width: 0, ..Default::default() };
        assert!(engine.predict(&straight_line_gesture(), &bad_config).is_err());
    }

    #[test]
    fn predict_cancellable_short_circuits_before_encoding() {
        let engine = engine();
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = engine.predict_cancellable(
            &straight_line_gesture(),
            &PredictConfig::default(),
            &cancel,
        );
        assert!(matches!(result, Err(crate::error::PredictionError::Cancelled)));
    }

    #[test]
    fn set_layout_is_visible_to_subsequent_predicts() {
        let engine = engine();
        engine.set_layout(KeyLayout::new(vec![KeySlot {
            ch: 'z',
            cx: 0.0,
            cy: 0.0,
            half_w: 10.0,
            half_h: 10.0,
        }]));
        // Doesn't panic or error just because the layout changed underneath it.
        let _ = engine.predict(&straight_line_gesture(), &PredictConfig::default());
    }
}
