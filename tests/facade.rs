//! End-to-end scenarios against [`CleverKeysEngine`], driven by fake encoder/decoder sessions
//! so they run without an on-disk ONNX model.

use std::sync::Arc;

use cleverkeys_engine::error::{DecoderError, EncoderError, PredictionError};
use cleverkeys_engine::geometry::{KeyLayout, KeySlot};
use cleverkeys_engine::model::decoder::DecoderSession;
use cleverkeys_engine::model::encoder::{EncoderOutput, EncoderSession};
use cleverkeys_engine::tensor_pool::TensorPool;
use cleverkeys_engine::trajectory::TrajectoryFeatures;
use cleverkeys_engine::vocab::tokenizer::{DEFAULT_VOCAB_SIZE, EOS};
use cleverkeys_engine::vocab::{Lexicon, Tokenizer};
use cleverkeys_engine::{CleverKeysEngine, EngineConfig, Gesture, GesturePoint, PredictConfig};

struct PassthroughEncoder;

impl EncoderSession for PassthroughEncoder {
    fn encode(&self, features: &TrajectoryFeatures) -> Result<EncoderOutput, EncoderError> {
        Ok(EncoderOutput {
            memory: vec![0.0; features.src_mask.len() * 2],
            hidden: 2,
            src_mask: features.src_mask.clone(),
        })
    }
}

/// Always picks `EOS` as the single most likely next token, so every beam finishes on its
/// first step with an empty word. Useful for exercising the pipeline plumbing without needing
/// to fake a realistic language model.
struct ImmediateEosDecoder;

impl DecoderSession for ImmediateEosDecoder {
    fn step(
        &self,
        _pool: &Arc<TensorPool>,
        _memory: &EncoderOutput,
        target_tokens: &[Vec<i64>],
        _target_lens: &[usize],
    ) -> Result<Vec<Vec<f32>>, DecoderError> {
        let mut logits = vec![-10.0; DEFAULT_VOCAB_SIZE];
        logits[EOS as usize] = 10.0;
        Ok(target_tokens.iter().map(|_| logits.clone()).collect())
    }
}

/// Spells out a fixed word (`"as"`) regardless of the gesture, by always preferring the next
/// character in that word until it's done, then `EOS`.
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
                let mut logits = vec![-10.0; DEFAULT_VOCAB_SIZE];
                let step = len - 1; // number of real tokens already emitted after SOS
                let next = self.word_tokens.get(step).copied().unwrap_or(EOS);
                logits[next as usize] = 10.0;
                logits
            })
            .collect())
    }
}

fn layout() -> KeyLayout {
    KeyLayout::new(vec![
        KeySlot { ch: 'a', cx: 0.0, cy: 0.0, half_w: 10.0, half_h: 10.0 },
        KeySlot { ch: 's', cx: 100.0, cy: 0.0, half_w: 10.0, half_h: 10.0 },
    ])
}

fn straight_line_gesture() -> Gesture {
    Gesture::new(
        vec![
            GesturePoint { x: 0.0, y: 0.0, t_ms: 0 },
            GesturePoint { x: 50.0, y: 0.0, t_ms: 150 },
            GesturePoint { x: 100.0, y: 0.0, t_ms: 300 },
        ],
        (100.0, 100.0),
    )
}

#[test]
fn engine_rejects_a_single_point_gesture() {
    let engine = CleverKeysEngine::from_parts(
        Tokenizer::default_english(),
        Lexicon::from_ranked_words(vec!["as".into()]),
        layout(),
        Arc::new(PassthroughEncoder),
        Arc::new(ImmediateEosDecoder),
        EngineConfig::default(),
    );

    let gesture = Gesture::new(
        vec![GesturePoint { x: 0.0, y: 0.0, t_ms: 0 }],
        (100.0, 100.0),
    );

    let result = engine.predict(&gesture, &PredictConfig::default());
    assert!(matches!(result, Err(PredictionError::InvalidGesture(_))));
}

#[test]
fn engine_returns_predictions_for_a_simple_swipe() {
    let tokenizer = Tokenizer::default_english();
    let word_tokens = tokenizer.encode("as").unwrap();
    let engine = CleverKeysEngine::from_parts(
        tokenizer,
        Lexicon::from_ranked_words(vec!["as".into(), "sa".into()]),
        layout(),
        Arc::new(PassthroughEncoder),
        Arc::new(FixedWordDecoder { word_tokens }),
        EngineConfig::default(),
    );

    let config = PredictConfig {
        confidence_threshold: 0.0,
        ..Default::default()
    };
    let predictions = engine.predict(&straight_line_gesture(), &config).unwrap();
    assert!(!predictions.is_empty());
}

#[test]
fn engine_decodes_the_word_the_fixed_decoder_spells() {
    let tokenizer = Tokenizer::default_english();
    let word_tokens = tokenizer.encode("as").unwrap();
    let engine = CleverKeysEngine::from_parts(
        tokenizer,
        Lexicon::from_ranked_words(vec!["as".into()]),
        layout(),
        Arc::new(PassthroughEncoder),
        Arc::new(FixedWordDecoder { word_tokens }),
        EngineConfig::default(),
    );

    let config = PredictConfig {
        confidence_threshold: 0.0,
        ..Default::default()
    };
    let predictions = engine.predict(&straight_line_gesture(), &config).unwrap();
    assert_eq!(predictions[0].word, "as");
}

#[test]
fn set_layout_does_not_break_in_flight_style_usage() {
    let engine = CleverKeysEngine::from_parts(
        Tokenizer::default_english(),
        Lexicon::from_ranked_words(vec!["as".into()]),
        layout(),
        Arc::new(PassthroughEncoder),
        Arc::new(ImmediateEosDecoder),
        EngineConfig::default(),
    );

    engine.set_layout(KeyLayout::new(vec![KeySlot {
        ch: 'q',
        cx: 0.0,
        cy: 0.0,
        half_w: 10.0,
        half_h: 10.0,
    }]));

    let config = PredictConfig {
        confidence_threshold: 0.0,
        ..Default::default()
    };
    let result = engine.predict(&straight_line_gesture(), &config);
    assert!(result.is_ok());
}

/// Never favors `EOS`, and flips `cancel` after its first invocation — simulating a caller
/// cancelling the job from another thread partway through the search.
struct CancelAfterFirstStepDecoder {
    cancel: cleverkeys_engine::pipeline::CancelToken,
}

impl DecoderSession for CancelAfterFirstStepDecoder {
    fn step(
        &self,
        _pool: &Arc<TensorPool>,
        _memory: &EncoderOutput,
        target_tokens: &[Vec<i64>],
        _target_lens: &[usize],
    ) -> Result<Vec<Vec<f32>>, DecoderError> {
        self.cancel.cancel();
        let mut logits = vec![-1.0; DEFAULT_VOCAB_SIZE];
        logits[4] = 1.0; // always prefer 'a', never EOS
        Ok(target_tokens.iter().map(|_| logits.clone()).collect())
    }
}

#[test]
fn cancellation_mid_search_returns_cancelled_and_releases_pool_handles() {
    let cancel = cleverkeys_engine::pipeline::CancelToken::new();
    let engine = CleverKeysEngine::from_parts(
        Tokenizer::default_english(),
        Lexicon::from_ranked_words(vec!["aaaaa".into()]),
        layout(),
        Arc::new(PassthroughEncoder),
        Arc::new(CancelAfterFirstStepDecoder { cancel: cancel.clone() }),
        EngineConfig::default(),
    );

    let baseline_active = engine.stats().pool_active;

    let result = engine.predict_cancellable(
        &straight_line_gesture(),
        &PredictConfig { max_len: 30, ..Default::default() },
        &cancel,
    );

    assert!(matches!(result, Err(PredictionError::Cancelled)));
    assert_eq!(engine.stats().pool_active, baseline_active);
}

#[test]
fn engine_shutdown_stops_worker_threads_cleanly() {
    let engine = CleverKeysEngine::from_parts(
        Tokenizer::default_english(),
        Lexicon::from_ranked_words(vec!["as".into()]),
        layout(),
        Arc::new(PassthroughEncoder),
        Arc::new(ImmediateEosDecoder),
        EngineConfig::default(),
    );
    engine.shutdown();
}
