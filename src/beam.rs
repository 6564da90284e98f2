//! Beam search: drives [`DecoderSession::step`] one autoregressive position
//! at a time, synchronized across every live beam so they can be batched into a single decoder
//! call per step.

use std::sync::Arc;

use tracing::warn;

use crate::config::PredictConfig;
use crate::error::PredictionError;
use crate::model::encoder::EncoderOutput;
use crate::model::decoder::DecoderSession;
use crate::pipeline::CancelToken;
use crate::tensor_pool::TensorPool;
use crate::vocab::tokenizer::{EOS, PAD, SOS};

/// One beam's state: its token sequence so far (including the leading `SOS`) and its
/// cumulative log-probability.
#[derive(Debug, Clone)]
struct Beam {
    tokens: Vec<i64>,
    score: f32,
    finished: bool,
}

/// A completed beam, ready for the re-ranker.
#[derive(Debug, Clone)]
pub struct BeamResult {
    /// Token ids, `SOS`/`EOS` stripped.
    pub tokens: Vec<i64>,
    /// Cumulative log-probability, length-normalized by token count.
    pub score: f32,
    /// `exp(score)`, clamped to `[0, 1]`, used against `confidence_threshold`.
    pub confidence: f32,
}

/// Run beam search to completion: either every beam emits `EOS`, or `max_len` steps pass and
/// any beam still open is force-finished at its last token.
///
/// `cancel` is checked between steps (never mid-step): a cancellation observed here aborts the
/// search with [`PredictionError::Cancelled`] within one decoder call's worth of time, per the
/// pipeline's cancellation contract.
///
/// Returns beams above `confidence_threshold`, sorted best score first. Ties break by
/// `(score desc, token_len asc, tokens asc)` so the result order is fully deterministic.
pub fn run(
    decoder: &dyn DecoderSession,
    pool: &Arc<TensorPool>,
    memory: &EncoderOutput,
    config: &PredictConfig,
    cancel: &CancelToken,
) -> Result<Vec<BeamResult>, PredictionError> {
    let mut beams = vec![Beam {
        tokens: vec![SOS],
        score: 0.0,
        finished: false,
    }];

    for step in 0..config.max_len {
        if beams.iter().all(|b| b.finished) {
            break;
        }
        if cancel.is_cancelled() {
            return Err(PredictionError::Cancelled);
        }
        if step + 1 >= config.seq_window {
            warn!(
                seq_window = config.seq_window,
                max_len = config.max_len,
                "beam search truncated: reached seq_window before max_len"
            );
            break;
        }

        let active: Vec<usize> = beams
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.finished)
            .map(|(i, _)| i)
            .collect();

        // Padded to the fixed window `seq_window`, not the longest live beam: this keeps the
        // batched tensor shape constant across steps (as long as the beam count doesn't change),
        // which is what lets the tensor pool actually recycle buffers instead of missing on
        // every step.
        let target_tokens: Vec<Vec<i64>> = active
            .iter()
            .map(|&i| {
                let mut toks = beams[i].tokens.clone();
                toks.resize(config.seq_window, PAD);
                toks
            })
            .collect();
        let target_lens: Vec<usize> = active.iter().map(|&i| beams[i].tokens.len()).collect();

        let logits = decoder.step(pool, memory, &target_tokens, &target_lens)?;

        let finite_rows = logits
            .iter()
            .filter(|row| row.iter().all(|v| v.is_finite()))
            .count();
        if finite_rows == 0 {
            return Err(PredictionError::Decoder(crate::error::DecoderError::NonFinite));
        }

        let mut candidates: Vec<Beam> = Vec::new();
        for (row_idx, &beam_idx) in active.iter().enumerate() {
            let row = &logits[row_idx];
            if row.iter().any(|v| !v.is_finite()) {
                warn!(beam_idx, "dropping beam: decoder produced non-finite logits");
                continue;
            }

            let log_probs = log_softmax(row);
            let beam = &beams[beam_idx];

            let mut scored: Vec<(usize, f32)> = log_probs.iter().copied().enumerate().collect();
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(config.beam_width);

            for (token, log_prob) in scored {
                let mut tokens = beam.tokens.clone();
                let finished = token as i64 == EOS;
                if !finished {
                    tokens.push(token as i64);
                }
                candidates.push(Beam {
                    tokens,
                    score: beam.score + log_prob,
                    finished,
                });
            }
        }
        // Beams that are already finished stay in the pool unchanged, competing on their
        // existing score against newly-expanded candidates.
        for beam in &beams {
            if beam.finished {
                candidates.push(beam.clone());
            }
        }

        candidates.sort_by(|a, b| beam_order(a, b));
        candidates.dedup_by(|a, b| a.tokens == b.tokens);
        candidates.truncate(config.beam_width);
        beams = candidates;
    }

    for beam in &mut beams {
        beam.finished = true;
    }

    let mut results: Vec<BeamResult> = beams
        .into_iter()
        .map(|beam| {
            let len = beam.tokens.len().max(1) as f32;
            let normalized = beam.score / len;
            BeamResult {
                tokens: beam
                    .tokens
                    .into_iter()
                    .filter(|&t| t != SOS && t != EOS && t != PAD)
                    .collect(),
                score: normalized,
                confidence: normalized.exp().clamp(0.0, 1.0),
            }
        })
        .filter(|r| r.confidence >= config.confidence_threshold && !r.tokens.is_empty())
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.tokens.len().cmp(&b.tokens.len()))
            .then_with(|| a.tokens.cmp(&b.tokens))
    });

    Ok(results)
}

fn beam_order(a: &Beam, b: &Beam) -> std::cmp::Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| a.tokens.len().cmp(&b.tokens.len()))
        .then_with(|| a.tokens.cmp(&b.tokens))
}

fn log_softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let sum: f32 = logits.iter().map(|&v| (v - max).exp()).sum();
    let log_sum = sum.ln();
    logits.iter().map(|&v| v - max - log_sum).collect()
}
