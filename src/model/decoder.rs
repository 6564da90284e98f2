//! Decoder session: one autoregressive step of the token decoder,
//! batched across every live beam at once.

use std::path::Path;
use std::sync::Arc;

use ort::session::Session;
use ort::value::TensorRef;

use crate::error::{DecoderError, InitError};
use crate::model::encoder::EncoderOutput;
use crate::tensor_pool::TensorPool;

/// Runs one decoder step for a batch of partial token sequences (one per beam), returning
/// per-beam logits over the vocabulary for the next position.
pub trait DecoderSession: Send + Sync {
    /// `target_tokens[i]` is beam `i`'s tokens so far (including the leading `SOS`), all padded
    /// to the same length with `PAD`. Returns `logits[i]`: unnormalized scores over the
    /// vocabulary for the token that follows beam `i`'s last real token.
    ///
    /// `pool` is the same scratch-buffer pool the encoder draws from; a real implementation
    /// builds this step's batched tensors out of it instead of allocating fresh ones, since beam
    /// search calls `step` once per decoder position and the batch shape is stable across most
    /// of those calls.
    fn step(
        &self,
        pool: &Arc<TensorPool>,
        memory: &EncoderOutput,
        target_tokens: &[Vec<i64>],
        target_lens: &[usize],
    ) -> Result<Vec<Vec<f32>>, DecoderError>;
}

pub struct OrtDecoderSession {
    session: Session,
}

impl OrtDecoderSession {
    pub fn load(model_path: impl AsRef<Path>) -> Result<Self, InitError> {
        let session = Session::builder()
            .map_err(|err| InitError::Ort(err.to_string()))?
            .commit_from_file(model_path.as_ref())
            .map_err(|err| {
                InitError::Ort(format!(
                    "failed to load decoder model from '{}': {err}",
                    model_path.as_ref().display()
                ))
            })?;
        Ok(Self { session })
    }
}

impl DecoderSession for OrtDecoderSession {
    fn step(
        &self,
        pool: &Arc<TensorPool>,
        memory: &EncoderOutput,
        target_tokens: &[Vec<i64>],
        target_lens: &[usize],
    ) -> Result<Vec<Vec<f32>>, DecoderError> {
        let beams = target_tokens.len();
        if beams == 0 {
            return Ok(Vec::new());
        }
        let seq_len = target_tokens[0].len();
        let memory_seq_len = memory.src_mask.len();

        // Every buffer below is pool-acquired and held until after `session.run()`, so the
        // tensors borrow straight into the pooled memory instead of copying into a fresh `Vec`.
        // The batch/window shape (beams, seq_len, memory_seq_len, hidden) repeats across most
        // steps of one beam search, so this is where the pool's hit rate comes from.
        let mut memory_handle = pool.acquire_f32(beams * memory_seq_len * memory.hidden);
        {
            let buf = memory_handle.as_f32_mut();
            for b in 0..beams {
                buf[b * memory_seq_len * memory.hidden..(b + 1) * memory_seq_len * memory.hidden]
                    .copy_from_slice(&memory.memory);
            }
        }

        let mut src_mask_handle = pool.acquire_bool(beams * memory_seq_len);
        {
            let buf = src_mask_handle.as_bool_mut();
            for b in 0..beams {
                buf[b * memory_seq_len..(b + 1) * memory_seq_len].copy_from_slice(&memory.src_mask);
            }
        }

        let mut tokens_handle = pool.acquire_i64(beams * seq_len);
        {
            let buf = tokens_handle.as_i64_mut();
            for (b, toks) in target_tokens.iter().enumerate() {
                buf[b * seq_len..(b + 1) * seq_len].copy_from_slice(toks);
            }
        }

        let mut target_mask_handle = pool.acquire_bool(beams * seq_len);
        {
            let buf = target_mask_handle.as_bool_mut();
            for (b, &len) in target_lens.iter().enumerate() {
                for i in 0..seq_len {
                    buf[b * seq_len + i] = i < len;
                }
            }
        }

        let memory_tensor = TensorRef::from_array_view((
            [beams, memory_seq_len, memory.hidden],
            memory_handle.as_f32(),
        ))
        .map_err(|err| DecoderError::Shape(err.to_string()))?;
        let target_tensor =
            TensorRef::from_array_view(([beams, seq_len], tokens_handle.as_i64()))
                .map_err(|err| DecoderError::Shape(err.to_string()))?;
        let target_mask_tensor =
            TensorRef::from_array_view(([beams, seq_len], target_mask_handle.as_bool()))
                .map_err(|err| DecoderError::Shape(err.to_string()))?;
        let src_mask_tensor = TensorRef::from_array_view((
            [beams, memory_seq_len],
            src_mask_handle.as_bool(),
        ))
        .map_err(|err| DecoderError::Shape(err.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs![
                "memory" => memory_tensor,
                "target_tokens" => target_tensor,
                "target_mask" => target_mask_tensor,
                "src_mask" => src_mask_tensor,
            ])
            .map_err(|err| DecoderError::Ort(err.to_string()))?;

        // As with the encoder, this output is selected by position, not by name.
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|err| DecoderError::Shape(err.to_string()))?;

        let vocab_size = *shape
            .last()
            .ok_or_else(|| DecoderError::Shape("decoder logits output has rank 0".to_owned()))?
            as usize;

        // Two accepted output shapes: `[B, T, VOCAB]` (logits at every position, take the last
        // real one per beam) or `[B, VOCAB]` (already just the next-token logits).
        let per_beam = data.len() / beams;
        let mut result = Vec::with_capacity(beams);
        if shape.len() == 3 {
            let t = per_beam / vocab_size;
            for (b, &len) in target_lens.iter().enumerate() {
                let step = len.saturating_sub(1).min(t - 1);
                let start = b * per_beam + step * vocab_size;
                result.push(data[start..start + vocab_size].to_vec());
            }
        } else {
            for b in 0..beams {
                let start = b * vocab_size;
                result.push(data[start..start + vocab_size].to_vec());
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) struct FakeDecoder {
        pub vocab_size: usize,
        /// logits[beam_step] -> fixed distribution to return regardless of actual tokens, for
        /// deterministic tests.
        pub fixed_logits: Vec<f32>,
    }

    impl DecoderSession for FakeDecoder {
        fn step(
            &self,
            _pool: &Arc<TensorPool>,
            _memory: &EncoderOutput,
            target_tokens: &[Vec<i64>],
            _target_lens: &[usize],
        ) -> Result<Vec<Vec<f32>>, DecoderError> {
            Ok(target_tokens
                .iter()
                .map(|_| self.fixed_logits.clone())
                .collect())
        }
    }

    #[test]
    fn fake_decoder_returns_one_row_per_beam() {
        let decoder = FakeDecoder {
            vocab_size: 4,
            fixed_logits: vec![0.1, 0.2, 0.3, 0.4],
        };
        let pool = Arc::new(TensorPool::new(crate::tensor_pool::MAX_POOL_PER_SHAPE));
        let memory = EncoderOutput {
            memory: vec![0.0; 8],
            hidden: 2,
            src_mask: vec![true, true],
        };
        let targets = vec![vec![2, 0], vec![2, 0]];
        let lens = vec![1, 1];
        let logits = decoder.step(&pool, &memory, &targets, &lens).unwrap();
        assert_eq!(logits.len(), 2);
        assert_eq!(logits[0].len(), 4);
    }
}
