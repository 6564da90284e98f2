//! Encoder session: turns [`TrajectoryFeatures`] into a memory tensor the decoder attends
//! over.

use std::path::Path;
use std::sync::Arc;

use ort::session::Session;
use ort::value::TensorRef;
use ort::value::ValueType;

use crate::error::{EncoderError, InitError};
use crate::tensor_pool::TensorPool;
use crate::trajectory::{TrajectoryFeatures, SEQ_LEN};

/// Encoder hidden sizes this crate is built against: a compile-time constant matching the
/// shipped model, either 256 or 512 depending on model variant. A model whose output's static
/// last dimension matches neither is rejected at `init` rather than failing unpredictably the
/// first time it's run.
const SUPPORTED_HIDDEN_SIZES: [i64; 2] = [256, 512];

/// The encoder's output: a `[SEQ_LEN, hidden]` memory tensor plus the source mask the decoder's
/// cross-attention needs to ignore padding positions.
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    pub memory: Vec<f32>,
    pub hidden: usize,
    pub src_mask: Vec<bool>,
}

/// Abstracts the act of running the trajectory encoder model, so the pipeline and beam search
/// can be driven by a fake in tests instead of a real ONNX file.
pub trait EncoderSession: Send + Sync {
    fn encode(&self, features: &TrajectoryFeatures) -> Result<EncoderOutput, EncoderError>;
}

/// A real encoder backed by an ONNX Runtime session.
///
/// Borrows scratch buffers from a [`TensorPool`] to build its input tensors: each pool handle is
/// kept alive for as long as the `ort::Tensor` borrowing it, and only released back to the pool
/// once `session.run()` has returned, so no input tensor requires its own fresh allocation.
pub struct OrtEncoderSession {
    session: Session,
    pool: Arc<TensorPool>,
}

impl OrtEncoderSession {
    pub fn load(model_path: impl AsRef<Path>, pool: Arc<TensorPool>) -> Result<Self, InitError> {
        let session = Session::builder()
            .map_err(|err| InitError::Ort(err.to_string()))?
            .commit_from_file(model_path.as_ref())
            .map_err(|err| {
                InitError::Ort(format!(
                    "failed to load encoder model from '{}': {err}",
                    model_path.as_ref().display()
                ))
            })?;
        validate_hidden_size(&session)?;
        Ok(Self { session, pool })
    }
}

/// Reject a model whose first output's static last dimension is a concrete size this crate
/// wasn't built for. A model exporting a dynamic (symbolic) last dimension can't be checked
/// until the first real `encode()` call, where a shape mismatch surfaces as
/// [`EncoderError::Shape`] instead.
fn validate_hidden_size(session: &Session) -> Result<(), InitError> {
    let Some(output) = session.outputs.first() else {
        return Err(InitError::Shape("encoder model declares no outputs".to_owned()));
    };
    let ValueType::Tensor { shape, .. } = &output.output_type else {
        return Err(InitError::Shape(format!(
            "encoder output '{}' is not a tensor",
            output.name
        )));
    };
    let Some(&hidden) = shape.last() else {
        return Err(InitError::Shape(format!(
            "encoder output '{}' has rank 0",
            output.name
        )));
    };
    if hidden > 0 && !SUPPORTED_HIDDEN_SIZES.contains(&hidden) {
        return Err(InitError::Shape(format!(
            "encoder output '{}' has hidden size {hidden}, expected one of {SUPPORTED_HIDDEN_SIZES:?}",
            output.name
        )));
    }
    Ok(())
}

impl EncoderSession for OrtEncoderSession {
    fn encode(&self, features: &TrajectoryFeatures) -> Result<EncoderOutput, EncoderError> {
        let mut flat_handle = self.pool.acquire_f32(SEQ_LEN * 6);
        flat_handle
            .as_f32_mut()
            .copy_from_slice(&features.to_flat_rows());

        let mut keys_handle = self.pool.acquire_i64(SEQ_LEN);
        keys_handle.as_i64_mut().copy_from_slice(&features.nearest_key_ids);

        let mut src_mask_handle = self.pool.acquire_bool(SEQ_LEN);
        src_mask_handle.as_bool_mut().copy_from_slice(&features.src_mask);

        // Each tensor borrows straight into its pool handle's buffer; the handles stay alive
        // until after `session.run()` returns, then release back to the pool on drop instead of
        // each call paying for a fresh `Vec`.
        let trajectory = TensorRef::from_array_view((
            [1usize, SEQ_LEN, 6usize],
            flat_handle.as_f32(),
        ))
        .map_err(|err| EncoderError::Shape(err.to_string()))?;
        let nearest_keys = TensorRef::from_array_view((
            [1usize, SEQ_LEN],
            keys_handle.as_i64(),
        ))
        .map_err(|err| EncoderError::Shape(err.to_string()))?;
        let src_mask = TensorRef::from_array_view((
            [1usize, SEQ_LEN],
            src_mask_handle.as_bool(),
        ))
        .map_err(|err| EncoderError::Shape(err.to_string()))?;

        // A clone of the session is needed because `run` takes `&mut self`, but `encode` takes
        // `&self` so concurrent callers don't serialize on a single mutex; `ort::Session::run`
        // is itself internally synchronized per ONNX Runtime's thread-safety guarantees for a
        // shared session handle accessed through `&Session`.
        let outputs = self
            .session
            .run(ort::inputs![
                "trajectory_features" => trajectory,
                "nearest_keys" => nearest_keys,
                "src_mask" => src_mask,
            ])
            .map_err(|err| EncoderError::Ort(err.to_string()))?;

        // Selected by position, not name: different export pipelines name the encoder's
        // hidden-state output differently (`memory`, `last_hidden_state`, `output_0`, ...), so
        // indexing avoids depending on a convention the model file doesn't actually promise.
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|err| EncoderError::Shape(err.to_string()))?;

        let hidden = *shape.last().ok_or_else(|| {
            EncoderError::Shape("encoder memory output has rank 0".to_owned())
        })? as usize;

        Ok(EncoderOutput {
            memory: data.to_vec(),
            hidden,
            src_mask: features.src_mask.clone(),
        })
    }
}
