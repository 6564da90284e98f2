//! Two-stage worker pipeline: one dedicated thread runs the encoder, one runs beam search
//! against the decoder. `predict` callers hand a job to the appropriate thread over a bounded
//! `std::sync::mpsc` channel and block on a one-shot reply channel — the public API stays
//! synchronous even though the work happens off-thread.
//!
//! A panic inside either worker is caught at the loop boundary so one bad job can't silently
//! kill the thread and hang every future caller; instead the worker flips a poisoned flag and
//! every subsequent submission fails fast with [`PredictionError::NotInitialized`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::time::Instant;

use tracing::error;

use crate::beam::{self, BeamResult};
use crate::config::PredictConfig;
use crate::error::PredictionError;
use crate::model::decoder::DecoderSession;
use crate::model::encoder::{EncoderOutput, EncoderSession};
use crate::stats::{LatencyAccumulator, QueueDepth};
use crate::tensor_pool::TensorPool;
use crate::trajectory::TrajectoryFeatures;

/// Shared cancellation flag for one in-flight `predict` call. Checked between beam search
/// steps so a caller that gave up doesn't keep burning decoder time.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

struct EncoderJob {
    features: TrajectoryFeatures,
    reply: SyncSender<Result<EncoderOutput, PredictionError>>,
}

struct DecoderJob {
    memory: EncoderOutput,
    config: PredictConfig,
    cancel: CancelToken,
    reply: SyncSender<Result<Vec<BeamResult>, PredictionError>>,
}

/// Owns both worker threads and the channels feeding them.
pub struct Scheduler {
    encoder_tx: SyncSender<EncoderJob>,
    decoder_tx: SyncSender<DecoderJob>,
    encoder_poisoned: Arc<AtomicBool>,
    decoder_poisoned: Arc<AtomicBool>,
    encoder_queue_depth: Arc<QueueDepth>,
    decoder_queue_depth: Arc<QueueDepth>,
    encoder_latency: Arc<LatencyAccumulator>,
    decoder_latency: Arc<LatencyAccumulator>,
    _encoder_worker: std::thread::JoinHandle<()>,
    _decoder_worker: std::thread::JoinHandle<()>,
}

impl Scheduler {
    pub fn new(
        encoder: Arc<dyn EncoderSession>,
        decoder: Arc<dyn DecoderSession>,
        pool: Arc<TensorPool>,
        queue_cap: usize,
    ) -> Self {
        let (encoder_tx, encoder_rx) = sync_channel::<EncoderJob>(queue_cap);
        let (decoder_tx, decoder_rx) = sync_channel::<DecoderJob>(queue_cap);

        let encoder_poisoned = Arc::new(AtomicBool::new(false));
        let decoder_poisoned = Arc::new(AtomicBool::new(false));
        let encoder_queue_depth = Arc::new(QueueDepth::default());
        let decoder_queue_depth = Arc::new(QueueDepth::default());
        let encoder_latency = Arc::new(LatencyAccumulator::default());
        let decoder_latency = Arc::new(LatencyAccumulator::default());

        let encoder_worker = std::thread::Builder::new()
            .name("cleverkeys-encoder".to_owned())
            .spawn({
                let poisoned = Arc::clone(&encoder_poisoned);
                let depth = Arc::clone(&encoder_queue_depth);
                let latency = Arc::clone(&encoder_latency);
                move || run_encoder_worker(encoder_rx, encoder, poisoned, depth, latency)
            })
            .expect("failed to spawn encoder worker thread");

        let decoder_worker = std::thread::Builder::new()
            .name("cleverkeys-decoder".to_owned())
            .spawn({
                let poisoned = Arc::clone(&decoder_poisoned);
                let depth = Arc::clone(&decoder_queue_depth);
                let latency = Arc::clone(&decoder_latency);
                move || run_decoder_worker(decoder_rx, decoder, pool, poisoned, depth, latency)
            })
            .expect("failed to spawn decoder worker thread");

        Self {
            encoder_tx,
            decoder_tx,
            encoder_poisoned,
            decoder_poisoned,
            encoder_queue_depth,
            decoder_queue_depth,
            encoder_latency,
            decoder_latency,
            _encoder_worker: encoder_worker,
            _decoder_worker: decoder_worker,
        }
    }

    pub fn encode(&self, features: TrajectoryFeatures) -> Result<EncoderOutput, PredictionError> {
        if self.encoder_poisoned.load(Ordering::Relaxed) {
            return Err(PredictionError::NotInitialized);
        }
        let (reply_tx, reply_rx) = sync_channel(1);
        self.encoder_queue_depth.inc();
        self.encoder_tx
            .send(EncoderJob {
                features,
                reply: reply_tx,
            })
            .map_err(|_| PredictionError::NotInitialized)?;
        reply_rx.recv().unwrap_or(Err(PredictionError::NotInitialized))
    }

    pub fn decode(
        &self,
        memory: EncoderOutput,
        config: PredictConfig,
        cancel: CancelToken,
    ) -> Result<Vec<BeamResult>, PredictionError> {
        if self.decoder_poisoned.load(Ordering::Relaxed) {
            return Err(PredictionError::NotInitialized);
        }
        let (reply_tx, reply_rx) = sync_channel(1);
        self.decoder_queue_depth.inc();
        self.decoder_tx
            .send(DecoderJob {
                memory,
                config,
                cancel,
                reply: reply_tx,
            })
            .map_err(|_| PredictionError::NotInitialized)?;
        reply_rx.recv().unwrap_or(Err(PredictionError::NotInitialized))
    }

    pub fn encoder_queue_depth(&self) -> usize {
        self.encoder_queue_depth.get()
    }

    pub fn decoder_queue_depth(&self) -> usize {
        self.decoder_queue_depth.get()
    }

    pub fn avg_encoder_ms(&self) -> f64 {
        self.encoder_latency.avg_ms()
    }

    pub fn avg_decoder_ms(&self) -> f64 {
        self.decoder_latency.avg_ms()
    }

    /// Close both job channels and wait for the worker threads to exit. Any job already queued
    /// is still processed; anything submitted after this call returns fails immediately because
    /// the channels are gone.
    pub fn shutdown(self) {
        let Scheduler {
            encoder_tx,
            decoder_tx,
            _encoder_worker,
            _decoder_worker,
            ..
        } = self;
        drop(encoder_tx);
        drop(decoder_tx);
        let _ = _encoder_worker.join();
        let _ = _decoder_worker.join();
    }
}

fn run_encoder_worker(
    rx: Receiver<EncoderJob>,
    encoder: Arc<dyn EncoderSession>,
    poisoned: Arc<AtomicBool>,
    depth: Arc<QueueDepth>,
    latency: Arc<LatencyAccumulator>,
) {
    while let Ok(job) = rx.recv() {
        depth.dec();
        let start = Instant::now();
        let encoder = Arc::clone(&encoder);
        let result = catch_unwind(AssertUnwindSafe(|| encoder.encode(&job.features)));
        latency.record(start.elapsed());
        let reply = match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(PredictionError::from(err)),
            Err(panic) => {
                error!("encoder worker panicked: {}", panic_message(&panic));
                poisoned.store(true, Ordering::Relaxed);
                Err(PredictionError::Internal("encoder worker panicked".to_owned()))
            }
        };
        let _ = job.reply.send(reply);
        if poisoned.load(Ordering::Relaxed) {
            break;
        }
    }
}

fn run_decoder_worker(
    rx: Receiver<DecoderJob>,
    decoder: Arc<dyn DecoderSession>,
    pool: Arc<TensorPool>,
    poisoned: Arc<AtomicBool>,
    depth: Arc<QueueDepth>,
    latency: Arc<LatencyAccumulator>,
) {
    while let Ok(job) = rx.recv() {
        depth.dec();
        if job.cancel.is_cancelled() {
            let _ = job.reply.send(Err(PredictionError::Cancelled));
            continue;
        }
        let start = Instant::now();
        let decoder = Arc::clone(&decoder);
        let result = catch_unwind(AssertUnwindSafe(|| {
            beam::run(decoder.as_ref(), &pool, &job.memory, &job.config, &job.cancel)
        }));
        latency.record(start.elapsed());
        let reply = match result {
            Ok(Ok(beams)) => Ok(beams),
            Ok(Err(err)) => Err(err),
            Err(panic) => {
                error!("decoder worker panicked: {}", panic_message(&panic));
                poisoned.store(true, Ordering::Relaxed);
                Err(PredictionError::Internal("decoder worker panicked".to_owned()))
            }
        };
        let _ = job.reply.send(reply);
        if poisoned.load(Ordering::Relaxed) {
            break;
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EncoderError;
    use crate::trajectory::SEQ_LEN;

    struct FlakyEncoder;
    impl EncoderSession for FlakyEncoder {
        fn encode(&self, _features: &TrajectoryFeatures) -> Result<EncoderOutput, EncoderError> {
            panic!("boom");
        }
    }

    struct NoopDecoder;
    impl DecoderSession for NoopDecoder {
        fn step(
            &self,
            _pool: &Arc<TensorPool>,
            _memory: &EncoderOutput,
            target_tokens: &[Vec<i64>],
            _target_lens: &[usize],
        ) -> Result<Vec<Vec<f32>>, crate::error::DecoderError> {
            Ok(target_tokens.iter().map(|_| vec![0.0; 6]).collect())
        }
    }

    fn fake_features() -> TrajectoryFeatures {
        TrajectoryFeatures {
            x: vec![0.0; SEQ_LEN],
            y: vec![0.0; SEQ_LEN],
            vx: vec![0.0; SEQ_LEN],
            vy: vec![0.0; SEQ_LEN],
            ax: vec![0.0; SEQ_LEN],
            ay: vec![0.0; SEQ_LEN],
            nearest_key_ids: vec![0; SEQ_LEN],
            src_mask: vec![true; SEQ_LEN],
            actual_len: SEQ_LEN,
            path_length: 1.0,
            duration_s: 1.0,
        }
    }

    #[test]
    fn encoder_panic_poisons_future_submissions() {
        let scheduler = Scheduler::new(
            Arc::new(FlakyEncoder),
            Arc::new(NoopDecoder),
            Arc::new(TensorPool::new(crate::tensor_pool::MAX_POOL_PER_SHAPE)),
            2,
        );
        let first = scheduler.encode(fake_features());
        assert!(matches!(first, Err(PredictionError::Internal(_))));

        // Give the worker loop a moment to observe the poisoned flag and exit.
        std::thread::sleep(std::time::Duration::from_millis(50));
        let second = scheduler.encode(fake_features());
        assert!(matches!(second, Err(PredictionError::NotInitialized)));
    }

    #[test]
    fn cancelled_decode_is_rejected_before_running() {
        let scheduler = Scheduler::new(
            Arc::new(FlakyEncoder),
            Arc::new(NoopDecoder),
            Arc::new(TensorPool::new(crate::tensor_pool::MAX_POOL_PER_SHAPE)),
            2,
        );
        let cancel = CancelToken::new();
        cancel.cancel();
        let memory = EncoderOutput {
            memory: vec![0.0; 2],
            hidden: 1,
            src_mask: vec![true],
        };
        let result = scheduler.decode(memory, PredictConfig::default(), cancel);
        assert!(matches!(result, Err(PredictionError::Cancelled)));
    }
}
