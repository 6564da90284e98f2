//! Reusable scratch buffers for encoder/decoder input tensors.
//!
//! Allocating a fresh `Vec<f32>` per request for every tensor shape the pipeline touches is
//! wasteful at the request rates this engine targets. [`TensorPool`] keeps a bounded stock of
//! buffers per shape; [`PoolHandle`] hands one out and returns it to the pool on [`Drop`] so
//! every exit path — success, error, or panic unwind — releases it without the caller having to
//! remember to.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Per-shape cap on how many idle buffers [`TensorPool`] keeps around.
pub const MAX_POOL_PER_SHAPE: usize = 16;

/// A buffer is discarded rather than recycled once it has been reused this many times, so a
/// buffer sized for one unusually large request doesn't live forever.
pub const MAX_REUSE: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dtype {
    F32,
    I64,
    Bool,
}

struct Buffer {
    f32_data: Vec<f32>,
    i64_data: Vec<i64>,
    bool_data: Vec<bool>,
    reuse_count: u32,
}

type ShapeKey = (Dtype, usize);

#[derive(Default)]
struct Counters {
    acquisitions: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    active: AtomicU64,
}

/// Pool of reusable flat tensor buffers, keyed by `(dtype, element count)`.
pub struct TensorPool {
    buffers: Mutex<HashMap<ShapeKey, Vec<Buffer>>>,
    cap_per_shape: usize,
    counters: Counters,
}

impl TensorPool {
    pub fn new(cap_per_shape: usize) -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            cap_per_shape,
            counters: Counters::default(),
        }
    }

    /// Acquire an `f32` buffer of exactly `len` elements, zeroed.
    pub fn acquire_f32(self: &std::sync::Arc<Self>, len: usize) -> PoolHandle {
        self.counters.acquisitions.fetch_add(1, Ordering::Relaxed);
        let key = (Dtype::F32, len);
        let mut buf = {
            let mut buffers = self.buffers.lock().expect("tensor pool lock poisoned");
            buffers.get_mut(&key).and_then(Vec::pop)
        };
        match &mut buf {
            Some(b) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                b.f32_data.iter_mut().for_each(|v| *v = 0.0);
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        let buffer = buf.unwrap_or_else(|| Buffer {
            f32_data: vec![0.0; len],
            i64_data: Vec::new(),
            bool_data: Vec::new(),
            reuse_count: 0,
        });
        self.counters.active.fetch_add(1, Ordering::Relaxed);
        PoolHandle {
            pool: std::sync::Arc::clone(self),
            key,
            buffer: Some(buffer),
        }
    }

    /// Acquire an `i64` buffer of exactly `len` elements, zeroed.
    pub fn acquire_i64(self: &std::sync::Arc<Self>, len: usize) -> PoolHandle {
        self.counters.acquisitions.fetch_add(1, Ordering::Relaxed);
        let key = (Dtype::I64, len);
        let mut buf = {
            let mut buffers = self.buffers.lock().expect("tensor pool lock poisoned");
            buffers.get_mut(&key).and_then(Vec::pop)
        };
        match &mut buf {
            Some(b) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                b.i64_data.iter_mut().for_each(|v| *v = 0);
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        let buffer = buf.unwrap_or_else(|| Buffer {
            f32_data: Vec::new(),
            i64_data: vec![0; len],
            bool_data: Vec::new(),
            reuse_count: 0,
        });
        self.counters.active.fetch_add(1, Ordering::Relaxed);
        PoolHandle {
            pool: std::sync::Arc::clone(self),
            key,
            buffer: Some(buffer),
        }
    }

    /// Acquire a `bool` buffer of exactly `len` elements, zeroed to `false`.
    pub fn acquire_bool(self: &std::sync::Arc<Self>, len: usize) -> PoolHandle {
        self.counters.acquisitions.fetch_add(1, Ordering::Relaxed);
        let key = (Dtype::Bool, len);
        let mut buf = {
            let mut buffers = self.buffers.lock().expect("tensor pool lock poisoned");
            buffers.get_mut(&key).and_then(Vec::pop)
        };
        match &mut buf {
            Some(b) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                b.bool_data.iter_mut().for_each(|v| *v = false);
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        let buffer = buf.unwrap_or_else(|| Buffer {
            f32_data: Vec::new(),
            i64_data: Vec::new(),
            bool_data: vec![false; len],
            reuse_count: 0,
        });
        self.counters.active.fetch_add(1, Ordering::Relaxed);
        PoolHandle {
            pool: std::sync::Arc::clone(self),
            key,
            buffer: Some(buffer),
        }
    }

    fn release(&self, key: ShapeKey, mut buffer: Buffer) {
        self.counters.active.fetch_sub(1, Ordering::Relaxed);
        buffer.reuse_count += 1;
        if buffer.reuse_count >= MAX_REUSE {
            return;
        }
        let mut buffers = self.buffers.lock().expect("tensor pool lock poisoned");
        let bucket = buffers.entry(key).or_default();
        if bucket.len() < self.cap_per_shape {
            bucket.push(buffer);
        }
    }

    pub fn acquisitions(&self) -> u64 {
        self.counters.acquisitions.load(Ordering::Relaxed)
    }

    pub fn hits(&self) -> u64 {
        self.counters.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.counters.misses.load(Ordering::Relaxed)
    }

    pub fn active(&self) -> u64 {
        self.counters.active.load(Ordering::Relaxed)
    }
}

/// A checked-out pool buffer. Returned to its [`TensorPool`] automatically on drop — including
/// on an early return from an error or an unwinding panic.
pub struct PoolHandle {
    pool: std::sync::Arc<TensorPool>,
    key: ShapeKey,
    buffer: Option<Buffer>,
}

impl PoolHandle {
    pub fn as_f32_mut(&mut self) -> &mut [f32] {
        &mut self.buffer.as_mut().expect("buffer taken").f32_data
    }

    pub fn as_i64_mut(&mut self) -> &mut [i64] {
        &mut self.buffer.as_mut().expect("buffer taken").i64_data
    }

    pub fn as_bool_mut(&mut self) -> &mut [bool] {
        &mut self.buffer.as_mut().expect("buffer taken").bool_data
    }

    pub fn as_f32(&self) -> &[f32] {
        &self.buffer.as_ref().expect("buffer taken").f32_data
    }

    pub fn as_i64(&self) -> &[i64] {
        &self.buffer.as_ref().expect("buffer taken").i64_data
    }

    pub fn as_bool(&self) -> &[bool] {
        &self.buffer.as_ref().expect("buffer taken").bool_data
    }
}

impl Drop for PoolHandle {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(self.key, buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn reacquiring_after_release_is_a_hit() {
        let pool = Arc::new(TensorPool::new(MAX_POOL_PER_SHAPE));
        {
            let _h = pool.acquire_f32(16);
        }
        assert_eq!(pool.misses(), 1);
        let _h = pool.acquire_f32(16);
        assert_eq!(pool.hits(), 1);
        assert_eq!(pool.active(), 1);
    }

    #[test]
    fn buffer_is_zeroed_on_reacquire() {
        let pool = Arc::new(TensorPool::new(MAX_POOL_PER_SHAPE));
        {
            let mut h = pool.acquire_f32(4);
            h.as_f32_mut().copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        }
        let h = pool.acquire_f32(4);
        assert_eq!(h.as_f32(), &[0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn pool_per_shape_cap_is_respected() {
        let pool = Arc::new(TensorPool::new(1));
        let a = pool.acquire_f32(8);
        let b = pool.acquire_f32(8);
        drop(a);
        drop(b);
        // only 1 of the 2 released buffers should have been kept
        let mut buffers = pool.buffers.lock().unwrap();
        assert_eq!(buffers.get_mut(&(Dtype::F32, 8)).map(Vec::len), Some(1));
    }

    #[test]
    fn bool_buffers_are_a_distinct_shape_class_from_i64() {
        let pool = Arc::new(TensorPool::new(MAX_POOL_PER_SHAPE));
        {
            let mut h = pool.acquire_bool(4);
            h.as_bool_mut().copy_from_slice(&[true, false, true, false]);
        }
        assert_eq!(pool.misses(), 1);
        let h = pool.acquire_bool(4);
        assert_eq!(pool.hits(), 1);
        assert_eq!(h.as_bool(), &[false, false, false, false]);
    }

    #[test]
    fn active_count_drops_on_release() {
        let pool = Arc::new(TensorPool::new(MAX_POOL_PER_SHAPE));
        let h = pool.acquire_f32(8);
        assert_eq!(pool.active(), 1);
        drop(h);
        assert_eq!(pool.active(), 0);
    }
}
