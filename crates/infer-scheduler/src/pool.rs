//! Fixed-size pool of batched conversion buffers

use std::sync::Arc;

use infer_context::NetworkInfo;
use ndarray::{s, Array4, ArrayView4, ArrayViewMut3, Axis};
use parking_lot::{Condvar, Mutex};
use tracing::trace;

struct PoolInner {
    free: Mutex<Vec<Array4<u8>>>,
    returned: Condvar,
    capacity: usize,
    info: NetworkInfo,
}

/// Pool of `[batch, height, width, channels]` buffers the assembler converts
/// regions into. Acquiring blocks while every buffer is in use.
#[derive(Clone)]
pub struct ConversionPool {
    inner: Arc<PoolInner>,
}

impl ConversionPool {
    /// Pre-allocate `size` buffers of `max_batch_size` slots each
    pub fn new(size: usize, max_batch_size: usize, info: &NetworkInfo) -> Self {
        let [h, w, c] = info.frame_shape();
        let free = (0..size)
            .map(|_| Array4::zeros((max_batch_size, h, w, c)))
            .collect();
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(free),
                returned: Condvar::new(),
                capacity: size,
                info: *info,
            }),
        }
    }

    /// Take a buffer, waiting until one is returned if the pool is empty
    pub fn acquire(&self) -> PooledBuffer {
        let mut free = self.inner.free.lock();
        loop {
            if let Some(data) = free.pop() {
                trace!(available = free.len(), "Acquired conversion buffer");
                return PooledBuffer {
                    data: Some(data),
                    pool: self.inner.clone(),
                };
            }
            self.inner.returned.wait(&mut free);
        }
    }

    /// Buffers currently free
    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

/// A buffer borrowed from a [`ConversionPool`], returned on drop
pub struct PooledBuffer {
    data: Option<Array4<u8>>,
    pool: Arc<PoolInner>,
}

impl PooledBuffer {
    /// Network input layout of every slot
    pub fn info(&self) -> NetworkInfo {
        self.pool.info
    }

    /// Number of frame slots
    pub fn slots(&self) -> usize {
        self.data.as_ref().map_or(0, |d| d.len_of(Axis(0)))
    }

    /// Mutable view of one slot, `None` when out of range
    pub fn slot_mut(&mut self, index: usize) -> Option<ArrayViewMut3<'_, u8>> {
        let data = self.data.as_mut()?;
        if index >= data.len_of(Axis(0)) {
            return None;
        }
        Some(data.index_axis_mut(Axis(0), index))
    }

    /// View of the first `frames` slots
    pub fn frames(&self, frames: usize) -> Option<ArrayView4<'_, u8>> {
        let data = self.data.as_ref()?;
        if frames > data.len_of(Axis(0)) {
            return None;
        }
        Some(data.slice(s![..frames, .., .., ..]))
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            let mut free = self.pool.free.lock();
            free.push(data);
            trace!(available = free.len(), "Returned conversion buffer");
            self.pool.returned.notify_one();
        }
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("slots", &self.slots())
            .finish()
    }
}
