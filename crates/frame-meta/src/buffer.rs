//! Reference-counted batched buffer

use std::sync::Arc;

use parking_lot::Mutex;

use crate::meta::BatchMeta;
use crate::surface::Surface;

struct BufferInner {
    pts_ns: u64,
    surfaces: Vec<Surface>,
    meta: Mutex<BatchMeta>,
}

/// A batched buffer flowing through the pipeline.
///
/// Cloning is cheap and yields another handle to the same surfaces and
/// metadata. Surfaces are immutable; metadata is guarded by its own lock so
/// results can be attached from the output thread while other handles exist.
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

impl Buffer {
    /// Create a new buffer
    pub fn new(pts_ns: u64, surfaces: Vec<Surface>, meta: BatchMeta) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                pts_ns,
                surfaces,
                meta: Mutex::new(meta),
            }),
        }
    }

    /// Presentation timestamp (nanoseconds)
    pub fn pts_ns(&self) -> u64 {
        self.inner.pts_ns
    }

    /// Surface for the given batch index
    pub fn surface(&self, batch_id: usize) -> Option<&Surface> {
        self.inner.surfaces.get(batch_id)
    }

    /// Number of surfaces in the buffer
    pub fn num_surfaces(&self) -> usize {
        self.inner.surfaces.len()
    }

    /// Run `f` with shared access to the metadata
    pub fn with_meta<R>(&self, f: impl FnOnce(&BatchMeta) -> R) -> R {
        f(&self.inner.meta.lock())
    }

    /// Run `f` with exclusive access to the metadata
    pub fn with_meta_mut<R>(&self, f: impl FnOnce(&mut BatchMeta) -> R) -> R {
        f(&mut self.inner.meta.lock())
    }

    /// Clone of the current metadata
    pub fn meta_snapshot(&self) -> BatchMeta {
        self.inner.meta.lock().clone()
    }

    /// True when both handles refer to the same buffer
    pub fn same_buffer(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live handles to this buffer
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("pts_ns", &self.inner.pts_ns)
            .field("surfaces", &self.inner.surfaces.len())
            .finish()
    }
}
