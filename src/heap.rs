//! Caller-supplied memory arenas.
//!
//! A [`Heap`] is a fixed byte budget that container buffers are carved out of.
//! Allocation is linear accounting: a request advances the used cursor by its
//! aligned size and the returned [`HeapBlock`] gives the bytes back when it is
//! dropped. The heap can be shared between threads; only the cursor is contended.

use std::alloc::Layout;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;

/// Errors produced by heap allocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("heap `{heap}` exhausted: requested {requested} bytes, {available} available")]
    Exhausted {
        heap: String,
        requested: usize,
        available: usize,
    },
    #[error("buffer capacity must be larger than zero")]
    ZeroCapacity,
    #[error("buffer is already allocated")]
    AlreadyAllocated,
    #[error("allocation size overflows")]
    LayoutOverflow,
}

struct HeapInner {
    name: String,
    capacity: usize,
    used: AtomicUsize,
}

/// A named, fixed-capacity memory arena.
#[derive(Clone)]
pub struct Heap {
    inner: Arc<HeapInner>,
}

impl Heap {
    /// Creates a heap with the given budget in bytes.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Heap {
            inner: Arc::new(HeapInner {
                name: name.into(),
                capacity,
                used: AtomicUsize::new(0),
            }),
        }
    }

    /// Reserves space for `layout`.
    ///
    /// The reservation is rounded up to the layout's alignment so that
    /// consecutive blocks could be laid out back to back.
    pub fn alloc(&self, layout: Layout) -> Result<HeapBlock, HeapError> {
        let size = layout.pad_to_align().size();

        let reserved = self
            .inner
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                let new_used = used.checked_add(size)?;
                (new_used <= self.inner.capacity).then_some(new_used)
            });

        match reserved {
            Ok(_) => Ok(HeapBlock {
                heap: Arc::clone(&self.inner),
                size,
            }),
            Err(used) => Err(HeapError::Exhausted {
                heap: self.inner.name.clone(),
                requested: size,
                available: self.inner.capacity.saturating_sub(used),
            }),
        }
    }

    /// Reserves space for `count` values of `T`.
    pub fn alloc_array<T>(&self, count: usize) -> Result<HeapBlock, HeapError> {
        let layout = Layout::array::<T>(count).map_err(|_| HeapError::LayoutOverflow)?;
        self.alloc(layout)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the number of bytes currently allocated.
    pub fn used_bytes(&self) -> usize {
        self.inner.used.load(Ordering::Acquire)
    }

    /// Returns the total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn free_bytes(&self) -> usize {
        self.capacity().saturating_sub(self.used_bytes())
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("name", &self.inner.name)
            .field("capacity", &self.inner.capacity)
            .field("used", &self.used_bytes())
            .finish()
    }
}

/// An outstanding reservation. Returns its bytes to the heap on drop.
pub struct HeapBlock {
    heap: Arc<HeapInner>,
    size: usize,
}

impl HeapBlock {
    pub fn size(&self) -> usize {
        self.size
    }
}

impl std::fmt::Debug for HeapBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapBlock")
            .field("heap", &self.heap.name)
            .field("size", &self.size)
            .finish()
    }
}

impl Drop for HeapBlock {
    fn drop(&mut self) {
        self.heap.used.fetch_sub(self.size, Ordering::AcqRel);
    }
}
