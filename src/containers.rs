//! Fixed-capacity containers used for per-core state.
//!
//! [`SafeArray`] is an inline, bounds-checked array indexed by integer or by
//! [`CoreId`]. [`RingBuffer`] is a circular buffer whose storage is budgeted from
//! a caller-supplied [`Heap`] at allocation time and released explicitly.

use std::ops::{Index, IndexMut};

use crate::core_id::CoreId;
use crate::heap::{Heap, HeapBlock, HeapError};

/// Bounds-checked fixed-size array.
#[derive(Debug, Clone)]
pub struct SafeArray<T, const N: usize> {
    buffer: [T; N],
}

impl<T, const N: usize> SafeArray<T, N> {
    /// Builds the array by calling `f` for every index.
    pub fn from_fn(f: impl FnMut(usize) -> T) -> Self {
        SafeArray {
            buffer: std::array::from_fn(f),
        }
    }

    pub const fn len(&self) -> usize {
        N
    }

    pub const fn is_empty(&self) -> bool {
        N == 0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.buffer.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.buffer
    }

    #[cold]
    #[track_caller]
    fn out_of_range(idx: usize) -> ! {
        panic!("range over [0, {}) : {}", N, idx);
    }
}

impl<T: Clone, const N: usize> SafeArray<T, N> {
    /// Creates an array with every slot set to `value`.
    pub fn filled(value: T) -> Self {
        Self::from_fn(|_| value.clone())
    }

    /// Overwrites every slot with `value`.
    pub fn fill(&mut self, value: T) {
        self.buffer.fill(value);
    }
}

impl<T, const N: usize> Index<usize> for SafeArray<T, N> {
    type Output = T;

    #[track_caller]
    fn index(&self, idx: usize) -> &T {
        match self.buffer.get(idx) {
            Some(v) => v,
            None => Self::out_of_range(idx),
        }
    }
}

impl<T, const N: usize> IndexMut<usize> for SafeArray<T, N> {
    #[track_caller]
    fn index_mut(&mut self, idx: usize) -> &mut T {
        if idx >= N {
            Self::out_of_range(idx);
        }
        &mut self.buffer[idx]
    }
}

impl<T, const N: usize> Index<CoreId> for SafeArray<T, N> {
    type Output = T;

    #[track_caller]
    fn index(&self, core: CoreId) -> &T {
        &self[core.index()]
    }
}

impl<T, const N: usize> IndexMut<CoreId> for SafeArray<T, N> {
    #[track_caller]
    fn index_mut(&mut self, core: CoreId) -> &mut T {
        &mut self[core.index()]
    }
}

impl<'a, T, const N: usize> IntoIterator for &'a SafeArray<T, N> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.buffer.iter()
    }
}

/// Circular buffer with storage budgeted from a [`Heap`].
///
/// Indexing is relative to the rotating head: `buf[0]` is the element at the
/// head, `buf[len - 1]` the one just before it.
pub struct RingBuffer<T> {
    buffer: Vec<T>,
    head: usize,
    block: Option<HeapBlock>,
}

impl<T> RingBuffer<T> {
    pub const fn new() -> Self {
        RingBuffer {
            buffer: Vec::new(),
            head: 0,
            block: None,
        }
    }

    /// Allocates `capacity` slots from `heap`, initializing slot `i` with `init(i)`.
    pub fn alloc_buffer(
        &mut self,
        capacity: usize,
        heap: &Heap,
        init: impl FnMut(usize) -> T,
    ) -> Result<(), HeapError> {
        if self.block.is_some() {
            return Err(HeapError::AlreadyAllocated);
        }
        if capacity == 0 {
            return Err(HeapError::ZeroCapacity);
        }

        let block = heap.alloc_array::<T>(capacity)?;
        self.buffer = (0..capacity).map(init).collect();
        self.head = 0;
        self.block = Some(block);
        Ok(())
    }

    /// Drops the elements and returns the storage to the heap. Idempotent.
    pub fn free_buffer(&mut self) {
        self.buffer = Vec::new();
        self.head = 0;
        self.block = None;
    }

    pub fn is_allocated(&self) -> bool {
        self.block.is_some()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Advances the head by `n` slots.
    pub fn rotate(&mut self, n: usize) {
        if !self.buffer.is_empty() {
            self.head = (self.head + n) % self.buffer.len();
        }
    }

    pub fn get(&self, idx: usize) -> Option<&T> {
        if idx >= self.buffer.len() {
            return None;
        }
        self.buffer.get((self.head + idx) % self.buffer.len())
    }

    /// Iterates from the head around to the element before it.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        (0..self.buffer.len()).filter_map(move |i| self.get(i))
    }
}

impl<T> Default for RingBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<usize> for RingBuffer<T> {
    type Output = T;

    #[track_caller]
    fn index(&self, idx: usize) -> &T {
        match self.get(idx) {
            Some(v) => v,
            None => panic!("range over [0, {}) : {}", self.buffer.len(), idx),
        }
    }
}

impl<T> Index<CoreId> for RingBuffer<T> {
    type Output = T;

    #[track_caller]
    fn index(&self, core: CoreId) -> &T {
        &self[core.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_array_fill_and_index() {
        let mut arr: SafeArray<u32, 4> = SafeArray::filled(8);
        assert_eq!(arr.len(), 4);
        assert!(arr.iter().all(|&v| v == 8));

        arr[2] = 1;
        arr.fill(3);
        assert_eq!(arr[2], 3);

        let core = CoreId::new(1).unwrap();
        arr[core] = 9;
        assert_eq!(arr[1], 9);
    }

    #[test]
    #[should_panic(expected = "range over [0, 4) : 4")]
    fn test_safe_array_out_of_range() {
        let arr: SafeArray<u32, 4> = SafeArray::filled(0);
        let _ = arr[4];
    }

    #[test]
    fn test_ring_buffer_lifecycle() {
        let heap = Heap::new("ring", 256);
        let mut ring: RingBuffer<u32> = RingBuffer::new();
        assert!(!ring.is_allocated());

        ring.alloc_buffer(4, &heap, |i| i as u32 * 10).unwrap();
        assert_eq!(heap.used_bytes(), 16);
        assert_eq!(ring.len(), 4);
        assert_eq!(ring[0], 0);
        assert_eq!(ring[3], 30);

        assert_eq!(
            ring.alloc_buffer(4, &heap, |_| 0),
            Err(HeapError::AlreadyAllocated)
        );

        ring.free_buffer();
        assert!(!ring.is_allocated());
        assert_eq!(heap.used_bytes(), 0);
        ring.free_buffer();
    }

    #[test]
    fn test_ring_buffer_rotation() {
        let heap = Heap::new("ring", 256);
        let mut ring: RingBuffer<u32> = RingBuffer::new();
        ring.alloc_buffer(3, &heap, |i| i as u32).unwrap();

        ring.rotate(1);
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![1, 2, 0]);
        ring.rotate(5);
        assert_eq!(ring[0], 0);
        assert!(ring.get(3).is_none());
    }

    #[test]
    fn test_ring_buffer_zero_capacity() {
        let heap = Heap::new("ring", 256);
        let mut ring: RingBuffer<u8> = RingBuffer::new();
        assert_eq!(ring.alloc_buffer(0, &heap, |_| 0), Err(HeapError::ZeroCapacity));
    }
}
