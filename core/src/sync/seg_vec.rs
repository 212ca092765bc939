// Segmented append-only vector
// Geometrically growing blocks that never move once allocated, so many
// threads can write disjoint indices without relocation races

use parking_lot::Mutex;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Capacity of block 0 is `1 << BASE_BITS`; each later block doubles the
/// total, so block k (k > 0) holds `1 << (BASE_BITS + k - 1)` elements.
const BASE_BITS: u32 = 6;
/// 26 blocks cover indices up to 2^31, the width of an entry id.
const MAX_BLOCKS: usize = 26;

/// Append-only vector backed by stable blocks.
///
/// Indexing lazily allocates missing trailing blocks under a mutex; element
/// access itself takes no lock. Concurrent callers must touch disjoint
/// indices (writers allocate their index ranges through atomics before
/// writing); a written slot may be read once the write happens-before the
/// read, e.g. after a pool `wait`.
pub struct SegVec<T> {
    blocks: [AtomicPtr<T>; MAX_BLOCKS],
    block_count: AtomicUsize,
    grow: Mutex<()>,
}

unsafe impl<T: Send> Send for SegVec<T> {}
unsafe impl<T: Send + Sync> Sync for SegVec<T> {}

impl<T: Default> SegVec<T> {
    pub fn new() -> Self {
        let vec = Self {
            blocks: std::array::from_fn(|_| AtomicPtr::new(std::ptr::null_mut())),
            block_count: AtomicUsize::new(0),
            grow: Mutex::new(()),
        };
        vec.ensure_block(0);
        vec
    }

    fn block_capacity(block: usize) -> usize {
        if block == 0 {
            1 << BASE_BITS
        } else {
            1 << (BASE_BITS + block as u32 - 1)
        }
    }

    /// Map a logical index to `(block, offset)` via the MSB position.
    fn locate(index: usize) -> (usize, usize) {
        if index < (1 << BASE_BITS) {
            return (0, index);
        }
        let msb = usize::BITS - 1 - index.leading_zeros();
        let block = (msb - BASE_BITS + 1) as usize;
        assert!(block < MAX_BLOCKS, "segmented vector index {index} out of range");
        (block, index - (1usize << msb))
    }

    fn ensure_block(&self, block: usize) {
        if block < self.block_count.load(Ordering::Acquire) {
            return;
        }
        let _guard = self.grow.lock();
        let mut count = self.block_count.load(Ordering::Relaxed);
        while count <= block {
            let capacity = Self::block_capacity(count);
            let storage: Box<[T]> = (0..capacity).map(|_| T::default()).collect();
            let ptr = Box::leak(storage).as_mut_ptr();
            self.blocks[count].store(ptr, Ordering::Release);
            count += 1;
            self.block_count.store(count, Ordering::Release);
        }
    }

    fn element_ptr(&self, index: usize) -> *mut T {
        let (block, offset) = Self::locate(index);
        self.ensure_block(block);
        let base = self.blocks[block].load(Ordering::Acquire);
        unsafe { base.add(offset) }
    }

    /// Shared reference to the slot at `index`, allocating blocks as needed.
    /// Unwritten slots read as `T::default()`.
    pub fn get(&self, index: usize) -> &T {
        unsafe { &*self.element_ptr(index) }
    }

    /// Overwrite the slot at `index`. Concurrent `set` calls must target
    /// disjoint indices.
    pub fn set(&self, index: usize, value: T)
    where
        T: Copy,
    {
        unsafe { self.element_ptr(index).write(value) }
    }

    /// Copy a contiguous run of values starting at `start`, spanning block
    /// boundaries as needed.
    pub fn write_slice(&self, start: usize, values: &[T])
    where
        T: Copy,
    {
        let mut index = start;
        let mut src = values;
        while !src.is_empty() {
            let (block, offset) = Self::locate(index);
            self.ensure_block(block);
            let take = src.len().min(Self::block_capacity(block) - offset);
            let base = self.blocks[block].load(Ordering::Acquire);
            unsafe {
                std::ptr::copy_nonoverlapping(src.as_ptr(), base.add(offset), take);
            }
            index += take;
            src = &src[take..];
        }
    }

    /// Flatten the first `len` slots into a contiguous vector. Callers must
    /// have established happens-before with every writer (the walkers call
    /// this only after pool quiescence).
    pub fn copy_to_vec(&self, len: usize) -> Vec<T>
    where
        T: Copy,
    {
        let mut out = Vec::with_capacity(len);
        let mut index = 0;
        while index < len {
            let (block, offset) = Self::locate(index);
            self.ensure_block(block);
            let take = (len - index).min(Self::block_capacity(block) - offset);
            let base = self.blocks[block].load(Ordering::Acquire);
            unsafe {
                out.extend_from_slice(std::slice::from_raw_parts(base.add(offset), take));
            }
            index += take;
        }
        out
    }
}

impl<T: Default> Default for SegVec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for SegVec<T> {
    fn drop(&mut self) {
        let count = *self.block_count.get_mut();
        for block in 0..count {
            let ptr = *self.blocks[block].get_mut();
            let capacity = if block == 0 {
                1 << BASE_BITS
            } else {
                1 << (BASE_BITS + block as u32 - 1)
            };
            unsafe {
                drop(Box::from_raw(std::slice::from_raw_parts_mut(ptr, capacity)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    #[test]
    fn locate_maps_indices_into_doubling_blocks() {
        assert_eq!(SegVec::<u32>::locate(0), (0, 0));
        assert_eq!(SegVec::<u32>::locate(63), (0, 63));
        assert_eq!(SegVec::<u32>::locate(64), (1, 0));
        assert_eq!(SegVec::<u32>::locate(127), (1, 63));
        assert_eq!(SegVec::<u32>::locate(128), (2, 0));
        assert_eq!(SegVec::<u32>::locate(255), (2, 127));
        assert_eq!(SegVec::<u32>::locate(256), (3, 0));
    }

    #[test]
    fn set_then_get_across_blocks() {
        let vec = SegVec::new();
        for i in (0..10_000).step_by(7) {
            vec.set(i, i as u64);
        }
        for i in (0..10_000).step_by(7) {
            assert_eq!(*vec.get(i), i as u64);
        }
        // Untouched slots read as default.
        assert_eq!(*vec.get(1), 0);
    }

    #[test]
    fn copy_to_vec_preserves_order() {
        let vec = SegVec::new();
        for i in 0..1000usize {
            vec.set(i, i as u32);
        }
        let flat = vec.copy_to_vec(1000);
        assert_eq!(flat.len(), 1000);
        for (i, v) in flat.iter().enumerate() {
            assert_eq!(*v, i as u32);
        }
    }

    #[test]
    fn write_slice_spans_block_boundaries() {
        let vec = SegVec::new();
        let data: Vec<u8> = (0..200).collect();
        vec.write_slice(60, &data);
        let flat = vec.copy_to_vec(260);
        assert_eq!(&flat[60..260], data.as_slice());
    }

    #[test]
    fn concurrent_disjoint_writers() {
        let vec = Arc::new(SegVec::new());
        let threads: Vec<_> = (0..8u64)
            .map(|t| {
                let vec = Arc::clone(&vec);
                std::thread::spawn(move || {
                    for i in 0..5_000u64 {
                        vec.set((i * 8 + t) as usize, t * 1_000_000 + i);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        for t in 0..8u64 {
            for i in 0..5_000u64 {
                assert_eq!(*vec.get((i * 8 + t) as usize), t * 1_000_000 + i);
            }
        }
    }

    #[test]
    fn atomic_slots_accumulate() {
        let vec: Arc<SegVec<AtomicU64>> = Arc::new(SegVec::new());
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let vec = Arc::clone(&vec);
                std::thread::spawn(move || {
                    for i in 0..1_000 {
                        vec.get(i % 10).fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        for i in 0..10 {
            assert_eq!(vec.get(i).load(Ordering::Relaxed), 400);
        }
    }
}
