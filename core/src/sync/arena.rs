// Concurrent append-only name arena
// Offsets are reserved with a fetch-add; strings are never freed or moved

use super::seg_vec::SegVec;
use std::sync::atomic::{AtomicU32, Ordering};

/// Raise `target` to at least `value`.
pub fn atomic_max_u32(target: &AtomicU32, value: u32) {
    let mut current = target.load(Ordering::Relaxed);
    while current < value {
        match target.compare_exchange_weak(current, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(observed) => current = observed,
        }
    }
}

/// Thread-safe arena of NUL-terminated names.
///
/// `add_str` atomically reserves `len + 1` bytes, so concurrent writers
/// land in disjoint ranges; `high_water` tracks the end of the furthest
/// completed reservation and is the length used when flattening.
#[derive(Default)]
pub struct NameArena {
    data: SegVec<u8>,
    write_cursor: AtomicU32,
    high_water: AtomicU32,
}

impl NameArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `s` plus a NUL terminator, returning the starting offset.
    pub fn add_str(&self, s: &str) -> u32 {
        let len = s.len() as u32;
        let position = self.write_cursor.fetch_add(len + 1, Ordering::Relaxed);
        atomic_max_u32(&self.high_water, position + len + 1);
        self.data.write_slice(position as usize, s.as_bytes());
        self.data.set(position as usize + s.len(), 0);
        position
    }

    pub fn len(&self) -> u32 {
        self.high_water.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten into a contiguous buffer. Callers must have joined every
    /// writer first.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.data.copy_to_vec(self.len() as usize)
    }
}
