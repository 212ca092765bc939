// Name interning map
// Sharded to bound contention between parallel record-parsing workers

use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

const SHARDS: usize = 64;

/// Strict concurrent map from file name to its minted arena offset.
///
/// Purely an optimization: identical short names on a volume number in the
/// millions, and interning them keeps the arena small. Unlike the lossy
/// set this replaces, every distinct name maps to exactly one offset.
pub struct DedupMap {
    shards: Vec<Mutex<HashMap<Box<str>, u32>>>,
}

impl DedupMap {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard_for(&self, name: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        (hasher.finish() as usize) & (SHARDS - 1)
    }

    /// Look up `name`, minting a new offset with `mint` on a miss. The mint
    /// closure runs under the shard lock, so one offset exists per name.
    pub fn get_or_insert_with<F>(&self, name: &str, mint: F) -> u32
    where
        F: FnOnce() -> u32,
    {
        let mut shard = self.shards[self.shard_for(name)].lock();
        if let Some(&offset) = shard.get(name) {
            return offset;
        }
        let offset = mint();
        shard.insert(name.into(), offset);
        offset
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DedupMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn each_name_mints_exactly_once() {
        let map = Arc::new(DedupMap::new());
        let next = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let map = Arc::clone(&map);
                let next = Arc::clone(&next);
                std::thread::spawn(move || {
                    for i in 0..2_000u32 {
                        let name = format!("file-{}.txt", i % 100);
                        map.get_or_insert_with(&name, || next.fetch_add(1, Ordering::Relaxed));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(map.len(), 100);
        assert_eq!(next.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn hit_returns_the_original_offset() {
        let map = DedupMap::new();
        assert_eq!(map.get_or_insert_with("a", || 7), 7);
        assert_eq!(map.get_or_insert_with("a", || 99), 7);
        assert_eq!(map.get_or_insert_with("b", || 11), 11);
    }
}
