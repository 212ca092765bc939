// Concurrent staging for the MFT walk
// Parallel extent tasks stage records here; a single-threaded post-pass
// flattens the containers into the published index

use super::record::{ParsedRecord, ROOT_RECORD_NUMBER};
use findex_core::sync::{DedupMap, NameArena, SegVec};
use findex_core::{ascii_lower_in_place, FileEntry, FileIndex, DIR_BIT};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Shared build-time state.
///
/// Every container tolerates concurrent writers as long as indices are
/// disjoint, which the atomic id counter guarantees; size slots are plain
/// atomic adds because extension records may land in a different extent
/// task than their base record.
pub struct Staging {
    entries: SegVec<FileEntry>,
    names: NameArena,
    dedup: DedupMap,
    record_to_id: SegVec<u32>,
    id_to_record: SegVec<u32>,
    record_to_size: SegVec<AtomicU64>,
    next_id: AtomicU32,
}

impl Staging {
    pub fn new() -> Self {
        let names = NameArena::new();
        // Reserve offset 0 so a defaulted entry resolves to the empty name.
        names.add_str("");
        Self {
            entries: SegVec::new(),
            names,
            dedup: DedupMap::new(),
            record_to_id: SegVec::new(),
            id_to_record: SegVec::new(),
            record_to_size: SegVec::new(),
            next_id: AtomicU32::new(1),
        }
    }

    /// Stage one parsed record. Each `$FILE_NAME` (hard link) becomes its
    /// own entry; the root record always maps to id 0.
    pub fn stage_record(&self, record: &ParsedRecord) {
        for link in &record.names {
            let id = if record.record_number == ROOT_RECORD_NUMBER {
                0
            } else {
                self.next_id.fetch_add(1, Ordering::Relaxed)
            };
            self.record_to_id.set(record.record_number as usize, id);
            self.id_to_record.set(id as usize, record.record_number);

            let name_offset = self
                .dedup
                .get_or_insert_with(&link.name, || self.names.add_str(&link.name));
            let dir_bit = if record.is_dir { DIR_BIT } else { 0 };

            self.entries.set(
                id as usize,
                FileEntry {
                    // Parent MFT record number for now; rewritten to an
                    // entry id by `finish`.
                    parent_id: link.parent_record,
                    size: 0,
                    name_and_kind: name_offset | dir_bit,
                    mtime_minutes: record.mtime_minutes,
                },
            );
        }

        // Sizes accumulate per record, attributed to the base record when
        // this one only extends another's attribute list.
        if record.size_bytes > 0 {
            let slot = if record.base_record != 0 {
                record.base_record
            } else {
                record.record_number
            };
            self.record_to_size
                .get(slot as usize)
                .fetch_add(record.size_bytes, Ordering::Relaxed);
        }
    }

    pub fn staged_entries(&self) -> u32 {
        self.next_id.load(Ordering::Relaxed)
    }

    /// Flatten into a `FileIndex`. Must run after every staging writer has
    /// been joined (pool quiescence).
    pub fn finish(self) -> FileIndex {
        let count = self.next_id.load(Ordering::Relaxed) as usize;
        let mut entries = self.entries.copy_to_vec(count);
        let names = self.names.to_bytes();

        // Parent MFT record number -> assigned id. Unknown parents (meta
        // files, dropped records) collapse to the root.
        for entry in entries.iter_mut() {
            entry.parent_id = *self.record_to_id.get(entry.parent_id as usize);
        }

        // Leaf sizes come from the per-record accumulator; every ancestor
        // up to the root absorbs them. Only the root is its own parent.
        for i in 0..entries.len() {
            if entries[i].is_dir() {
                continue;
            }
            let record = *self.id_to_record.get(i);
            let size = self.record_to_size.get(record as usize).load(Ordering::Relaxed);
            entries[i].size = size;
            let mut current = i;
            while entries[current].parent_id as usize != current {
                let parent = entries[current].parent_id as usize;
                if parent >= entries.len() {
                    break;
                }
                entries[parent].size += size;
                current = parent;
            }
        }

        let mut lower_names = names.clone();
        ascii_lower_in_place(&mut lower_names);

        FileIndex {
            entries,
            names,
            lower_names,
        }
    }
}

impl Default for Staging {
    fn default() -> Self {
        Self::new()
    }
}
