// Secondary sort indexes
// Three permutations of the entry ids, rebuilt whenever an index publishes

use findex_core::entry::cstr_at;
use findex_core::FileIndex;
use rayon::prelude::*;

/// Iteration order for search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKind {
    /// Ascending entry id; needs no permutation.
    #[default]
    Direct,
    Name,
    Size,
    Date,
}

/// The three permutations of `[0, N)`. A default (empty) set refuses every
/// non-direct sort against a non-empty index.
#[derive(Debug, Default, Clone)]
pub struct SortIndexes {
    pub by_name: Vec<u32>,
    pub by_size: Vec<u32>,
    pub by_date: Vec<u32>,
}

impl SortIndexes {
    /// Permutation for `kind`, or `None` for `Direct`.
    pub fn permutation(&self, kind: SortKind) -> Option<&[u32]> {
        match kind {
            SortKind::Direct => None,
            SortKind::Name => Some(&self.by_name),
            SortKind::Size => Some(&self.by_size),
            SortKind::Date => Some(&self.by_date),
        }
    }
}

/// Build all three permutations, each sorted in parallel.
pub fn build_sort_indexes(index: &FileIndex) -> SortIndexes {
    let (by_name, (by_size, by_date)) = rayon::join(
        || name_sort_index(index),
        || rayon::join(|| size_sort_index(index), || date_sort_index(index)),
    );
    SortIndexes {
        by_name,
        by_size,
        by_date,
    }
}

fn identity(len: usize) -> Vec<u32> {
    (0..len as u32).collect()
}

/// Lowercased-name comparison, DESCENDING like the reference: the search
/// engine's `reverse` flag flips iteration, so descending here renders as
/// ascending by default in the presentation layer.
fn name_sort_index(index: &FileIndex) -> Vec<u32> {
    let mut ids = identity(index.len());
    ids.par_sort_unstable_by(|&i, &j| {
        let a = cstr_at(&index.lower_names, index.entries[i as usize].name_offset());
        let b = cstr_at(&index.lower_names, index.entries[j as usize].name_offset());
        b.cmp(a)
    });
    ids
}

fn size_sort_index(index: &FileIndex) -> Vec<u32> {
    let mut ids = identity(index.len());
    ids.par_sort_unstable_by(|&i, &j| {
        let a = index.entries[i as usize].size;
        let b = index.entries[j as usize].size;
        b.cmp(&a)
    });
    ids
}

fn date_sort_index(index: &FileIndex) -> Vec<u32> {
    let mut ids = identity(index.len());
    ids.par_sort_unstable_by(|&i, &j| {
        let a = index.entries[i as usize].mtime_minutes;
        let b = index.entries[j as usize].mtime_minutes;
        b.cmp(&a)
    });
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use findex_core::{FileEntry, DIR_BIT};
    use std::cmp::Ordering;

    fn is_sorted_by<F: FnMut(u32, u32) -> Ordering>(ids: &[u32], mut cmp: F) -> bool {
        ids.windows(2).all(|w| cmp(w[0], w[1]) != Ordering::Greater)
    }

    fn add_name(names: &mut Vec<u8>, s: &str) -> u32 {
        let offset = names.len() as u32;
        names.extend_from_slice(s.as_bytes());
        names.push(0);
        offset
    }

    fn sample_index() -> FileIndex {
        let mut names = vec![0u8];
        let root = add_name(&mut names, "C:");
        let delta = add_name(&mut names, "Delta");
        let alpha = add_name(&mut names, "alpha");
        let bravo = add_name(&mut names, "Bravo");
        let entries = vec![
            FileEntry { parent_id: 0, size: 60, name_and_kind: root | DIR_BIT, mtime_minutes: 1 },
            FileEntry { parent_id: 0, size: 10, name_and_kind: delta, mtime_minutes: 9 },
            FileEntry { parent_id: 0, size: 30, name_and_kind: alpha, mtime_minutes: 4 },
            FileEntry { parent_id: 0, size: 20, name_and_kind: bravo, mtime_minutes: 7 },
        ];
        let mut index = FileIndex { entries, names, lower_names: Vec::new() };
        index.rebuild_lower_names();
        index
    }

    #[test]
    fn name_permutation_is_descending_lexicographic() {
        let index = sample_index();
        let sorts = build_sort_indexes(&index);
        // delta > c: > bravo > alpha after case folding.
        assert_eq!(sorts.by_name, vec![1, 0, 3, 2]);
    }

    #[test]
    fn size_permutation_is_descending() {
        let index = sample_index();
        let sorts = build_sort_indexes(&index);
        assert_eq!(sorts.by_size, vec![0, 2, 3, 1]);
    }

    #[test]
    fn date_permutation_is_descending() {
        let index = sample_index();
        let sorts = build_sort_indexes(&index);
        assert_eq!(sorts.by_date, vec![1, 3, 2, 0]);
    }

    #[test]
    fn permutations_cover_every_id() {
        let index = sample_index();
        let sorts = build_sort_indexes(&index);
        for ids in [&sorts.by_name, &sorts.by_size, &sorts.by_date] {
            let mut sorted = ids.clone();
            sorted.sort_unstable();
            assert_eq!(sorted, vec![0, 1, 2, 3]);
        }
    }

    #[test]
    fn large_permutations_stay_ordered() {
        let mut names = vec![0u8];
        let mut entries = Vec::new();
        for i in 0..10_000u32 {
            let offset = add_name(&mut names, &format!("file-{:05}", (i * 7919) % 10_000));
            entries.push(FileEntry {
                parent_id: 0,
                size: ((i * 31) % 1000) as u64,
                name_and_kind: offset,
                mtime_minutes: (i * 17) % 5000,
            });
        }
        let mut index = FileIndex { entries, names, lower_names: Vec::new() };
        index.rebuild_lower_names();

        let sorts = build_sort_indexes(&index);
        assert!(is_sorted_by(&sorts.by_size, |i, j| {
            let a = index.entries[i as usize].size;
            let b = index.entries[j as usize].size;
            b.cmp(&a)
        }));
        assert!(is_sorted_by(&sorts.by_date, |i, j| {
            let a = index.entries[i as usize].mtime_minutes;
            let b = index.entries[j as usize].mtime_minutes;
            b.cmp(&a)
        }));
        assert!(is_sorted_by(&sorts.by_name, |i, j| {
            cstr_at(&index.lower_names, index.entries[j as usize].name_offset()).cmp(cstr_at(
                &index.lower_names,
                index.entries[i as usize].name_offset(),
            ))
        }));
    }
}
