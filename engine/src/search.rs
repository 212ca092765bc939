// Query evaluation
// Phase 1 fills a predicate bitmap in parallel stripes; phase 2 emits the
// matching ids in the order of the chosen sort permutation

use crate::sort::SortKind;
use findex_core::entry::cstr_at;
use findex_core::sync::WorkerPool;
use findex_core::{ascii_lower_in_place, FileIndex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Entries per predicate stripe task.
const STRIPE_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Name pattern, optionally with `/` or `\` path separators. Written
    /// innermost-first: the first component matches the entry name, each
    /// later component names an ancestor directory exactly, nearest
    /// first (`c.txt\b` is a `c.txt` somewhere under a directory `b`).
    pub pattern: String,
    pub case_sensitive: bool,
    /// When false the name component must match at the start of the name.
    pub allow_substrings: bool,
    pub include_files: bool,
    pub include_dirs: bool,
    pub sort: SortKind,
    /// Reverse the iteration order over the chosen sort.
    pub reverse: bool,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            case_sensitive: false,
            allow_substrings: true,
            include_files: true,
            include_dirs: true,
            sort: SortKind::Direct,
            reverse: false,
        }
    }
}

/// Published outcome of one completed evaluation.
#[derive(Debug, Default, Clone)]
pub struct SearchResults {
    /// Matching entry ids in presentation order.
    pub ids: Vec<u32>,
    pub elapsed: Duration,
}

/// One atomically-set bit per entry. Stripes are bit-word aligned, but
/// fetch_or keeps even a misaligned split safe.
struct AtomicBitmap {
    words: Vec<AtomicU64>,
}

impl AtomicBitmap {
    fn new(bits: usize) -> Self {
        Self {
            words: (0..bits.div_ceil(64)).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn set(&self, bit: usize) {
        self.words[bit / 64].fetch_or(1 << (bit % 64), Ordering::Relaxed);
    }

    fn test(&self, bit: usize) -> bool {
        self.words[bit / 64].load(Ordering::Relaxed) & (1 << (bit % 64)) != 0
    }
}

/// Split a pattern on both separators, keeping written order: patterns
/// are entered innermost-first, so `"c.txt\b"` becomes `["c.txt", "b"]`
/// with the name component at index 0 and ancestors after it.
pub fn split_pattern(pattern: &str) -> Vec<String> {
    pattern.split(['/', '\\']).map(str::to_string).collect()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    if haystack.len() < needle.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|window| window == needle)
}

/// Evaluate `query` over `index`, appending matching ids to `out` in the
/// order given by `permutation` (identity when `None`). Returns false if
/// the cancel flag fired; `out` is then meaningless and must not be
/// published.
pub fn evaluate(
    index: &Arc<FileIndex>,
    permutation: Option<&[u32]>,
    query: &Query,
    pool: &WorkerPool,
    cancel: &Arc<AtomicBool>,
    out: &mut Vec<u32>,
) -> bool {
    let entry_count = index.len();
    if let Some(p) = permutation {
        // A permutation from a superseded index must never be applied.
        if p.len() != entry_count {
            return false;
        }
    }

    let mut pattern = query.pattern.clone();
    if !query.case_sensitive {
        // The arena side is pre-lowered; fold the pattern to match.
        // SAFETY: the ASCII case transform maps A-Z to a-z in place and
        // leaves every other byte untouched, so the string stays UTF-8.
        unsafe { ascii_lower_in_place(pattern.as_bytes_mut()) };
    }
    let segments: Arc<Vec<Vec<u8>>> = Arc::new(
        split_pattern(&pattern)
            .into_iter()
            .map(String::into_bytes)
            .collect(),
    );

    let bitmap = Arc::new(AtomicBitmap::new(entry_count));
    let mut start = 0usize;
    while start < entry_count {
        let end = (start + STRIPE_SIZE).min(entry_count);
        let index = Arc::clone(index);
        let segments = Arc::clone(&segments);
        let bitmap = Arc::clone(&bitmap);
        let cancel = Arc::clone(cancel);
        let query = query.clone();
        pool.execute(move || {
            evaluate_stripe(&index, &segments, &query, &bitmap, &cancel, start, end);
        });
        start = end;
    }
    pool.wait();

    if cancel.load(Ordering::Relaxed) {
        return false;
    }

    // Ordered emission through the permutation.
    if query.reverse {
        for position in (0..entry_count).rev() {
            if cancel.load(Ordering::Relaxed) {
                return false;
            }
            let id = permutation.map_or(position as u32, |p| p[position]);
            if bitmap.test(id as usize) {
                out.push(id);
            }
        }
    } else {
        for position in 0..entry_count {
            if cancel.load(Ordering::Relaxed) {
                return false;
            }
            let id = permutation.map_or(position as u32, |p| p[position]);
            if bitmap.test(id as usize) {
                out.push(id);
            }
        }
    }

    !cancel.load(Ordering::Relaxed)
}

fn evaluate_stripe(
    index: &FileIndex,
    segments: &[Vec<u8>],
    query: &Query,
    bitmap: &AtomicBitmap,
    cancel: &AtomicBool,
    start: usize,
    end: usize,
) {
    let arena = if query.case_sensitive {
        &index.names
    } else {
        &index.lower_names
    };

    for id in start..end {
        if cancel.load(Ordering::Relaxed) {
            return;
        }
        let entry = &index.entries[id];

        if entry.is_dir() {
            if !query.include_dirs {
                continue;
            }
        } else if !query.include_files {
            continue;
        }

        if segments.len() == 1 && segments[0].is_empty() {
            bitmap.set(id);
            continue;
        }

        let name = cstr_at(arena, entry.name_offset());
        let matched = if query.allow_substrings {
            contains(name, &segments[0])
        } else {
            name.starts_with(segments[0].as_slice())
        };
        if !matched {
            continue;
        }

        if segments.len() >= 2 && !ancestors_match(index, arena, segments, entry.parent_id) {
            continue;
        }

        bitmap.set(id);
    }
}

/// Path-segment matching above the entry: `segments[1]` may match ANY
/// ancestor, but every later segment must name the strict consecutive
/// parents of that ancestor. Candidates are retried upward until the root
/// is exhausted.
fn ancestors_match(index: &FileIndex, arena: &[u8], segments: &[Vec<u8>], first: u32) -> bool {
    let parent_of = |id: u32| index.entries[id as usize].parent_id;
    let mut candidate = first;
    loop {
        // Find the next ancestor whose name equals segments[1] exactly.
        loop {
            if cstr_at(arena, index.entries[candidate as usize].name_offset())
                == segments[1].as_slice()
            {
                break;
            }
            if candidate == parent_of(candidate) {
                return false;
            }
            candidate = parent_of(candidate);
        }

        let mut current = candidate;
        let mut tail_matches = true;
        for segment in &segments[2..] {
            current = parent_of(current);
            if cstr_at(arena, index.entries[current as usize].name_offset())
                != segment.as_slice()
            {
                tail_matches = false;
                break;
            }
        }
        if tail_matches {
            return true;
        }

        // This candidate failed; resume the search above it.
        if candidate == parent_of(candidate) {
            return false;
        }
        candidate = parent_of(candidate);
    }
}
