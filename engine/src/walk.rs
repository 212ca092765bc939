// Directory-walker fallback
// Builds the same index through ordinary directory iteration when the raw
// MFT route is unavailable (no elevation, or a non-NTFS root)

use findex_core::sync::{NameArena, SegVec, WorkerPool};
use findex_core::{FileEntry, FileIndex, FindexError, ProgressGauge, DIR_BIT};
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Below this depth subtrees are walked inline; at it they are handed to
/// the pool and their sizes aggregated after quiescence.
const HANDOFF_LEVEL: usize = 4;

const UNIX_TO_FILETIME_SECS: u64 = 11_644_473_600;

struct WalkCtx {
    entries: SegVec<FileEntry>,
    names: NameArena,
    next_id: AtomicU32,
    /// Roots of subtrees whose sizes were computed off-thread and still
    /// need to be propagated to their ancestors.
    deferred: Mutex<Vec<u32>>,
    progress: Arc<ProgressGauge>,
}

/// Walk `root` recursively into a `FileIndex` whose entry 0 is named
/// `label`. Unreadable directories and entries are skipped; symlinks and
/// reparse points are never followed.
pub fn walk_directory(
    root: &Path,
    label: &str,
    progress: Arc<ProgressGauge>,
) -> Result<FileIndex, FindexError> {
    if !root.is_dir() {
        return Err(FindexError::Other(format!(
            "Walk root is not a directory: {}",
            root.display()
        )));
    }

    let ctx = Arc::new(WalkCtx {
        entries: SegVec::new(),
        names: NameArena::new(),
        next_id: AtomicU32::new(1),
        deferred: Mutex::new(Vec::new()),
        progress,
    });
    // Offset 0 stays an empty name so defaulted entries resolve harmlessly.
    ctx.names.add_str("");

    let root_mtime = std::fs::metadata(root)
        .ok()
        .and_then(|m| m.modified().ok())
        .map(system_time_to_minutes)
        .unwrap_or(0);
    let root_offset = ctx.names.add_str(label);
    ctx.entries.set(
        0,
        FileEntry {
            parent_id: 0,
            size: 0,
            name_and_kind: root_offset | DIR_BIT,
            mtime_minutes: root_mtime,
        },
    );

    let pool = Arc::new(WorkerPool::new());
    let root_size = iterate_dir(&ctx, &pool, root.to_path_buf(), 0, 0);
    pool.wait();

    let count = ctx.next_id.load(Ordering::Relaxed) as usize;
    let mut entries = ctx.entries.copy_to_vec(count);
    entries[0].size = root_size;

    // Layer-by-layer propagation of the handed-off subtree sizes: each
    // round moves every pending contribution one level up until all of
    // them have reached the root.
    let mut pending: HashMap<u32, u64> = HashMap::new();
    for id in ctx.deferred.lock().iter() {
        pending.insert(*id, entries[*id as usize].size);
    }
    while !pending.is_empty() {
        let mut next: HashMap<u32, u64> = HashMap::new();
        for (id, size) in pending {
            if id == 0 {
                continue;
            }
            let parent = entries[id as usize].parent_id;
            entries[parent as usize].size += size;
            *next.entry(parent).or_insert(0) += size;
        }
        pending = next;
    }

    let names = ctx.names.to_bytes();
    let mut index = FileIndex {
        entries,
        names,
        lower_names: Vec::new(),
    };
    index.rebuild_lower_names();
    ctx.progress.complete();
    Ok(index)
}

fn iterate_dir(
    ctx: &Arc<WalkCtx>,
    pool: &Arc<WorkerPool>,
    dir: PathBuf,
    parent_id: u32,
    level: usize,
) -> u64 {
    let reader = match std::fs::read_dir(&dir) {
        Ok(reader) => reader,
        Err(e) => {
            debug!("Cannot enumerate {}: {e}", dir.display());
            return 0;
        }
    };

    let mut size_sum = 0u64;
    for entry in reader {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        let file_type = match entry.file_type() {
            Ok(t) => t,
            Err(_) => continue,
        };
        if file_type.is_symlink() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        let metadata = entry.metadata().ok();
        let mtime_minutes = metadata
            .as_ref()
            .and_then(|m| m.modified().ok())
            .map(system_time_to_minutes)
            .unwrap_or(0);

        let id = ctx.next_id.fetch_add(1, Ordering::Relaxed);
        let name_offset = ctx.names.add_str(&name);

        if file_type.is_dir() {
            ctx.entries.set(
                id as usize,
                FileEntry {
                    parent_id,
                    size: 0,
                    name_and_kind: name_offset | DIR_BIT,
                    mtime_minutes,
                },
            );
            let child = entry.path();
            if level == HANDOFF_LEVEL {
                ctx.deferred.lock().push(id);
                let ctx = Arc::clone(ctx);
                let task_pool = Arc::clone(pool);
                pool.execute(move || {
                    let size = iterate_dir(&ctx, &task_pool, child, id, level + 1);
                    let mut updated = *ctx.entries.get(id as usize);
                    updated.size = size;
                    ctx.entries.set(id as usize, updated);
                });
            } else {
                let size = iterate_dir(ctx, pool, child, id, level + 1);
                let mut updated = *ctx.entries.get(id as usize);
                updated.size = size;
                ctx.entries.set(id as usize, updated);
                size_sum += size;
            }
        } else {
            let size = metadata.map(|m| m.len()).unwrap_or(0);
            ctx.entries.set(
                id as usize,
                FileEntry {
                    parent_id,
                    size,
                    name_and_kind: name_offset,
                    mtime_minutes,
                },
            );
            ctx.progress.add(size);
            size_sum += size;
        }
    }
    size_sum
}

fn system_time_to_minutes(time: SystemTime) -> u32 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since_unix) => ((since_unix.as_secs() + UNIX_TO_FILETIME_SECS) / 60) as u32,
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_file(path: &Path, len: usize) {
        fs::write(path, vec![b'x'; len]).unwrap();
    }

    /// tmp/
    ///   top.txt          (10)
    ///   a/b/c/d/e/f/     (deep enough to cross the handoff level)
    ///     deep.txt       (100)
    ///   a/side.txt       (7)
    fn build_tree(root: &Path) {
        write_file(&root.join("top.txt"), 10);
        let deep = root.join("a/b/c/d/e/f");
        fs::create_dir_all(&deep).unwrap();
        write_file(&deep.join("deep.txt"), 100);
        write_file(&root.join("a/side.txt"), 7);
    }

    fn find(index: &FileIndex, name: &str) -> u32 {
        (0..index.len() as u32)
            .find(|&i| index.name_of(i) == name)
            .unwrap_or_else(|| panic!("{name} not indexed"))
    }

    #[test]
    fn walk_matches_structure_and_sizes() {
        let tmp = tempfile::tempdir().unwrap();
        build_tree(tmp.path());

        let progress = Arc::new(ProgressGauge::new());
        let index = walk_directory(tmp.path(), "T:", Arc::clone(&progress)).unwrap();

        assert_eq!(index.name_of(0), "T:");
        assert!(index.entry(0).unwrap().is_dir());
        let root_parent_id = index.entry(0).unwrap().parent_id;
        assert_eq!(root_parent_id, 0);
        assert_eq!(progress.fraction(), 1.0);

        // 1 root + 6 dirs + 3 files.
        assert_eq!(index.len(), 10);

        let deep = find(&index, "deep.txt");
        let deep_size = index.entry(deep).unwrap().size;
        assert_eq!(deep_size, 100);
        assert!(!index.entry(deep).unwrap().is_dir());

        // Every directory's size equals the sum of its children.
        for dir in 0..index.len() as u32 {
            let entry = index.entry(dir).unwrap();
            if !entry.is_dir() {
                continue;
            }
            let children_sum: u64 = (0..index.len() as u32)
                .filter(|&c| c != dir && index.entry(c).unwrap().parent_id == dir)
                .map(|c| index.entry(c).unwrap().size)
                .sum();
            let entry_size = entry.size;
            assert_eq!(entry_size, children_sum, "dir {}", index.name_of(dir));
        }
        let root_size = index.entry(0).unwrap().size;
        assert_eq!(root_size, 117);

        // Parents precede children and carry the directory bit.
        for id in 1..index.len() as u32 {
            let entry = index.entry(id).unwrap();
            assert!(entry.parent_id < id);
            assert!(index.entry(entry.parent_id).unwrap().is_dir());
        }
    }

    #[test]
    fn lower_names_are_generated() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(&tmp.path().join("MiXeD.TXT"), 1);

        let index =
            walk_directory(tmp.path(), "T:", Arc::new(ProgressGauge::new())).unwrap();
        let id = find(&index, "MiXeD.TXT");
        let offset = index.entry(id).unwrap().name_offset();
        assert_eq!(findex_core::entry::name_at(&index.lower_names, offset), "mixed.txt");
    }

    #[test]
    fn walk_root_must_be_a_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("plain.txt");
        write_file(&file, 1);
        assert!(walk_directory(&file, "T:", Arc::new(ProgressGauge::new())).is_err());
    }
}
